//! Instances to JSON API documents.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use serde_json::Map;

use super::errors::{SerializationError, SerializationErrors};
use crate::config::ApiConfig;
use crate::document::{
    Document, Linkage, Links, PrimaryData, RelationshipObject, ResourceIdentifier, ResourceObject,
};
use crate::instance::{Instance, Related};
use crate::schema::Model;
use crate::store::Store;

/// Post-processing of a serialized resource, registered per collection.
///
/// A hook may add or remove members, or refuse the resource altogether by
/// returning an error; the other resources of the document are still
/// serialized and every failure is reported.
pub trait ResourceHook: Send + Sync {
    /// # Errors
    /// Any [`SerializationError`] marks `instance` as failed.
    fn after_serialize(
        &self,
        instance: &Instance,
        resource: &mut ResourceObject,
    ) -> Result<(), SerializationError>;
}

pub type Hooks = BTreeMap<String, Arc<dyn ResourceHook>>;

/// Per-request choices: include paths and sparse fieldsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SerializeOptions {
    /// Dotted relationship paths; `None` falls back to configured defaults
    pub include: Option<Vec<String>>,
    /// Requested fields per collection
    pub fields: BTreeMap<String, BTreeSet<String>>,
}

pub struct Serializer<'a> {
    store: &'a Store,
    config: &'a ApiConfig,
    hooks: &'a Hooks,
}

impl<'a> Serializer<'a> {
    pub fn new(store: &'a Store, config: &'a ApiConfig, hooks: &'a Hooks) -> Self {
        Self {
            store,
            config,
            hooks,
        }
    }

    fn model(&self, instance: &Instance) -> Result<&'a Model, SerializationError> {
        self.store
            .schema()
            .model(instance.collection())
            .map_err(|err| SerializationError::new(instance, err.to_string()))
    }

    /// Configured `only` intersected with the client's fieldset; `id` and
    /// `type` are always kept.
    fn only_for(&self, collection: &str, options: &SerializeOptions) -> Option<BTreeSet<String>> {
        let configured = self.config.resource(collection).only;
        let requested = options.fields.get(collection);
        let mut only = match (configured, requested) {
            (Some(configured), Some(requested)) => {
                configured.intersection(requested).cloned().collect()
            }
            (Some(configured), None) => configured,
            (None, Some(requested)) => requested.clone(),
            (None, None) => return None,
        };
        only.insert("id".to_string());
        only.insert("type".to_string());
        Some(only)
    }

    /// A bare `{type, id}` for `instance`.
    ///
    /// # Errors
    /// Instances of unregistered collections or without a primary key.
    pub fn serialize_identifier(
        &self,
        instance: &Instance,
    ) -> Result<ResourceIdentifier, SerializationError> {
        let model = self.model(instance)?;
        let id = instance
            .id_string(model)
            .ok_or_else(|| SerializationError::for_instance(instance))?;
        Ok(ResourceIdentifier {
            kind: model.collection_name().to_string(),
            id,
        })
    }

    fn linkage(&self, related: &Related) -> Result<Linkage, SerializationError> {
        Ok(match related {
            Related::One(None) => Linkage::One(None),
            Related::One(Some(one)) => Linkage::One(Some(self.serialize_identifier(one)?)),
            Related::Many(many) => Linkage::Many(
                many.iter()
                    .map(|one| self.serialize_identifier(one))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// One resource object, restricted to `only` when given. A restricted
    /// resource carries `links.self` only when `only` names `"self"`.
    ///
    /// # Errors
    /// Failed relationship loads and hook refusals.
    pub async fn serialize_resource(
        &self,
        instance: &Instance,
        only: Option<&BTreeSet<String>>,
    ) -> Result<ResourceObject, SerializationError> {
        let model = self.model(instance)?;
        let identifier = self.serialize_identifier(instance)?;
        let exclude = self.config.resource(model.collection_name()).exclude;
        let wanted = |name: &str| {
            !exclude.contains(name) && only.is_none_or(|only| only.contains(name))
        };

        let foreign_keys = model.foreign_key_fields();
        let mut attributes = Map::new();
        for field in model.fields() {
            let name = field.name.as_str();
            if name == "id" && model.is_primary_key(name) {
                continue;
            }
            if foreign_keys.contains(name) || !wanted(name) {
                continue;
            }
            let value = instance
                .get(name)
                .map_or(serde_json::Value::Null, |value| value.to_json());
            attributes.insert(name.to_string(), value);
        }

        let base = format!("{}/{}", identifier.kind, identifier.id);
        let mut relationships = BTreeMap::new();
        for relationship in model.relationships() {
            let name = relationship.name.as_str();
            if !wanted(name) {
                continue;
            }
            let related = self.store.related(instance, name).await.map_err(|err| {
                tracing::error!(error = ?err, relationship = name, "Failed to load relationship");
                SerializationError::for_instance(instance).identified(Some(identifier.id.clone()), false)
            })?;
            let links = Links::from([
                (
                    "self".to_string(),
                    self.config.url(&format!("{base}/relationships/{name}")),
                ),
                (
                    "related".to_string(),
                    self.config.url(&format!("{base}/{name}")),
                ),
            ]);
            relationships.insert(
                name.to_string(),
                RelationshipObject {
                    data: self.linkage(&related)?,
                    links: Some(links),
                },
            );
        }

        // A sparse fieldset drops `links.self` unless it names "self".
        let links = wanted("self")
            .then(|| Links::from([("self".to_string(), self.config.url(&base))]));
        let mut resource = ResourceObject {
            kind: identifier.kind,
            id: identifier.id,
            attributes,
            relationships,
            links,
        };
        if let Some(hook) = self.hooks.get(model.collection_name()) {
            hook.after_serialize(instance, &mut resource)?;
        }
        Ok(resource)
    }

    async fn serialize_all(
        &self,
        instances: &[Instance],
        options: &SerializeOptions,
        included: bool,
        errors: &mut Vec<SerializationError>,
    ) -> Vec<ResourceObject> {
        let mut resources = Vec::with_capacity(instances.len());
        for instance in instances {
            let only = self.only_for(instance.collection(), options);
            match self.serialize_resource(instance, only.as_ref()).await {
                Ok(resource) => resources.push(resource),
                Err(err) => {
                    let id = self
                        .model(instance)
                        .ok()
                        .and_then(|model| instance.id_string(model));
                    let err = err.identified(id, included);
                    tracing::warn!(
                        collection = instance.collection(),
                        id = ?err.id,
                        included,
                        "{}",
                        err.detail()
                    );
                    errors.push(err);
                }
            }
        }
        resources
    }

    /// Instances reached by following `path` from `instance`, every level of
    /// the path included.
    async fn follow(&self, instance: &Instance, path: &str) -> Result<Vec<Instance>, SerializationError> {
        let mut frontier = vec![instance.clone()];
        let mut reached = Vec::new();
        for segment in path.split('.') {
            let mut next = Vec::new();
            for current in &frontier {
                let related = self.store.related(current, segment).await.map_err(|err| {
                    SerializationError::new(current, format!("Invalid include \"{path}\": {err}"))
                })?;
                next.extend(related.instances().into_iter().cloned());
            }
            reached.extend(next.iter().cloned());
            frontier = next;
        }
        Ok(reached)
    }

    /// Resources to include with `primary`, never repeating a primary
    /// resource and each `(type, id)` at most once.
    async fn included(
        &self,
        primary: &[Instance],
        options: &SerializeOptions,
        errors: &mut Vec<SerializationError>,
    ) -> Vec<ResourceObject> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        for instance in primary {
            if let Ok(identifier) = self.serialize_identifier(instance) {
                seen.insert((identifier.kind, identifier.id));
            }
        }

        let mut to_include = Vec::new();
        for instance in primary {
            let paths = options.include.clone().unwrap_or_else(|| {
                self.config
                    .resource(instance.collection())
                    .default_includes
            });
            for path in paths.iter().filter(|path| !path.is_empty()) {
                match self.follow(instance, path).await {
                    Ok(reached) => {
                        for other in reached {
                            let Ok(identifier) = self.serialize_identifier(&other) else {
                                continue;
                            };
                            if seen.insert((identifier.kind, identifier.id)) {
                                to_include.push(other);
                            }
                        }
                    }
                    Err(err) => errors.push(err.identified(None, true)),
                }
            }
        }
        self.serialize_all(&to_include, options, true, errors).await
    }

    /// A document whose primary data is `instance`.
    ///
    /// # Errors
    /// Every primary and included resource that failed.
    pub async fn serialize(
        &self,
        instance: &Instance,
        options: &SerializeOptions,
    ) -> Result<Document, SerializationErrors> {
        let mut errors = Vec::new();
        let primary = std::slice::from_ref(instance);
        let mut resources = self.serialize_all(primary, options, false, &mut errors).await;
        let included = self.included(primary, options, &mut errors).await;
        if !errors.is_empty() {
            return Err(SerializationErrors(errors));
        }
        let resource = resources.pop().map(Box::new);
        let self_link = resource
            .as_ref()
            .map(|resource| self.config.url(&format!("{}/{}", resource.kind, resource.id)));
        let mut document = Document::new(PrimaryData::One(resource));
        if let Some(link) = self_link {
            document.links.insert("self".to_string(), link);
        }
        document.included = included;
        Ok(document)
    }

    /// A document whose primary data is the list `instances`.
    ///
    /// # Errors
    /// Every primary and included resource that failed.
    pub async fn serialize_many(
        &self,
        instances: &[Instance],
        options: &SerializeOptions,
    ) -> Result<Document, SerializationErrors> {
        let mut errors = Vec::new();
        let resources = self.serialize_all(instances, options, false, &mut errors).await;
        let included = self.included(instances, options, &mut errors).await;
        if !errors.is_empty() {
            return Err(SerializationErrors(errors));
        }
        let mut document = Document::new(PrimaryData::Many(resources));
        document.included = included;
        Ok(document)
    }
}
