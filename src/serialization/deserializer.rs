//! JSON API documents to instances.

use serde_json::{Map, Value};

use super::errors::{DeserializationError, DeserializationErrors};
use crate::config::ApiConfig;
use crate::instance::{Instance, Related, Scalar};
use crate::schema::{Field, FieldKind, Join, Model, Relationship};
use crate::store::Store;

type Object = Map<String, Value>;

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// The `data` member of a document or relationship object.
fn data_of<'v>(
    object: &'v Value,
    relation: Option<&str>,
) -> Result<&'v Value, DeserializationError> {
    object
        .get("data")
        .ok_or_else(|| DeserializationError::MissingData {
            relation: relation.map(str::to_string),
        })
}

/// `data` as a single resource object.
fn resource_data(document: &Value) -> Result<&Object, DeserializationError> {
    match data_of(document, None)? {
        Value::Object(data) => Ok(data),
        Value::Null => Err(DeserializationError::MissingData { relation: None }),
        _ => Err(DeserializationError::Malformed(
            "\"data\" element must be an object".to_string(),
        )),
    }
}

fn check_type(data: &Object, model: &Model, relation: Option<&str>) -> Result<(), DeserializationError> {
    let given = data
        .get("type")
        .ok_or_else(|| DeserializationError::MissingType {
            relation: relation.map(str::to_string),
        })?;
    let given = given.as_str().unwrap_or_default();
    if given == model.collection_name() {
        Ok(())
    } else {
        Err(DeserializationError::ConflictingType {
            expected: model.collection_name().to_string(),
            given: given.to_string(),
            relation: relation.map(str::to_string),
        })
    }
}

/// Primary key fields named in `attributes`, with their values.
fn key_attributes<'d>(data: &'d Object, model: &'d Model) -> impl Iterator<Item = (&'d Field, &'d Value)> {
    data.get("attributes")
        .and_then(Value::as_object)
        .into_iter()
        .flatten()
        .filter(|(name, _)| model.is_primary_key(name))
        .filter_map(|(name, value)| Some((model.find_field(name)?, value)))
}

pub struct Deserializer<'a> {
    store: &'a Store,
    config: &'a ApiConfig,
}

impl<'a> Deserializer<'a> {
    pub fn new(store: &'a Store, config: &'a ApiConfig) -> Self {
        Self { store, config }
    }

    /// A new, unsaved instance of `model` from a creation document.
    ///
    /// # Errors
    /// Every problem found in the document; a client `id`, at the top level
    /// or among the attributes, is refused unless the collection allows
    /// client-generated ids.
    pub async fn deserialize(
        &self,
        document: &Value,
        model: &Model,
    ) -> Result<Instance, DeserializationErrors> {
        let data = resource_data(document)?;
        check_type(data, model, None)?;

        let allow_ids = self
            .config
            .resource(model.collection_name())
            .allow_client_generated_ids;
        if !allow_ids && key_attributes(data, model).next().is_some() {
            return Err(DeserializationError::ClientGeneratedIdNotAllowed.into());
        }

        let mut instance = Instance::new(model.collection_name());
        if let Some(id) = data.get("id") {
            if !allow_ids {
                return Err(DeserializationError::ClientGeneratedIdNotAllowed.into());
            }
            let field = model.primary_field();
            let key = id_text(id).and_then(|text| Scalar::parse_key(&text, field.kind));
            match key {
                Some(key) => instance.set(field.name.clone(), key),
                None => {
                    return Err(DeserializationError::InvalidAttribute {
                        field: field.name.clone(),
                        value: id.to_string(),
                    }
                    .into());
                }
            }
        }

        let mut errors = Vec::new();
        Self::apply_attributes(data, model, &mut instance, &mut errors);
        self.apply_relationships(data, model, &mut instance, &mut errors)
            .await?;

        for field in model.fields().iter().filter(|field| field.required) {
            if instance.get(&field.name).is_none_or(Scalar::is_null) {
                errors.push(DeserializationError::MissingAttribute(field.name.clone()));
            }
        }

        if errors.is_empty() {
            Ok(instance)
        } else {
            Err(DeserializationErrors(errors))
        }
    }

    /// `existing` with the attributes and relationships of an update
    /// document applied.
    ///
    /// # Errors
    /// Every problem found in the document; the document `id`, and any
    /// primary key among the attributes, must match `existing`.
    pub async fn deserialize_update(
        &self,
        document: &Value,
        existing: &Instance,
    ) -> Result<Instance, DeserializationErrors> {
        let model = self
            .store
            .schema()
            .model(existing.collection())
            .map_err(|err| DeserializationError::Malformed(err.to_string()))?;
        let data = resource_data(document)?;
        check_type(data, model, None)?;

        let expected = existing.id_string(model).unwrap_or_default();
        let given = data
            .get("id")
            .ok_or(DeserializationError::MissingId { relation: None })?;
        let given = id_text(given).unwrap_or_else(|| given.to_string());
        if given != expected {
            return Err(DeserializationError::ConflictingId { expected, given }.into());
        }

        for (field, value) in key_attributes(data, model) {
            let current = existing.get(&field.name).cloned().unwrap_or(Scalar::Null);
            let given = match value {
                Value::String(text) => Scalar::parse_key(text, field.kind),
                other => Scalar::coerce(other, field.kind).ok(),
            };
            if given.as_ref() != Some(&current) {
                return Err(DeserializationError::ConflictingId {
                    expected: current.to_string(),
                    given: id_text(value).unwrap_or_else(|| value.to_string()),
                }
                .into());
            }
        }

        let mut instance = existing.clone();
        let mut errors = Vec::new();
        Self::apply_attributes(data, model, &mut instance, &mut errors);
        self.apply_relationships(data, model, &mut instance, &mut errors)
            .await?;

        if errors.is_empty() {
            Ok(instance)
        } else {
            Err(DeserializationErrors(errors))
        }
    }

    /// Resolve the linkage of a relationship object, such as the body of a
    /// request to a relationship URL.
    ///
    /// # Errors
    /// Every bad identifier; database failures.
    pub async fn deserialize_linkage(
        &self,
        document: &Value,
        relationship: &Relationship,
    ) -> Result<Related, DeserializationErrors> {
        let mut errors = Vec::new();
        let related = self.linkage(document, relationship, &mut errors).await?;
        match related {
            Some(related) if errors.is_empty() => Ok(related),
            _ => Err(DeserializationErrors(errors)),
        }
    }

    fn apply_attributes(
        data: &Object,
        model: &Model,
        instance: &mut Instance,
        errors: &mut Vec<DeserializationError>,
    ) {
        let Some(attributes) = data.get("attributes") else {
            return;
        };
        let Some(attributes) = attributes.as_object() else {
            errors.push(DeserializationError::Malformed(
                "\"attributes\" element must be an object".to_string(),
            ));
            return;
        };
        for (name, value) in attributes {
            let Some(field) = model.find_field(name) else {
                errors.push(DeserializationError::UnknownAttribute(name.clone()));
                continue;
            };
            match Scalar::coerce(value, field.kind) {
                Ok(Scalar::Text(_))
                    if matches!(
                        field.kind,
                        FieldKind::Integer | FieldKind::Float | FieldKind::Boolean
                    ) =>
                {
                    errors.push(DeserializationError::InvalidAttribute {
                        field: name.clone(),
                        value: value.to_string(),
                    });
                }
                Ok(scalar) => instance.set(field.name.clone(), scalar),
                Err(err) => errors.push(DeserializationError::InvalidAttribute {
                    field: name.clone(),
                    value: err.value,
                }),
            }
        }
    }

    async fn apply_relationships(
        &self,
        data: &Object,
        model: &Model,
        instance: &mut Instance,
        errors: &mut Vec<DeserializationError>,
    ) -> Result<(), DeserializationErrors> {
        let Some(relationships) = data.get("relationships") else {
            return Ok(());
        };
        let Some(relationships) = relationships.as_object() else {
            errors.push(DeserializationError::Malformed(
                "\"relationships\" element must be an object".to_string(),
            ));
            return Ok(());
        };
        for (name, object) in relationships {
            let Some(relationship) = model.find_relationship(name) else {
                errors.push(DeserializationError::UnknownRelationship(name.clone()));
                continue;
            };
            let Some(related) = self.linkage(object, relationship, errors).await? else {
                continue;
            };
            if let (Join::ForeignKey { field }, Related::One(one)) = (&relationship.join, &related) {
                let target = self
                    .store
                    .schema()
                    .model(&relationship.target)
                    .map_err(|err| DeserializationError::Malformed(err.to_string()))?;
                let key = one
                    .as_ref()
                    .and_then(|other| other.get(&target.primary_field().name).cloned())
                    .unwrap_or(Scalar::Null);
                instance.set(field.clone(), key);
            }
            instance.assign(name.clone(), related);
        }
        Ok(())
    }

    /// The instances named by a relationship object; `None` when any
    /// identifier was bad, with the reasons pushed onto `errors`.
    async fn linkage(
        &self,
        object: &Value,
        relationship: &Relationship,
        errors: &mut Vec<DeserializationError>,
    ) -> Result<Option<Related>, DeserializationErrors> {
        let name = relationship.name.as_str();
        let target = self
            .store
            .schema()
            .model(&relationship.target)
            .map_err(|err| DeserializationError::Malformed(err.to_string()))?;
        let data = match data_of(object, Some(name)) {
            Ok(data) => data,
            Err(err) => {
                errors.push(err);
                return Ok(None);
            }
        };

        if relationship.to_many {
            let Some(items) = data.as_array() else {
                errors.push(DeserializationError::NotAList {
                    relation: name.to_string(),
                });
                return Ok(None);
            };
            let before = errors.len();
            let mut instances = Vec::with_capacity(items.len());
            for item in items {
                if let Some(instance) = self.identified(item, target, name, errors).await? {
                    instances.push(instance);
                }
            }
            Ok((errors.len() == before).then_some(Related::Many(instances)))
        } else if data.is_null() {
            Ok(Some(Related::One(None)))
        } else {
            let instance = self.identified(data, target, name, errors).await?;
            Ok(instance.map(|instance| Related::One(Some(instance))))
        }
    }

    /// The stored instance named by one resource identifier.
    async fn identified(
        &self,
        item: &Value,
        target: &Model,
        relation: &str,
        errors: &mut Vec<DeserializationError>,
    ) -> Result<Option<Instance>, DeserializationErrors> {
        let Some(identifier) = item.as_object() else {
            errors.push(DeserializationError::Malformed(format!(
                "linkage object for relationship \"{relation}\" must be an object"
            )));
            return Ok(None);
        };
        if let Err(err) = check_type(identifier, target, Some(relation)) {
            errors.push(err);
            return Ok(None);
        }
        let Some(id) = identifier.get("id").and_then(id_text) else {
            errors.push(DeserializationError::MissingId {
                relation: Some(relation.to_string()),
            });
            return Ok(None);
        };
        match self.store.get_by_primary_key(target, &id).await? {
            Some(instance) => Ok(Some(instance)),
            None => {
                errors.push(DeserializationError::NotFound {
                    kind: target.collection_name().to_string(),
                    id,
                    relation: Some(relation.to_string()),
                });
                Ok(None)
            }
        }
    }
}
