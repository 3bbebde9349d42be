//! Runtime model registry.
//!
//! Models are described once at startup and registered in a [`Schema`]. Every
//! other part of the crate resolves field names, relationship names and
//! primary keys through this registry instead of through generated code.
//!
//! ```rust,ignore
//! let schema = Schema::builder()
//!     .model(
//!         Model::new("person", "people")
//!             .field(Field::integer("id"))
//!             .field(Field::text("name").required())
//!             .field(Field::date("birthday"))
//!             .relationship(Relationship::to_many("comments", "comment", Join::reverse("author_id"))),
//!     )
//!     .model(
//!         Model::new("comment", "comments")
//!             .field(Field::integer("id"))
//!             .field(Field::text("content"))
//!             .field(Field::integer("author_id"))
//!             .relationship(Relationship::to_one("author", "person", Join::foreign_key("author_id"))),
//!     )
//!     .build()?;
//! ```

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

/// The storage kind of a scalar field.
///
/// Date and time kinds drive literal coercion when filtering and
/// deserializing, and ISO-8601 rendering when serializing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Integer,
    Float,
    Text,
    Boolean,
    Date,
    DateTime,
    /// Timestamp with a UTC offset
    DateTimeTz,
    Time,
    Uuid,
    Json,
}

impl FieldKind {
    /// Whether string literals for this kind go through the date parser.
    #[must_use]
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date | Self::DateTime | Self::DateTimeTz | Self::Time
        )
    }
}

/// A scalar attribute of a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    /// Must be supplied when a new instance is deserialized
    pub required: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            required: false,
        }
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn uuid(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Uuid)
    }

    /// Store the field under a column name different from its API name.
    #[must_use]
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// How two tables are connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    /// `field` on the owning model holds the related model's primary key.
    ForeignKey { field: String },
    /// `field` on the related model holds the owning model's primary key.
    Reverse { field: String },
    /// Association table holding one column for each side.
    Secondary {
        table: String,
        owner_column: String,
        related_column: String,
    },
}

impl Join {
    pub fn foreign_key(field: impl Into<String>) -> Self {
        Self::ForeignKey {
            field: field.into(),
        }
    }

    pub fn reverse(field: impl Into<String>) -> Self {
        Self::Reverse {
            field: field.into(),
        }
    }

    pub fn secondary(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        related_column: impl Into<String>,
    ) -> Self {
        Self::Secondary {
            table: table.into(),
            owner_column: owner_column.into(),
            related_column: related_column.into(),
        }
    }
}

/// A named link from one model to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub name: String,
    /// Collection name of the related model
    pub target: String,
    pub to_many: bool,
    pub join: Join,
}

impl Relationship {
    pub fn to_one(name: impl Into<String>, target: impl Into<String>, join: Join) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many: false,
            join,
        }
    }

    pub fn to_many(name: impl Into<String>, target: impl Into<String>, join: Join) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            to_many: true,
            join,
        }
    }
}

/// An entity type exposed through the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    collection: String,
    table: String,
    primary_key: Vec<String>,
    fields: Vec<Field>,
    relationships: Vec<Relationship>,
}

impl Model {
    /// A model with no fields; the primary key defaults to `id`.
    pub fn new(collection: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            table: table.into(),
            primary_key: vec!["id".to_string()],
            fields: Vec::new(),
            relationships: Vec::new(),
        }
    }

    #[must_use]
    pub fn primary_key(mut self, name: impl Into<String>) -> Self {
        self.primary_key = vec![name.into()];
        self
    }

    #[must_use]
    pub fn composite_primary_key<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_key = names.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    #[must_use]
    pub fn relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// The JSON API `type` of this model's resources.
    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key_names(&self) -> &[String] {
        &self.primary_key
    }

    /// The first primary key field; relationships join on this one. Falls
    /// back to the first field when the key names no field.
    ///
    /// # Panics
    /// On a model without fields. [`SchemaBuilder::build`] refuses those, so
    /// only models used outside a [`Schema`] can reach this.
    pub fn primary_field(&self) -> &Field {
        self.primary_key
            .first()
            .and_then(|name| self.find_field(name))
            .unwrap_or(&self.fields[0])
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn find_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn find_relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|rel| rel.name == name)
    }

    /// Resolve a field by name.
    ///
    /// # Errors
    /// `LookupError::NoSuchField` when the model has no such field.
    pub fn field_named(&self, name: &str) -> Result<&Field, LookupError> {
        self.find_field(name).ok_or_else(|| LookupError::NoSuchField {
            model: self.collection.clone(),
            field: name.to_string(),
        })
    }

    /// Resolve a relationship by name.
    ///
    /// # Errors
    /// `LookupError::NoSuchRelationship` when the model has no such relationship.
    pub fn relationship_named(&self, name: &str) -> Result<&Relationship, LookupError> {
        self.find_relationship(name)
            .ok_or_else(|| LookupError::NoSuchRelationship {
                model: self.collection.clone(),
                relationship: name.to_string(),
            })
    }

    pub fn is_primary_key(&self, name: &str) -> bool {
        self.primary_key.iter().any(|pk| pk == name)
    }

    /// Fields that hold the key of a to-one relationship on this table.
    ///
    /// These are hidden from serialized attributes; the relationship
    /// linkage carries the same information.
    pub fn foreign_key_fields(&self) -> BTreeSet<&str> {
        self.relationships
            .iter()
            .filter_map(|rel| match &rel.join {
                Join::ForeignKey { field } if !self.is_primary_key(field) => Some(field.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Failure to resolve a name against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no model with collection name \"{0}\"")]
    NoSuchModel(String),
    #[error("no such field \"{field}\" on \"{model}\"")]
    NoSuchField { model: String, field: String },
    #[error("no such relationship \"{relationship}\" on \"{model}\"")]
    NoSuchRelationship { model: String, relationship: String },
    #[error("invalid schema: {0}")]
    Invalid(String),
}

/// The registry of every model exposed through the API.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, Model>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Find the model registered under a collection name.
    ///
    /// # Errors
    /// `LookupError::NoSuchModel` for unknown collection names.
    pub fn model(&self, collection: &str) -> Result<&Model, LookupError> {
        self.models
            .get(collection)
            .ok_or_else(|| LookupError::NoSuchModel(collection.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    /// The model on the other side of `relationship`, and whether it is to-many.
    ///
    /// # Errors
    /// Returns a lookup error if either the relationship or its target is unknown.
    pub fn resolve_relationship<'s>(
        &'s self,
        model: &'s Model,
        relationship: &str,
    ) -> Result<(&'s Relationship, &'s Model), LookupError> {
        let rel = model.relationship_named(relationship)?;
        Ok((rel, self.model(&rel.target)?))
    }
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    models: Vec<Model>,
}

impl SchemaBuilder {
    #[must_use]
    pub fn model(mut self, model: Model) -> Self {
        self.models.push(model);
        self
    }

    /// Validate cross references and freeze the registry.
    ///
    /// # Errors
    /// `LookupError::Invalid` for duplicate collections, empty models or
    /// primary keys that are not fields; `NoSuchModel`/`NoSuchField` for
    /// relationships pointing at unknown models or fields.
    pub fn build(self) -> Result<Schema, LookupError> {
        let mut models = BTreeMap::new();
        for model in self.models {
            if model.fields.is_empty() {
                return Err(LookupError::Invalid(format!(
                    "model \"{}\" has no fields",
                    model.collection
                )));
            }
            for pk in &model.primary_key {
                model.field_named(pk)?;
            }
            let collection = model.collection.clone();
            if models.insert(collection.clone(), model).is_some() {
                return Err(LookupError::Invalid(format!(
                    "collection \"{collection}\" registered twice"
                )));
            }
        }

        let schema = Schema { models };
        for model in schema.models.values() {
            for rel in &model.relationships {
                let target = schema.model(&rel.target)?;
                match &rel.join {
                    Join::ForeignKey { field } => {
                        model.field_named(field)?;
                    }
                    Join::Reverse { field } => {
                        target.field_named(field)?;
                    }
                    Join::Secondary { .. } => {}
                }
            }
        }
        Ok(schema)
    }
}
