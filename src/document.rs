//! JSON API document shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

pub const JSONAPI_VERSION: &str = "1.0";
pub const JSONAPI_MIMETYPE: &str = "application/vnd.api+json";

pub type Links = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonApi {
    pub version: String,
}

impl Default for JsonApi {
    fn default() -> Self {
        Self {
            version: JSONAPI_VERSION.to_string(),
        }
    }
}

/// `{"type": ..., "id": ...}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

/// Relationship data: `null`, one identifier, or a list of identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    Many(Vec<ResourceIdentifier>),
    One(Option<ResourceIdentifier>),
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipObject {
    pub data: Linkage,
    pub links: Option<Links>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipObject>,
    pub links: Option<Links>,
}

impl ResourceObject {
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier {
            kind: self.kind.clone(),
            id: self.id.clone(),
        }
    }
}

/// Primary data: one resource (or `null`), or a list of resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    Many(Vec<ResourceObject>),
    One(Option<Box<ResourceObject>>),
    Identifiers(Linkage),
}

/// A successful top-level document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub data: PrimaryData,
    #[serde(default)]
    pub included: Vec<ResourceObject>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub meta: Map<String, Value>,
    #[serde(default)]
    pub jsonapi: JsonApi,
}

impl Document {
    pub fn new(data: PrimaryData) -> Self {
        Self {
            data,
            included: Vec::new(),
            links: Links::new(),
            meta: Map::new(),
            jsonapi: JsonApi::default(),
        }
    }

    /// The primary resources, whether data is one resource or many.
    pub fn resources(&self) -> Vec<&ResourceObject> {
        match &self.data {
            PrimaryData::Many(resources) => resources.iter().collect(),
            PrimaryData::One(one) => one.iter().map(AsRef::as_ref).collect(),
            PrimaryData::Identifiers(_) => Vec::new(),
        }
    }
}

/// The `source` member of an error object.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    pub pointer: Option<String>,
    pub parameter: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub id: Option<String>,
    pub status: Option<String>,
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
    pub source: Option<ErrorSource>,
    pub meta: Option<Map<String, Value>>,
}

impl ErrorObject {
    pub fn new(status: u16, detail: impl Into<String>) -> Self {
        Self {
            status: Some(status.to_string()),
            detail: Some(detail.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// `{"errors": [...], "jsonapi": {...}}`; never carries `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDocument {
    pub errors: Vec<ErrorObject>,
    #[serde(default)]
    pub jsonapi: JsonApi,
}

impl ErrorDocument {
    pub fn new(errors: Vec<ErrorObject>) -> Self {
        Self {
            errors,
            jsonapi: JsonApi::default(),
        }
    }
}
