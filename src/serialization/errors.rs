//! Failures of the serializer and deserializer.
//!
//! Both sides report every failure they meet instead of stopping at the
//! first one: a batch of resources, or a to-many linkage with several bad
//! identifiers, produces one error per offending item.

use std::fmt;

use axum::http::StatusCode;
use sea_orm::DbErr;
use thiserror::Error;

use crate::instance::Instance;

/// One instance that could not be turned into a resource object.
#[derive(Debug, Clone)]
pub struct SerializationError {
    pub instance: Instance,
    pub id: Option<String>,
    pub message: Option<String>,
    /// Whether the instance was headed for `included` rather than `data`
    pub included: bool,
}

impl SerializationError {
    pub fn new(instance: &Instance, message: impl Into<String>) -> Self {
        Self {
            instance: instance.clone(),
            id: None,
            message: Some(message.into()),
            included: false,
        }
    }

    /// An error without a specific message.
    pub fn for_instance(instance: &Instance) -> Self {
        Self {
            instance: instance.clone(),
            id: None,
            message: None,
            included: false,
        }
    }

    #[must_use]
    pub(crate) fn identified(mut self, id: Option<String>, included: bool) -> Self {
        if self.id.is_none() {
            self.id = id;
        }
        self.included = included;
        self
    }

    pub fn detail(&self) -> String {
        if let Some(message) = &self.message {
            return message.clone();
        }
        let what = if self.included {
            "included resource"
        } else {
            "resource"
        };
        format!(
            "Failed to serialize {what} of type {} and ID {}",
            self.instance.collection(),
            self.id.as_deref().unwrap_or("(none)")
        )
    }
}

impl fmt::Display for SerializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.detail())
    }
}

impl std::error::Error for SerializationError {}

/// Every serialization failure of one document.
#[derive(Debug, Clone, Error)]
#[error("{} resource(s) failed to serialize", .0.len())]
pub struct SerializationErrors(pub Vec<SerializationError>);

impl From<SerializationError> for SerializationErrors {
    fn from(err: SerializationError) -> Self {
        Self(vec![err])
    }
}

/// One problem with an inbound document.
#[derive(Debug, Error)]
pub enum DeserializationError {
    #[error("missing \"data\" element{}", in_relationship(.relation.as_deref()))]
    MissingData { relation: Option<String> },
    #[error("missing \"type\" element{}", in_relationship(.relation.as_deref()))]
    MissingType { relation: Option<String> },
    #[error("missing \"id\" element{}", in_relationship(.relation.as_deref()))]
    MissingId { relation: Option<String> },
    #[error("\"data\" element must be a list for to-many relationship \"{relation}\"")]
    NotAList { relation: String },
    #[error("Server does not allow client-generated IDS")]
    ClientGeneratedIdNotAllowed,
    #[error("expected type \"{expected}\" but got type \"{given}\"{}", in_relationship(.relation.as_deref()))]
    ConflictingType {
        expected: String,
        given: String,
        relation: Option<String>,
    },
    #[error("expected ID \"{expected}\" but got ID \"{given}\"")]
    ConflictingId { expected: String, given: String },
    #[error("model has no attribute \"{0}\"")]
    UnknownAttribute(String),
    #[error("model has no relationship \"{0}\"")]
    UnknownRelationship(String),
    #[error("invalid value {value} for attribute \"{field}\"")]
    InvalidAttribute { field: String, value: String },
    #[error("missing required attribute \"{0}\"")]
    MissingAttribute(String),
    #[error("No resource of type {kind} with ID {id}{}", in_relationship(.relation.as_deref()))]
    NotFound {
        kind: String,
        id: String,
        relation: Option<String>,
    },
    #[error("{0}")]
    Malformed(String),
    #[error("database error")]
    Database(#[from] DbErr),
}

fn in_relationship(relation: Option<&str>) -> String {
    relation
        .map(|name| format!(" in linkage object for relationship \"{name}\""))
        .unwrap_or_default()
}

impl DeserializationError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::ClientGeneratedIdNotAllowed => StatusCode::FORBIDDEN,
            Self::ConflictingType { .. } | Self::ConflictingId { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// The full client-facing message.
    pub fn message(&self) -> String {
        format!("Failed to deserialize object: {self}")
    }
}

/// Every deserialization failure of one document.
#[derive(Debug, Error)]
#[error("{}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct DeserializationErrors(pub Vec<DeserializationError>);

impl DeserializationErrors {
    /// The shared status of all errors, or 400 when they disagree.
    pub fn status(&self) -> StatusCode {
        let mut statuses = self.0.iter().map(DeserializationError::status);
        match statuses.next() {
            Some(first) if statuses.all(|status| status == first) => first,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeserializationError> {
        self.0.iter()
    }
}

impl From<DeserializationError> for DeserializationErrors {
    fn from(err: DeserializationError) -> Self {
        Self(vec![err])
    }
}

impl From<DbErr> for DeserializationErrors {
    fn from(err: DbErr) -> Self {
        Self(vec![DeserializationError::Database(err)])
    }
}
