//! # HTTP error responses
//!
//! Every failure of a request ends up as an [`ApiError`], which renders as a
//! JSON API error document:
//!
//! ```json
//! {"errors": [{"status": "400", "title": "Bad Request", "detail": "..."}], "jsonapi": {"version": "1.0"}}
//! ```
//!
//! Database errors are logged through `tracing` and replaced by a generic
//! message; their text never reaches the client.
//!
//! ```rust,ignore
//! async fn handler() -> Result<Response, ApiError> {
//!     let instance = store
//!         .get_by_primary_key(model, &id)
//!         .await?
//!         .ok_or_else(|| ApiError::not_found(model.collection_name(), Some(id)))?;
//!     // ...
//! }
//! ```

use std::fmt;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};

use crate::document::{ErrorDocument, ErrorObject, JSONAPI_MIMETYPE};
use crate::filtering::SearchError;
use crate::functions::FunctionError;
use crate::params::ParamsError;
use crate::serialization::{DeserializationError, DeserializationErrors, SerializationErrors};
use crate::store::FetchError;

const DATABASE_MESSAGE: &str = "A database error occurred";

#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found - no such resource
    NotFound {
        /// Collection name
        resource: String,
        id: Option<String>,
    },

    /// 400 Bad Request - malformed parameters or filters
    BadRequest { message: String },

    /// 405 Method Not Allowed
    MethodNotAllowed { message: String },

    /// 409 Conflict - duplicate key
    Conflict { message: String },

    /// One error object per problem of an inbound document
    Deserialization(DeserializationErrors),

    /// 500 Internal Server Error - one error object per failed resource
    Serialization(SerializationErrors),

    /// 500 Internal Server Error - database error (details logged, not exposed)
    Database {
        message: String,
        internal: DbErr,
    },

    /// 500 Internal Server Error - anything else
    Internal {
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    // ============================================================================
    // Constructors
    // ============================================================================

    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// A 500 whose database details are only logged.
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: DATABASE_MESSAGE.to_string(),
            internal: err,
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    // ============================================================================
    // Rendering
    // ============================================================================

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Deserialization(errors) => errors.status(),
            Self::Serialization(_) | Self::Database { .. } | Self::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("No resource of type {resource} with ID {id}"),
                None => format!("No {resource} found"),
            },
            Self::BadRequest { message }
            | Self::MethodNotAllowed { message }
            | Self::Conflict { message }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message.clone(),
            Self::Deserialization(errors) => errors
                .iter()
                .map(deserialization_detail)
                .collect::<Vec<_>>()
                .join("; "),
            Self::Serialization(errors) => errors
                .0
                .iter()
                .map(|err| err.detail())
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// The `errors` member of the response document.
    pub fn error_objects(&self) -> Vec<ErrorObject> {
        let object = |status: StatusCode, detail: String| {
            let title = status.canonical_reason().unwrap_or_default();
            ErrorObject::new(status.as_u16(), detail).with_title(title)
        };
        match self {
            Self::Deserialization(errors) => errors
                .iter()
                .map(|err| object(err.status(), deserialization_detail(err)))
                .collect(),
            Self::Serialization(errors) => errors
                .0
                .iter()
                .map(|err| object(StatusCode::INTERNAL_SERVER_ERROR, err.detail()))
                .collect(),
            _ => vec![object(self.status_code(), self.user_message())],
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            Self::Deserialization(errors) => {
                for err in errors.iter() {
                    if let DeserializationError::Database(internal) = err {
                        tracing::error!(error = ?internal, "Database error occurred");
                    }
                }
                tracing::debug!(error = %self.user_message(), status = %self.status_code(), "API error");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

fn deserialization_detail(err: &DeserializationError) -> String {
    match err {
        DeserializationError::Database(_) => DATABASE_MESSAGE.to_string(),
        other => other.message(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        let status = self.status_code();
        let document = ErrorDocument::new(self.error_objects());
        (
            status,
            [(header::CONTENT_TYPE, JSONAPI_MIMETYPE)],
            Json(document),
        )
            .into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// Conversions
// ============================================================================

/// `RecordNotFound` becomes a 404, a unique constraint violation a 409 and
/// every other database error a logged 500.
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            tracing::debug!(detail = %detail, "Unique constraint violation");
            return Self::conflict("Duplicate entry");
        }
        match err {
            DbErr::RecordNotFound(resource) => Self::not_found(resource, None),
            err => Self::database(err),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NoResult => Self::NotFound {
                resource: "result".to_string(),
                id: None,
            },
            FetchError::MultipleResults => Self::bad_request("Multiple results found"),
            FetchError::Database(err) => Self::from(err),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<ParamsError> for ApiError {
    fn from(err: ParamsError) -> Self {
        Self::bad_request(err.to_string())
    }
}

impl From<FunctionError> for ApiError {
    fn from(err: FunctionError) -> Self {
        match err {
            FunctionError::Database(err) => Self::database(err),
            err => Self::bad_request(err.to_string()),
        }
    }
}

impl From<DeserializationErrors> for ApiError {
    fn from(errors: DeserializationErrors) -> Self {
        Self::Deserialization(errors)
    }
}

impl From<SerializationErrors> for ApiError {
    fn from(errors: SerializationErrors) -> Self {
        Self::Serialization(errors)
    }
}
