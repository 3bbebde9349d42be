//! # restcrate
//!
//! JSON API endpoints for relational models, on Axum and Sea-ORM.
//!
//! Describe the tables once as a [`Schema`], hand it a database connection and
//! serve the generated router:
//!
//! ```rust,ignore
//! use restcrate::{ApiManager, Field, Join, Model, Relationship, Schema};
//!
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
//!
//! let app = ApiManager::new(db, schema).router();
//! ```
//!
//! Clients then filter, sort, page and include:
//!
//! ```text
//! GET /person?filter[objects]=[{"name":"comments","op":"any","val":{"name":"content","op":"like","val":"%cool%"}}]
//! GET /person?sort=-birthday&page[size]=20&include=comments.author
//! GET /eval/person?functions=[{"name":"sum","field":"age"}]
//! ```
//!
//! ## Modules
//!
//! - [`schema`]: models, fields and relationships
//! - [`filtering`]: filter objects, operators and query building
//! - [`serialization`]: documents to and from instances
//! - [`store`]: query execution and persistence
//! - [`routes`]: the Axum handlers behind [`ApiManager::router`]

pub mod config;
pub mod dates;
pub mod document;
pub mod errors;
pub mod filtering;
pub mod functions;
pub mod instance;
pub mod manager;
pub mod pagination;
pub mod params;
pub mod query;
pub mod routes;
pub mod schema;
pub mod serialization;
pub mod store;

pub use config::{ApiConfig, ResourceConfig};
pub use document::{Document, ErrorDocument, JSONAPI_MIMETYPE, ResourceObject};
pub use errors::ApiError;
pub use filtering::{Filter, Operator, OperatorRegistry, Search, SearchParams, SortSpec};
pub use functions::{FunctionError, evaluate_functions};
pub use instance::{Instance, Related, Scalar};
pub use manager::ApiManager;
pub use params::QueryParams;
pub use query::Query;
pub use schema::{Field, FieldKind, Join, Model, Relationship, Schema};
pub use serialization::{Deserializer, ResourceHook, SerializeOptions, Serializer};
pub use store::Store;
