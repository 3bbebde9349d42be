//! # JSON API serialization
//!
//! [`Serializer`] turns instances into compound documents: attributes,
//! relationship linkage with `self`/`related` links, sparse fieldsets and
//! breadth-first includes without duplicates. [`Deserializer`] goes the other
//! way, resolving relationship linkage against the database and collecting
//! every problem of a document before giving up.

pub mod deserializer;
pub mod errors;
pub mod serializer;

pub use deserializer::Deserializer;
pub use errors::{
    DeserializationError, DeserializationErrors, SerializationError, SerializationErrors,
};
pub use serializer::{Hooks, ResourceHook, SerializeOptions, Serializer};
