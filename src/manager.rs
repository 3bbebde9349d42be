//! The application context shared by every request.

use std::sync::Arc;

use axum::Router;
use sea_orm::DatabaseConnection;
use serde_json::{Map, Value};

use crate::config::ApiConfig;
use crate::document::Document;
use crate::errors::ApiError;
use crate::filtering::{Operator, OperatorRegistry, Search, SearchError, SearchParams};
use crate::functions::{self, FunctionError};
use crate::instance::Instance;
use crate::query::Query;
use crate::schema::{LookupError, Model, Schema};
use crate::serialization::{
    DeserializationErrors, Deserializer, Hooks, ResourceHook, SerializationErrors, SerializeOptions,
    Serializer,
};
use crate::store::Store;

/// Owns everything needed to answer JSON API requests for one schema.
///
/// Configure it through `&mut self` (operators, hooks), then hand it to
/// [`ApiManager::router`], which shares it behind an `Arc`.
///
/// ```rust,ignore
/// let mut manager = ApiManager::new(db, schema).with_config(config);
/// manager.register_operator("starts_with", Operator::binary(|lhs, rhs| { /* ... */ }));
/// let app = manager.router();
/// ```
pub struct ApiManager {
    store: Store,
    registry: OperatorRegistry,
    config: ApiConfig,
    hooks: Hooks,
}

impl ApiManager {
    pub fn new(db: DatabaseConnection, schema: Schema) -> Self {
        Self {
            store: Store::new(db, Arc::new(schema)),
            registry: OperatorRegistry::new(),
            config: ApiConfig::default(),
            hooks: Hooks::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ApiConfig) -> Self {
        self.config = config;
        self
    }

    /// Add or replace a filter operator.
    pub fn register_operator(&mut self, name: impl Into<String>, operator: Operator) {
        self.registry.register(name, operator);
    }

    /// Run `hook` on every serialized resource of `collection`.
    pub fn register_hook(&mut self, collection: impl Into<String>, hook: impl ResourceHook + 'static) {
        self.hooks.insert(collection.into(), Arc::new(hook));
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn schema(&self) -> &Schema {
        self.store.schema()
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// # Errors
    /// Unregistered collections.
    pub fn model(&self, collection: &str) -> Result<&Model, LookupError> {
        self.schema().model(collection)
    }

    pub fn serializer(&self) -> Serializer<'_> {
        Serializer::new(&self.store, &self.config, &self.hooks)
    }

    pub fn deserializer(&self) -> Deserializer<'_> {
        Deserializer::new(&self.store, &self.config)
    }

    /// The filtered, sorted and grouped query over `model`.
    ///
    /// # Errors
    /// Invalid filters, sort or group fields.
    pub fn search(&self, model: &Model, params: &SearchParams) -> Result<Query, SearchError> {
        Search::new(self.schema(), &self.registry).build_query(model, params, None)
    }

    /// The query over the instances related to `instance` through
    /// `relationship`, further restricted by `params`.
    ///
    /// # Errors
    /// Invalid parameters, unknown relationships and database failures.
    pub async fn search_relationship(
        &self,
        instance: &Instance,
        relationship: &str,
        params: &SearchParams,
    ) -> Result<Query, ApiError> {
        let model = self.model(instance.collection()).map_err(SearchError::from)?;
        let keys = self.store.related_keys(instance, relationship).await?;
        Ok(Search::new(self.schema(), &self.registry).relationship_query(
            model,
            relationship,
            &keys,
            params,
        )?)
    }

    /// # Errors
    /// Every resource that failed to serialize.
    pub async fn serialize(
        &self,
        instance: &Instance,
        options: &SerializeOptions,
    ) -> Result<Document, SerializationErrors> {
        self.serializer().serialize(instance, options).await
    }

    /// # Errors
    /// Every resource that failed to serialize.
    pub async fn serialize_many(
        &self,
        instances: &[Instance],
        options: &SerializeOptions,
    ) -> Result<Document, SerializationErrors> {
        self.serializer().serialize_many(instances, options).await
    }

    /// # Errors
    /// Every problem of the document.
    pub async fn deserialize(
        &self,
        document: &Value,
        model: &Model,
    ) -> Result<Instance, DeserializationErrors> {
        self.deserializer().deserialize(document, model).await
    }

    /// # Errors
    /// Every problem of the document.
    pub async fn deserialize_update(
        &self,
        document: &Value,
        existing: &Instance,
    ) -> Result<Instance, DeserializationErrors> {
        self.deserializer()
            .deserialize_update(document, existing)
            .await
    }

    /// # Errors
    /// Malformed function objects and database failures.
    pub async fn evaluate_functions(
        &self,
        model: &Model,
        specs: &[Value],
    ) -> Result<Map<String, Value>, FunctionError> {
        functions::evaluate_functions(&self.store, model, specs).await
    }

    /// The JSON API routes for every collection of the schema.
    pub fn router(self) -> Router {
        crate::routes::router(Arc::new(self))
    }
}
