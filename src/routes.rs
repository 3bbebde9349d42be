//! Axum handlers for every collection of the schema.
//!
//! | Method | Path | |
//! |--------|------|-|
//! | GET | `/{collection}` | filtered, sorted, paginated collection |
//! | POST | `/{collection}` | create a resource |
//! | GET, PATCH, DELETE | `/{collection}/{id}` | one resource |
//! | GET | `/{collection}/{id}/{relation}` | related resource(s) |
//! | GET | `/{collection}/{id}/{relation}/{related_id}` | one member of a to-many relationship |
//! | GET | `/{collection}/{id}/relationships/{relation}` | relationship linkage |
//! | PATCH | `/{collection}/{id}/relationships/{relation}` | replace the linkage |
//! | POST, DELETE | `/{collection}/{id}/relationships/{relation}` | add or remove to-many members |
//! | GET | `/eval/{collection}?functions=[...]` | aggregate functions |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::{Document, JSONAPI_MIMETYPE, Linkage, PrimaryData};
use crate::errors::ApiError;
use crate::instance::{Instance, Related};
use crate::manager::ApiManager;
use crate::pagination::Pagination;
use crate::params::QueryParams;
use crate::query::Query as SelectQuery;
use crate::schema::{Model, Relationship};
use crate::serialization::{SerializationErrors, SerializeOptions};

type Shared = State<Arc<ApiManager>>;

pub fn router(manager: Arc<ApiManager>) -> Router {
    let prefix = manager.config().url_prefix.trim_end_matches('/').to_string();
    let routes = Router::new()
        .route("/eval/{collection}", get(evaluate))
        .route("/{collection}", get(get_collection).post(create_resource))
        .route(
            "/{collection}/{id}",
            get(get_resource)
                .patch(update_resource)
                .delete(delete_resource),
        )
        .route(
            "/{collection}/{id}/relationships/{relation}",
            get(get_relationship)
                .patch(replace_relationship)
                .post(add_to_relationship)
                .delete(remove_from_relationship),
        )
        .route("/{collection}/{id}/{relation}", get(get_related))
        .route(
            "/{collection}/{id}/{relation}/{related_id}",
            get(get_related_resource),
        )
        .with_state(manager);
    if prefix.is_empty() {
        routes
    } else {
        Router::new().nest(&prefix, routes)
    }
}

fn document_response(status: StatusCode, document: &impl Serialize) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, JSONAPI_MIMETYPE)],
        Json(document),
    )
        .into_response()
}

fn model_of<'m>(manager: &'m ApiManager, collection: &str) -> Result<&'m Model, ApiError> {
    manager
        .model(collection)
        .map_err(|_| ApiError::not_found(format!("collection \"{collection}\""), None))
}

fn relationship_of<'m>(
    manager: &'m ApiManager,
    model: &'m Model,
    relation: &str,
) -> Result<(&'m Relationship, &'m Model), ApiError> {
    manager
        .schema()
        .resolve_relationship(model, relation)
        .map_err(|_| ApiError::not_found(format!("relationship \"{relation}\""), None))
}

fn writable(manager: &ApiManager, collection: &str) -> Result<(), ApiError> {
    if manager.config().resource(collection).read_only {
        return Err(ApiError::method_not_allowed(format!(
            "collection \"{collection}\" is read-only"
        )));
    }
    Ok(())
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        tracing::debug!(error = %err, "Undecodable request body");
        ApiError::bad_request("Unable to decode data")
    })
}

async fn find(manager: &ApiManager, model: &Model, id: &str) -> Result<Instance, ApiError> {
    manager
        .store()
        .get_by_primary_key(model, id)
        .await?
        .ok_or_else(|| ApiError::not_found(model.collection_name(), Some(id.to_string())))
}

/// A page of `query` as a collection document with pagination links.
async fn paged(
    manager: &ApiManager,
    query: SelectQuery,
    params: &QueryParams,
    options: &SerializeOptions,
    url: String,
) -> Result<Response, ApiError> {
    let (number, size) = params.page()?;
    let page = Pagination::new(manager.config(), number, size)?;
    let total = manager.store().count(&query).await?;
    let instances = manager.store().all(&page.apply(query)).await?;

    let mut document = manager.serialize_many(&instances, options).await?;
    document.links = page.links(&url, total);
    document.links.insert("self".to_string(), url);
    document.meta.insert("total".to_string(), json!(total));
    Ok(document_response(StatusCode::OK, &document))
}

async fn get_collection(
    State(manager): Shared,
    Path(collection): Path<String>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    let params = QueryParams::from_uri(&uri)?;
    let search = params.search_params(manager.schema(), model)?;
    let options = params.serialize_options(manager.schema(), model)?;
    let query = manager.search(model, &search)?;

    if params.single()? {
        let instance = manager.store().one(&query).await?;
        let document = manager.serialize(&instance, &options).await?;
        return Ok(document_response(StatusCode::OK, &document));
    }
    let url = manager.config().url(&collection);
    paged(&manager, query, &params, &options, url).await
}

async fn create_resource(
    State(manager): Shared,
    Path(collection): Path<String>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    writable(&manager, &collection)?;
    let params = QueryParams::from_uri(&uri)?;
    let options = params.serialize_options(manager.schema(), model)?;

    let document = parse_body(&body)?;
    let instance = manager.deserialize(&document, model).await?;
    let saved = manager.store().insert(&instance).await?;
    tracing::debug!(collection = %collection, id = ?saved.id_string(model), "Created resource");

    let document = manager.serialize(&saved, &options).await?;
    let location = document
        .links
        .get("self")
        .and_then(|url| HeaderValue::from_str(url).ok());
    let mut response = document_response(StatusCode::CREATED, &document);
    if let Some(location) = location {
        response.headers_mut().insert(header::LOCATION, location);
    }
    Ok(response)
}

async fn get_resource(
    State(manager): Shared,
    Path((collection, id)): Path<(String, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    let params = QueryParams::from_uri(&uri)?;
    let options = params.serialize_options(manager.schema(), model)?;
    let instance = find(&manager, model, &id).await?;
    let document = manager.serialize(&instance, &options).await?;
    Ok(document_response(StatusCode::OK, &document))
}

async fn update_resource(
    State(manager): Shared,
    Path((collection, id)): Path<(String, String)>,
    uri: Uri,
    body: Bytes,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    writable(&manager, &collection)?;
    let params = QueryParams::from_uri(&uri)?;
    let options = params.serialize_options(manager.schema(), model)?;

    let existing = find(&manager, model, &id).await?;
    let document = parse_body(&body)?;
    let changed = manager.deserialize_update(&document, &existing).await?;
    let saved = manager.store().update(&changed).await?;
    let document = manager.serialize(&saved, &options).await?;
    Ok(document_response(StatusCode::OK, &document))
}

async fn delete_resource(
    State(manager): Shared,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    writable(&manager, &collection)?;
    let instance = find(&manager, model, &id).await?;
    manager.store().delete(&instance).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn get_related(
    State(manager): Shared,
    Path((collection, id, relation)): Path<(String, String, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    let (relationship, related_model) = relationship_of(&manager, model, &relation)?;
    let instance = find(&manager, model, &id).await?;
    let params = QueryParams::from_uri(&uri)?;
    let options = params.serialize_options(manager.schema(), related_model)?;
    let url = manager.config().url(&format!("{collection}/{id}/{relation}"));

    if relationship.to_many {
        let search = params.search_params(manager.schema(), related_model)?;
        let query = manager
            .search_relationship(&instance, &relation, &search)
            .await?;
        return paged(&manager, query, &params, &options, url).await;
    }

    let mut document = match manager.store().related(&instance, &relation).await? {
        Related::One(Some(related)) => manager.serialize(&related, &options).await?,
        _ => Document::new(PrimaryData::One(None)),
    };
    document.links.insert("self".to_string(), url);
    Ok(document_response(StatusCode::OK, &document))
}

async fn get_related_resource(
    State(manager): Shared,
    Path((collection, id, relation, related_id)): Path<(String, String, String, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    let (relationship, related_model) = relationship_of(&manager, model, &relation)?;
    if !relationship.to_many {
        return Err(ApiError::not_found(
            format!("to-many relationship \"{relation}\""),
            None,
        ));
    }
    let instance = find(&manager, model, &id).await?;
    let params = QueryParams::from_uri(&uri)?;
    let options = params.serialize_options(manager.schema(), related_model)?;

    let related = manager.store().related(&instance, &relation).await?;
    let found = related.instances().into_iter().find(|other| {
        other.id_string(related_model).as_deref() == Some(related_id.as_str())
    });
    let Some(found) = found else {
        return Err(ApiError::not_found(
            related_model.collection_name(),
            Some(related_id),
        ));
    };
    let document = manager.serialize(found, &options).await?;
    Ok(document_response(StatusCode::OK, &document))
}

async fn get_relationship(
    State(manager): Shared,
    Path((collection, id, relation)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    relationship_of(&manager, model, &relation)?;
    let instance = find(&manager, model, &id).await?;

    let serializer = manager.serializer();
    let linkage = match manager.store().related(&instance, &relation).await? {
        Related::One(one) => Linkage::One(
            one.map(|related| serializer.serialize_identifier(&related))
                .transpose()
                .map_err(SerializationErrors::from)?,
        ),
        Related::Many(many) => Linkage::Many(
            many.iter()
                .map(|related| serializer.serialize_identifier(related))
                .collect::<Result<Vec<_>, _>>()
                .map_err(SerializationErrors::from)?,
        ),
    };

    let mut document = Document::new(PrimaryData::Identifiers(linkage));
    document.links.insert(
        "self".to_string(),
        manager
            .config()
            .url(&format!("{collection}/{id}/relationships/{relation}")),
    );
    document.links.insert(
        "related".to_string(),
        manager.config().url(&format!("{collection}/{id}/{relation}")),
    );
    Ok(document_response(StatusCode::OK, &document))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkageChange {
    Replace,
    Add,
    Remove,
}

/// Apply a linkage document to one relationship of a stored resource.
async fn change_relationship(
    manager: &ApiManager,
    (collection, id, relation): (String, String, String),
    body: &Bytes,
    change: LinkageChange,
) -> Result<Response, ApiError> {
    let model = model_of(manager, &collection)?;
    writable(manager, &collection)?;
    let (relationship, related_model) = relationship_of(manager, model, &relation)?;
    if !relationship.to_many && change != LinkageChange::Replace {
        return Err(ApiError::method_not_allowed(format!(
            "relationship \"{relation}\" is to-one; use PATCH"
        )));
    }
    let mut instance = find(manager, model, &id).await?;
    let document = parse_body(body)?;
    let given = manager
        .deserializer()
        .deserialize_linkage(&document, relationship)
        .await?;

    let related = match change {
        LinkageChange::Replace => given,
        LinkageChange::Add | LinkageChange::Remove => {
            let key = |other: &Instance| other.id_string(related_model);
            let named: Vec<Option<String>> = given.instances().into_iter().map(key).collect();
            let current = manager.store().related(&instance, &relation).await?;
            let mut members: Vec<Instance> = current
                .instances()
                .into_iter()
                .filter(|other| change == LinkageChange::Add || !named.contains(&key(*other)))
                .cloned()
                .collect();
            if change == LinkageChange::Add {
                for other in given.instances() {
                    if !members.iter().any(|member| key(member) == key(other)) {
                        members.push(other.clone());
                    }
                }
            }
            Related::Many(members)
        }
    };

    instance.assign(relation.clone(), related);
    manager.store().update(&instance).await?;
    tracing::debug!(collection = %collection, id = %id, relation = %relation, ?change, "Changed relationship");
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn replace_relationship(
    State(manager): Shared,
    Path(path): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    change_relationship(&manager, path, &body, LinkageChange::Replace).await
}

async fn add_to_relationship(
    State(manager): Shared,
    Path(path): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    change_relationship(&manager, path, &body, LinkageChange::Add).await
}

async fn remove_from_relationship(
    State(manager): Shared,
    Path(path): Path<(String, String, String)>,
    body: Bytes,
) -> Result<Response, ApiError> {
    change_relationship(&manager, path, &body, LinkageChange::Remove).await
}

#[derive(Debug, Deserialize)]
struct FunctionParams {
    functions: Option<String>,
}

async fn evaluate(
    State(manager): Shared,
    Path(collection): Path<String>,
    Query(params): Query<FunctionParams>,
) -> Result<Response, ApiError> {
    let model = model_of(&manager, &collection)?;
    let Some(functions) = params.functions else {
        return Err(ApiError::bad_request(
            "Must provide `functions` query parameter",
        ));
    };
    let specs: Vec<Value> = serde_json::from_str(&functions).map_err(|err| {
        tracing::debug!(error = %err, "Undecodable functions parameter");
        ApiError::bad_request("Unable to decode JSON in `functions` query parameter")
    })?;
    let results = manager.evaluate_functions(model, &specs).await?;
    Ok(document_response(StatusCode::OK, &json!({"data": results})))
}
