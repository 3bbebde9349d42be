use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use restcrate::{ApiConfig, ApiManager, JSONAPI_MIMETYPE, ResourceConfig};
use serde_json::{Value, json};

mod common;
use common::{
    article, body_json, comment, get, person, send, setup_manager, setup_manager_with_config, tag,
};

async fn seeded() -> ApiManager {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let mary = person(store, "Mary", 19).await;
    person(store, "Lucy", 25).await;
    comment(store, "first", &lincoln).await;
    comment(store, "second", &lincoln).await;
    comment(store, "third", &mary).await;
    manager
}

fn with_body(method: &str, uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, JSONAPI_MIMETYPE)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn ids(document: &Value) -> Vec<String> {
    document["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|resource| resource["id"].as_str().unwrap().to_string())
        .collect()
}

async fn linkage(app: &Router, uri: &str) -> Vec<String> {
    ids(&body_json(get(app, uri).await).await)
}

async fn error_detail(app: &Router, uri: &str, status: StatusCode) -> String {
    let response = get(app, uri).await;
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["status"], json!(status.as_str()));
    body["errors"][0]["detail"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_get_collection() {
    let app = seeded().await.router();

    let response = get(&app, "/person").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], JSONAPI_MIMETYPE);

    let body = body_json(response).await;
    assert_eq!(ids(&body), vec!["1", "2", "3"]);
    assert_eq!(body["meta"]["total"], json!(3));
    assert_eq!(body["links"]["self"], json!("/person"));
    assert_eq!(
        body["links"]["first"],
        json!("/person?page[number]=1&page[size]=10")
    );
    assert!(body["links"].get("next").is_none());
    assert_eq!(body["jsonapi"]["version"], json!("1.0"));
    assert_eq!(body["data"][0]["type"], json!("person"));
    assert_eq!(body["data"][0]["attributes"]["name"], json!("Lincoln"));
}

#[tokio::test]
async fn test_pagination() {
    let manager = setup_manager().await;
    for index in 0..25 {
        person(manager.store(), &format!("Person {index}"), index).await;
    }
    let app = manager.router();

    let response = get(&app, "/person?page%5Bnumber%5D=2&page%5Bsize%5D=10").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let page = ids(&body);
    assert_eq!(page.len(), 10);
    assert_eq!(page[0], "11");
    assert_eq!(body["meta"]["total"], json!(25));
    assert_eq!(
        body["links"]["prev"],
        json!("/person?page[number]=1&page[size]=10")
    );
    assert_eq!(
        body["links"]["next"],
        json!("/person?page[number]=3&page[size]=10")
    );
    assert_eq!(
        body["links"]["last"],
        json!("/person?page[number]=3&page[size]=10")
    );

    let body = body_json(get(&app, "/person?page%5Bsize%5D=0").await).await;
    assert_eq!(ids(&body).len(), 25);

    let detail = error_detail(&app, "/person?page%5Bnumber%5D=0", StatusCode::BAD_REQUEST).await;
    assert!(detail.contains("page[number]"));
}

#[tokio::test]
async fn test_filter_objects_and_sort() {
    let app = seeded().await.router();
    let filters = url_escape::encode_component(r#"[{"name":"age","op":"lt","val":25}]"#);

    let body = body_json(get(&app, &format!("/person?filter%5Bobjects%5D={filters}&sort=-age")).await).await;
    assert_eq!(ids(&body), vec!["1", "2"]);
    assert_eq!(body["meta"]["total"], json!(2));

    let body = body_json(get(&app, "/person?sort=age").await).await;
    assert_eq!(ids(&body), vec!["2", "1", "3"]);

    let body = body_json(get(&app, "/person?filter%5Bname%5D=Mary,Lucy").await).await;
    assert_eq!(ids(&body), vec!["2", "3"]);

    let body = body_json(get(&app, "/comment?filter%5Bauthor%5D=2").await).await;
    assert_eq!(ids(&body), vec!["3"]);
}

#[tokio::test]
async fn test_bad_filters() {
    let app = seeded().await.router();

    let filters = url_escape::encode_component(r#"[{"name":"bogus","op":"eq","val":1}]"#);
    let detail = error_detail(
        &app,
        &format!("/person?filter%5Bobjects%5D={filters}"),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(detail.contains("bogus"));

    let detail = error_detail(
        &app,
        &format!("/person?filter%5Bobjects%5D={}", url_escape::encode_component("{not json")),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert!(detail.starts_with("Unable to decode data for parameter filter[objects]"));

    let filters = url_escape::encode_component(r#"[{"name":"age","op":"eq","val":null}]"#);
    let detail = error_detail(
        &app,
        &format!("/person?filter%5Bobjects%5D={filters}"),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(
        detail,
        "To compare a value to NULL, use the unary is_null/is_not_null operators."
    );
}

#[tokio::test]
async fn test_filter_single() {
    let app = seeded().await.router();

    let filters = url_escape::encode_component(r#"[{"name":"name","op":"eq","val":"Mary"}]"#);
    let response = get(
        &app,
        &format!("/person?filter%5Bobjects%5D={filters}&filter%5Bsingle%5D=1"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], json!("2"));

    let filters = url_escape::encode_component(r#"[{"name":"name","op":"eq","val":"Nobody"}]"#);
    let response = get(
        &app,
        &format!("/person?filter%5Bobjects%5D={filters}&filter%5Bsingle%5D=1"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(&app, "/person?filter%5Bsingle%5D=1").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_resource_with_include_and_fields() {
    let app = seeded().await.router();

    let response = get(&app, "/person/1?include=comments&fields%5Bperson%5D=name,comments").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], json!("1"));
    assert_eq!(body["data"]["attributes"], json!({"name": "Lincoln"}));
    assert_eq!(
        body["data"]["relationships"]["comments"]["data"],
        json!([{"type": "comment", "id": "1"}, {"type": "comment", "id": "2"}])
    );
    assert_eq!(body["included"].as_array().unwrap().len(), 2);
    assert_eq!(body["links"]["self"], json!("/person/1"));

    let detail = error_detail(&app, "/person/1?include=bogus", StatusCode::BAD_REQUEST).await;
    assert_eq!(detail, "Invalid include \"bogus\"");
}

#[tokio::test]
async fn test_missing_resources() {
    let app = seeded().await.router();

    let detail = error_detail(&app, "/person/99", StatusCode::NOT_FOUND).await;
    assert_eq!(detail, "No resource of type person with ID 99");

    let detail = error_detail(&app, "/bogus", StatusCode::NOT_FOUND).await;
    assert_eq!(detail, "No collection \"bogus\" found");

    let response = get(&app, "/person/1/bogus").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_create_resource() {
    let app = seeded().await.router();
    let document = json!({
        "data": {
            "type": "comment",
            "attributes": {"content": "fourth"},
            "relationships": {"author": {"data": {"type": "person", "id": "3"}}}
        }
    });

    let response = send(&app, with_body("POST", "/comment", &document)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[header::LOCATION], "/comment/4");
    let body = body_json(response).await;
    assert_eq!(body["data"]["id"], json!("4"));
    assert_eq!(body["data"]["attributes"]["content"], json!("fourth"));
    assert_eq!(
        body["data"]["relationships"]["author"]["data"],
        json!({"type": "person", "id": "3"})
    );

    let body = body_json(get(&app, "/person/3/comments").await).await;
    assert_eq!(ids(&body), vec!["4"]);
}

#[tokio::test]
async fn test_create_errors() {
    let app = seeded().await.router();

    let with_id = json!({"data": {"type": "person", "id": "10", "attributes": {"name": "X"}}});
    let response = send(&app, with_body("POST", "/person", &with_id)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let key_attribute = json!({"data": {"type": "person", "attributes": {"id": 42, "name": "Sneaky"}}});
    let response = send(&app, with_body("POST", "/person", &key_attribute)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = get(&app, "/person/42").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let missing = json!({
        "data": {
            "type": "person",
            "attributes": {"name": "X"},
            "relationships": {"comments": {"data": [
                {"type": "comment", "id": "41"},
                {"type": "comment", "id": "42"}
            ]}}
        }
    });
    let response = send(&app, with_body("POST", "/person", &missing)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["errors"].as_array().unwrap().len(), 2);

    let request = Request::builder()
        .method("POST")
        .uri("/person")
        .body(Body::from("{not json"))
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["detail"], json!("Unable to decode data"));
}

#[tokio::test]
async fn test_failed_create_leaves_no_row() {
    let manager = seeded().await;
    tag(manager.store(), "history", Vec::new()).await;
    let app = manager.router();

    let document = json!({
        "data": {
            "type": "article",
            "attributes": {"title": "Gettysburg"},
            "relationships": {"tags": {"data": [
                {"type": "tag", "id": "1"},
                {"type": "tag", "id": "1"}
            ]}}
        }
    });
    let response = send(&app, with_body("POST", "/article", &document)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let body = body_json(get(&app, "/article").await).await;
    assert!(ids(&body).is_empty());
    let body = body_json(get(&app, "/tag/1/articles").await).await;
    assert!(ids(&body).is_empty());
}

#[tokio::test]
async fn test_update_resource() {
    let app = seeded().await.router();

    let document = json!({"data": {"type": "person", "id": "2", "attributes": {"age": 20}}});
    let response = send(&app, with_body("PATCH", "/person/2", &document)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["attributes"]["age"], json!(20));
    assert_eq!(body["data"]["attributes"]["name"], json!("Mary"));

    let conflicting = json!({"data": {"type": "person", "id": "1", "attributes": {"age": 20}}});
    let response = send(&app, with_body("PATCH", "/person/2", &conflicting)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let moved = json!({"data": {"type": "person", "id": "2", "attributes": {"id": 42}}});
    let response = send(&app, with_body("PATCH", "/person/2", &moved)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(get(&app, "/person/42").await.status(), StatusCode::NOT_FOUND);

    let response = send(&app, with_body("PATCH", "/person/99", &document)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_resource() {
    let app = seeded().await.router();

    let request = Request::builder()
        .method("DELETE")
        .uri("/person/3")
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(get(&app, "/person/3").await.status(), StatusCode::NOT_FOUND);
    let body = body_json(get(&app, "/person").await).await;
    assert_eq!(body["meta"]["total"], json!(2));
}

#[tokio::test]
async fn test_read_only_collections() {
    let config = ApiConfig::default().with_resource(
        "person",
        ResourceConfig {
            read_only: true,
            ..ResourceConfig::default()
        },
    );
    let manager = setup_manager_with_config(config).await;
    person(manager.store(), "Lincoln", 23).await;
    let app = manager.router();

    let document = json!({"data": {"type": "person", "attributes": {"name": "Mary"}}});
    let response = send(&app, with_body("POST", "/person", &document)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::builder()
        .method("DELETE")
        .uri("/person/1")
        .body(Body::empty())
        .unwrap();
    assert_eq!(send(&app, request).await.status(), StatusCode::METHOD_NOT_ALLOWED);

    let linkage = json!({"data": []});
    let response = send(&app, with_body("PATCH", "/person/1/relationships/comments", &linkage)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    assert_eq!(get(&app, "/person/1").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_related_endpoints() {
    let manager = seeded().await;
    manager
        .store()
        .insert(&restcrate::Instance::new("comment").with("content", "orphan"))
        .await
        .unwrap();
    let app = manager.router();

    let body = body_json(get(&app, "/person/1/comments").await).await;
    assert_eq!(ids(&body), vec!["1", "2"]);
    assert_eq!(body["meta"]["total"], json!(2));
    assert_eq!(body["links"]["self"], json!("/person/1/comments"));

    let filters = url_escape::encode_component(r#"[{"name":"content","op":"eq","val":"second"}]"#);
    let body = body_json(get(&app, &format!("/person/1/comments?filter%5Bobjects%5D={filters}")).await).await;
    assert_eq!(ids(&body), vec!["2"]);

    let body = body_json(get(&app, "/person/3/comments").await).await;
    assert_eq!(body["data"], json!([]));
    assert_eq!(body["meta"]["total"], json!(0));

    let body = body_json(get(&app, "/comment/3/author").await).await;
    assert_eq!(body["data"]["id"], json!("2"));
    assert_eq!(body["data"]["attributes"]["name"], json!("Mary"));

    let body = body_json(get(&app, "/comment/4/author").await).await;
    assert_eq!(body["data"], Value::Null);

    let body = body_json(get(&app, "/person/1/comments/2").await).await;
    assert_eq!(body["data"]["attributes"]["content"], json!("second"));

    let response = get(&app, "/person/1/comments/3").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_relationship_linkage() {
    let app = seeded().await.router();

    let body = body_json(get(&app, "/person/1/relationships/comments").await).await;
    assert_eq!(
        body["data"],
        json!([{"type": "comment", "id": "1"}, {"type": "comment", "id": "2"}])
    );
    assert_eq!(
        body["links"]["self"],
        json!("/person/1/relationships/comments")
    );
    assert_eq!(body["links"]["related"], json!("/person/1/comments"));

    let body = body_json(get(&app, "/comment/1/relationships/author").await).await;
    assert_eq!(body["data"], json!({"type": "person", "id": "1"}));
}

#[tokio::test]
async fn test_change_to_many_relationship() {
    let app = seeded().await.router();

    let third = json!({"data": [{"type": "comment", "id": "3"}]});
    let response = send(&app, with_body("PATCH", "/person/1/relationships/comments", &third)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(linkage(&app, "/person/1/relationships/comments").await, vec!["3"]);
    assert!(linkage(&app, "/person/2/relationships/comments").await.is_empty());

    let first_and_third = json!({"data": [
        {"type": "comment", "id": "1"},
        {"type": "comment", "id": "3"}
    ]});
    let response = send(&app, with_body("POST", "/person/1/relationships/comments", &first_and_third)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(linkage(&app, "/person/1/relationships/comments").await, vec!["1", "3"]);

    let response = send(&app, with_body("DELETE", "/person/1/relationships/comments", &third)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(linkage(&app, "/person/1/relationships/comments").await, vec!["1"]);
    let body = body_json(get(&app, "/comment/3/relationships/author").await).await;
    assert_eq!(body["data"], Value::Null);

    let missing = json!({"data": [{"type": "comment", "id": "99"}]});
    let response = send(&app, with_body("POST", "/person/1/relationships/comments", &missing)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(linkage(&app, "/person/1/relationships/comments").await, vec!["1"]);
}

#[tokio::test]
async fn test_change_secondary_relationship() {
    let manager = seeded().await;
    let store = manager.store();
    let lincoln = store
        .get_by_primary_key(manager.model("person").unwrap(), "1")
        .await
        .unwrap()
        .unwrap();
    article(store, "Gettysburg", &lincoln).await;
    tag(store, "history", Vec::new()).await;
    tag(store, "speeches", Vec::new()).await;
    let app = manager.router();

    let both = json!({"data": [{"type": "tag", "id": "1"}, {"type": "tag", "id": "2"}]});
    let response = send(&app, with_body("POST", "/article/1/relationships/tags", &both)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = send(&app, with_body("POST", "/article/1/relationships/tags", &both)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = body_json(get(&app, "/article/1/relationships/tags").await).await;
    assert_eq!(ids(&body), vec!["1", "2"]);

    let history = json!({"data": [{"type": "tag", "id": "1"}]});
    let response = send(&app, with_body("DELETE", "/article/1/relationships/tags", &history)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = body_json(get(&app, "/tag/2/articles").await).await;
    assert_eq!(ids(&body), vec!["1"]);
    let body = body_json(get(&app, "/tag/1/articles").await).await;
    assert!(ids(&body).is_empty());
}

#[tokio::test]
async fn test_change_to_one_relationship() {
    let app = seeded().await.router();

    let lucy = json!({"data": {"type": "person", "id": "3"}});
    let response = send(&app, with_body("PATCH", "/comment/2/relationships/author", &lucy)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = body_json(get(&app, "/comment/2/relationships/author").await).await;
    assert_eq!(body["data"], json!({"type": "person", "id": "3"}));
    let body = body_json(get(&app, "/comment/2").await).await;
    assert_eq!(body["data"]["attributes"]["content"], json!("second"));

    let cleared = json!({"data": null});
    let response = send(&app, with_body("PATCH", "/comment/2/relationships/author", &cleared)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let body = body_json(get(&app, "/comment/2/relationships/author").await).await;
    assert_eq!(body["data"], Value::Null);

    let response = send(&app, with_body("POST", "/comment/1/relationships/author", &lucy)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

    let wrong_type = json!({"data": {"type": "comment", "id": "1"}});
    let response = send(&app, with_body("PATCH", "/comment/1/relationships/author", &wrong_type)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_eval_endpoint() {
    let app = seeded().await.router();
    let functions = url_escape::encode_component(r#"[{"name":"sum","field":"age"},{"name":"count","field":"id"}]"#);

    let response = get(&app, &format!("/eval/person?functions={functions}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["sum__age"], json!(67.0));
    assert_eq!(body["data"]["count__id"], json!(3));

    let detail = error_detail(&app, "/eval/person", StatusCode::BAD_REQUEST).await;
    assert_eq!(detail, "Must provide `functions` query parameter");

    let detail = error_detail(
        &app,
        &format!("/eval/person?functions={}", url_escape::encode_component("[{")),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(detail, "Unable to decode JSON in `functions` query parameter");

    let functions = url_escape::encode_component(r#"[{"name":"median","field":"age"}]"#);
    let detail = error_detail(
        &app,
        &format!("/eval/person?functions={functions}"),
        StatusCode::BAD_REQUEST,
    )
    .await;
    assert_eq!(detail, "No such function \"median\"");
}

#[tokio::test]
async fn test_url_prefix() {
    let config = ApiConfig {
        url_prefix: "/api".to_string(),
        ..ApiConfig::default()
    };
    let manager = setup_manager_with_config(config).await;
    person(manager.store(), "Lincoln", 23).await;
    let app = manager.router();

    let response = get(&app, "/api/person/1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["links"]["self"], json!("/api/person/1"));
    assert_eq!(
        body["data"]["relationships"]["comments"]["links"]["related"],
        json!("/api/person/1/comments")
    );

    assert_eq!(get(&app, "/person/1").await.status(), StatusCode::NOT_FOUND);
}
