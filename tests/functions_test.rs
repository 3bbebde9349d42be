use restcrate::FunctionError;
use serde_json::{Value, json};

mod common;
use common::{person, setup_manager};

#[tokio::test]
async fn test_sum_and_count() {
    let manager = setup_manager().await;
    let store = manager.store();
    for (name, age) in [("Lincoln", 10), ("Mary", 15), ("Lucy", 20)] {
        person(store, name, age).await;
    }
    let model = manager.model("person").unwrap();

    let results = manager
        .evaluate_functions(
            model,
            &[
                json!({"name": "sum", "field": "age"}),
                json!({"name": "count", "field": "id"}),
                json!({"name": "avg", "field": "age"}),
                json!({"name": "min", "field": "age"}),
                json!({"name": "max", "field": "name"}),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results["sum__age"], json!(45.0));
    assert_eq!(results["count__id"], json!(3));
    assert_eq!(results["avg__age"], json!(15.0));
    assert_eq!(results["min__age"], json!(10));
    assert_eq!(results["max__name"], json!("Mary"));
}

#[tokio::test]
async fn test_empty_collection() {
    let manager = setup_manager().await;
    let model = manager.model("person").unwrap();

    let results = manager
        .evaluate_functions(
            model,
            &[
                json!({"name": "sum", "field": "age"}),
                json!({"name": "count", "field": "id"}),
            ],
        )
        .await
        .unwrap();
    assert_eq!(results["sum__age"], Value::Null);
    assert_eq!(results["count__id"], json!(0));

    let results = manager.evaluate_functions(model, &[]).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_bad_function_objects() {
    let manager = setup_manager().await;
    let model = manager.model("person").unwrap();

    let err = manager
        .evaluate_functions(model, &[json!({"name": "sum", "field": "bogus"})])
        .await
        .unwrap_err();
    assert!(matches!(err, FunctionError::NoSuchField(ref field) if field == "bogus"));

    let err = manager
        .evaluate_functions(model, &[json!({"name": "median", "field": "age"})])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No such function \"median\"");

    let err = manager
        .evaluate_functions(model, &[json!({"field": "age"})])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing `name` key in function object");
}
