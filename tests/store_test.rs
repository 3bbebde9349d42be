use std::collections::BTreeMap;

use restcrate::{Instance, Related, Scalar};

mod common;
use common::{article, comment, id_of, person, setup_manager, tag};

#[tokio::test]
async fn test_get_or_create() {
    let manager = setup_manager().await;
    let store = manager.store();
    let model = manager.model("person").unwrap();

    let mut attributes = BTreeMap::new();
    attributes.insert("name".to_string(), Scalar::from("Mary"));
    attributes.insert("age".to_string(), Scalar::Int(19));

    let (mary, created) = store.get_or_create(model, &attributes).await.unwrap();
    assert!(created);
    assert_eq!(id_of(&mary), 1);

    let (again, created) = store.get_or_create(model, &attributes).await.unwrap();
    assert!(!created);
    assert_eq!(id_of(&again), id_of(&mary));

    attributes.insert("age".to_string(), Scalar::Int(20));
    let (older, created) = store.get_or_create(model, &attributes).await.unwrap();
    assert!(created);
    assert_eq!(id_of(&older), 2);
}

#[tokio::test]
async fn test_get_by_primary_key() {
    let manager = setup_manager().await;
    let store = manager.store();
    person(store, "Lincoln", 23).await;
    let model = manager.model("person").unwrap();

    let found = store.get_by_primary_key(model, "1").await.unwrap();
    assert_eq!(
        found.and_then(|p| p.get("name").cloned()),
        Some(Scalar::from("Lincoln"))
    );
    assert!(store.get_by_primary_key(model, "2").await.unwrap().is_none());
    assert!(store.get_by_primary_key(model, "abc").await.unwrap().is_none());
}

#[tokio::test]
async fn test_related_and_related_keys() {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let mary = person(store, "Mary", 19).await;
    comment(store, "first", &lincoln).await;
    comment(store, "second", &mary).await;
    comment(store, "third", &lincoln).await;

    let keys = store.related_keys(&lincoln, "comments").await.unwrap();
    assert_eq!(keys, vec![Scalar::Int(1), Scalar::Int(3)]);

    let fresh = person(store, "Lucy", 30).await;
    match store.related(&fresh, "comments").await.unwrap() {
        Related::Many(comments) => assert!(comments.is_empty()),
        other => panic!("expected a to-many relation: {other:?}"),
    }

    assert!(store.related(&lincoln, "bogus").await.is_err());
}

#[tokio::test]
async fn test_insert_with_secondary_links() {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let speech = article(store, "Gettysburg", &lincoln).await;
    let letter = article(store, "Bixby", &lincoln).await;
    let history = tag(store, "history", vec![speech.clone(), letter.clone()]).await;

    let keys = store.related_keys(&history, "articles").await.unwrap();
    assert_eq!(keys, vec![Scalar::Int(1), Scalar::Int(2)]);
    let tags = store.related_keys(&letter, "tags").await.unwrap();
    assert_eq!(tags, vec![Scalar::Int(id_of(&history))]);
}

#[tokio::test]
async fn test_update_and_delete() {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let model = manager.model("person").unwrap();

    let mut changed = lincoln.clone();
    changed.set("age".to_string(), Scalar::Int(56));
    let saved = store.update(&changed).await.unwrap();
    assert_eq!(saved.get("age"), Some(&Scalar::Int(56)));

    store.delete(&saved).await.unwrap();
    assert!(store.get_by_primary_key(model, "1").await.unwrap().is_none());

    let unsaved = Instance::new("person").with("name", "Nobody");
    assert!(store.delete(&unsaved).await.is_err());
}

#[tokio::test]
async fn test_failed_link_rolls_back_insert() {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let history = tag(store, "history", Vec::new()).await;
    let model = manager.model("article").unwrap();

    let mut speech = Instance::new("article")
        .with("title", "Gettysburg")
        .with("author_id", id_of(&lincoln));
    speech.assign("tags", Related::Many(vec![history.clone(), history.clone()]));
    assert!(store.insert(&speech).await.is_err());
    assert!(store.get_by_primary_key(model, "1").await.unwrap().is_none());

    let saved = article(store, "Bixby", &lincoln).await;
    assert_eq!(id_of(&saved), 1);
}

#[tokio::test]
async fn test_failed_link_rolls_back_update() {
    let manager = setup_manager().await;
    let store = manager.store();
    let lincoln = person(store, "Lincoln", 23).await;
    let speech = article(store, "Gettysburg", &lincoln).await;
    let history = tag(store, "history", vec![speech.clone()]).await;

    let mut renamed = speech.clone().with("title", "Address");
    renamed.assign("tags", Related::Many(vec![history.clone(), history.clone()]));
    assert!(store.update(&renamed).await.is_err());

    let model = manager.model("article").unwrap();
    let stored = store.get_by_primary_key(model, "1").await.unwrap().unwrap();
    assert_eq!(stored.get("title"), Some(&Scalar::from("Gettysburg")));
    let tags = store.related_keys(&stored, "tags").await.unwrap();
    assert_eq!(tags, vec![Scalar::Int(id_of(&history))]);
}
