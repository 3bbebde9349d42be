#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use restcrate::{ApiConfig, ApiManager, Field, Instance, Join, Model, Relationship, Schema, Store};
use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use serde_json::Value;
use tower::ServiceExt;

/// Route library logs to the test harness; `RUST_LOG=restcrate=debug` shows SQL.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    init_tracing();
    let db = Database::connect("sqlite::memory:").await?;

    // Run migrations
    Migrator::up(&db, None).await?;

    Ok(db)
}

/// People write comments and articles; articles carry tags.
pub fn schema() -> Schema {
    Schema::builder()
        .model(
            Model::new("person", "people")
                .field(Field::integer("id"))
                .field(Field::text("name").required())
                .field(Field::integer("age"))
                .field(Field::float("other"))
                .field(Field::date("birthday"))
                .relationship(Relationship::to_many(
                    "comments",
                    "comment",
                    Join::reverse("author_id"),
                ))
                .relationship(Relationship::to_many(
                    "articles",
                    "article",
                    Join::reverse("author_id"),
                )),
        )
        .model(
            Model::new("comment", "comments")
                .field(Field::integer("id"))
                .field(Field::text("content"))
                .field(Field::integer("author_id"))
                .relationship(Relationship::to_one(
                    "author",
                    "person",
                    Join::foreign_key("author_id"),
                )),
        )
        .model(
            Model::new("article", "articles")
                .field(Field::integer("id"))
                .field(Field::text("title"))
                .field(Field::integer("author_id"))
                .relationship(Relationship::to_one(
                    "author",
                    "person",
                    Join::foreign_key("author_id"),
                ))
                .relationship(Relationship::to_many(
                    "tags",
                    "tag",
                    Join::secondary("article_tags", "article_id", "tag_id"),
                )),
        )
        .model(
            Model::new("tag", "tags")
                .field(Field::integer("id"))
                .field(Field::text("name"))
                .relationship(Relationship::to_many(
                    "articles",
                    "article",
                    Join::secondary("article_tags", "tag_id", "article_id"),
                )),
        )
        .build()
        .expect("test schema is valid")
}

pub async fn setup_manager() -> ApiManager {
    setup_manager_with_config(ApiConfig::default()).await
}

pub async fn setup_manager_with_config(config: ApiConfig) -> ApiManager {
    let db = setup_test_db()
        .await
        .expect("Failed to setup test database");
    ApiManager::new(db, schema()).with_config(config)
}

pub async fn person(store: &Store, name: &str, age: i64) -> Instance {
    store
        .insert(&Instance::new("person").with("name", name).with("age", age))
        .await
        .expect("Failed to insert person")
}

pub async fn comment(store: &Store, content: &str, author: &Instance) -> Instance {
    let author_id = author.get("id").cloned().expect("author has an id");
    store
        .insert(
            &Instance::new("comment")
                .with("content", content)
                .with("author_id", author_id),
        )
        .await
        .expect("Failed to insert comment")
}

pub async fn article(store: &Store, title: &str, author: &Instance) -> Instance {
    let author_id = author.get("id").cloned().expect("author has an id");
    store
        .insert(
            &Instance::new("article")
                .with("title", title)
                .with("author_id", author_id),
        )
        .await
        .expect("Failed to insert article")
}

pub async fn tag(store: &Store, name: &str, articles: Vec<Instance>) -> Instance {
    let mut tag = Instance::new("tag").with("name", name);
    tag.assign("articles", restcrate::Related::Many(articles));
    store.insert(&tag).await.expect("Failed to insert tag")
}

pub fn id_of(instance: &Instance) -> i64 {
    match instance.get("id") {
        Some(restcrate::Scalar::Int(id)) => *id,
        other => panic!("instance has no integer id: {other:?}"),
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateTables)]
    }
}

pub struct CreateTables;

#[async_trait::async_trait]
impl MigrationName for CreateTables {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateTables {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(People::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(People::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(People::Name).string().not_null())
                    .col(ColumnDef::new(People::Age).integer().null())
                    .col(ColumnDef::new(People::Other).double().null())
                    .col(ColumnDef::new(People::Birthday).date().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Comments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Comments::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Comments::Content).string().null())
                    .col(ColumnDef::new(Comments::AuthorId).integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Articles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Articles::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Articles::Title).string().null())
                    .col(ColumnDef::new(Articles::AuthorId).integer().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Tags::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tags::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tags::Name).string().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ArticleTags::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(ArticleTags::ArticleId).integer().not_null())
                    .col(ColumnDef::new(ArticleTags::TagId).integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(ArticleTags::ArticleId)
                            .col(ArticleTags::TagId),
                    )
                    .to_owned(),
            )
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ArticleTags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Tags::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Articles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Comments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(People::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum People {
    Table,
    Id,
    Name,
    Age,
    Other,
    Birthday,
}

#[derive(DeriveIden)]
enum Comments {
    Table,
    Id,
    Content,
    AuthorId,
}

#[derive(DeriveIden)]
enum Articles {
    Table,
    Id,
    Title,
    AuthorId,
}

#[derive(DeriveIden)]
enum Tags {
    Table,
    Id,
    Name,
}

#[derive(DeriveIden)]
enum ArticleTags {
    Table,
    ArticleId,
    TagId,
}
