//! Query execution and persistence through Sea-ORM.

use std::collections::BTreeMap;
use std::sync::Arc;

use sea_orm::sea_query::{
    Alias, Condition, Expr, Order, Query as Statement, SelectStatement, SimpleExpr,
};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, QueryResult, TransactionTrait,
};
use thiserror::Error;

use crate::instance::{Instance, Related, Scalar};
use crate::query::{FieldRef, Query};
use crate::schema::{Join, LookupError, Model, Schema};

/// Failure of a query expected to return exactly one row.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no result found")]
    NoResult,
    #[error("multiple results found")]
    MultipleResults,
    #[error(transparent)]
    Database(#[from] DbErr),
}

fn lookup(err: LookupError) -> DbErr {
    DbErr::Custom(err.to_string())
}

/// Executes [`Query`] values and writes [`Instance`] values.
#[derive(Debug, Clone)]
pub struct Store {
    db: DatabaseConnection,
    schema: Arc<Schema>,
}

impl Store {
    pub fn new(db: DatabaseConnection, schema: Arc<Schema>) -> Self {
        Self { db, schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn backend(&self) -> DatabaseBackend {
        self.db.get_database_backend()
    }

    fn model(&self, collection: &str) -> Result<&Model, DbErr> {
        self.schema.model(collection).map_err(lookup)
    }

    /// Run an arbitrary select and return its first row.
    ///
    /// # Errors
    /// Database failures.
    pub async fn query_one(&self, select: &SelectStatement) -> Result<Option<QueryResult>, DbErr> {
        let statement = self.backend().build(select);
        tracing::debug!(%statement, "query one");
        self.db.query_one(statement).await
    }

    /// Every row matched by `query`.
    ///
    /// # Errors
    /// Database failures and undecodable rows.
    pub async fn all(&self, query: &Query) -> Result<Vec<Instance>, DbErr> {
        self.all_on(&self.db, query).await
    }

    async fn all_on<C: ConnectionTrait>(&self, conn: &C, query: &Query) -> Result<Vec<Instance>, DbErr> {
        if query.matches_nothing() {
            return Ok(Vec::new());
        }
        let statement = self.backend().build(&query.select_statement());
        tracing::debug!(%statement, "select");
        let rows = conn.query_all(statement).await?;
        rows.iter()
            .map(|row| Instance::from_row(query.model(), row))
            .collect()
    }

    /// The single row matched by `query`.
    ///
    /// # Errors
    /// `NoResult` and `MultipleResults` when the match is not exactly one row.
    pub async fn one(&self, query: &Query) -> Result<Instance, FetchError> {
        self.one_on(&self.db, query).await
    }

    async fn one_on<C: ConnectionTrait>(&self, conn: &C, query: &Query) -> Result<Instance, FetchError> {
        let mut rows = self.all_on(conn, &query.clone().window(None, Some(2))).await?;
        match rows.len() {
            0 => Err(FetchError::NoResult),
            1 => Ok(rows.remove(0)),
            _ => Err(FetchError::MultipleResults),
        }
    }

    /// The number of rows matched by `query`, ignoring its window.
    ///
    /// # Errors
    /// Database failures.
    pub async fn count(&self, query: &Query) -> Result<u64, DbErr> {
        if query.matches_nothing() {
            return Ok(0);
        }
        let row = self
            .query_one(&query.count_statement())
            .await?
            .ok_or_else(|| DbErr::RecordNotFound("count".to_string()))?;
        let total: i64 = row.try_get_by("total")?;
        u64::try_from(total).map_err(|err| DbErr::Custom(err.to_string()))
    }

    /// Equality on every primary key column.
    fn key_condition(model: &Model, alias: Option<&str>, keys: &[Scalar]) -> Result<Condition, DbErr> {
        let mut condition = Condition::all();
        for (name, key) in model.primary_key_names().iter().zip(keys) {
            let field = model.field_named(name).map_err(lookup)?;
            let column: SimpleExpr = match alias {
                Some(alias) => FieldRef::new(alias, field).expr(),
                None => Expr::col(Alias::new(&field.column)).into(),
            };
            condition = condition.add(Expr::expr(column).eq(SimpleExpr::Value(key.to_value(field.kind))));
        }
        Ok(condition)
    }

    fn owner_key(model: &Model, instance: &Instance) -> Result<Scalar, DbErr> {
        instance
            .primary_key_value(model)
            .and_then(|keys| keys.into_iter().next())
            .ok_or_else(|| {
                DbErr::Custom(format!(
                    "instance of \"{}\" has no primary key",
                    model.collection_name()
                ))
            })
    }

    /// Fetch one instance by the string form of its primary key.
    ///
    /// Composite keys are given comma separated, as rendered in resource ids.
    ///
    /// # Errors
    /// Database failures.
    pub async fn get_by_primary_key(&self, model: &Model, id: &str) -> Result<Option<Instance>, DbErr> {
        let names = model.primary_key_names();
        let parts: Vec<&str> = if names.len() == 1 {
            vec![id]
        } else {
            id.split(',').collect()
        };
        if parts.len() != names.len() {
            return Ok(None);
        }
        let mut keys = Vec::with_capacity(parts.len());
        for (name, part) in names.iter().zip(parts) {
            let field = model.field_named(name).map_err(lookup)?;
            match Scalar::parse_key(part, field.kind) {
                Some(key) => keys.push(key),
                None => return Ok(None),
            }
        }
        let query = Query::new(model);
        let condition = Self::key_condition(model, Some(query.alias()), &keys)?;
        match self.one(&query.filter(condition)).await {
            Ok(instance) => Ok(Some(instance)),
            Err(FetchError::NoResult) => Ok(None),
            Err(FetchError::MultipleResults) => Err(DbErr::Custom(format!(
                "primary key \"{id}\" of \"{}\" is not unique",
                model.collection_name()
            ))),
            Err(FetchError::Database(err)) => Err(err),
        }
    }

    /// The instances currently related to `instance` through `relationship`.
    ///
    /// # Errors
    /// Unknown relationships and database failures.
    pub async fn related(&self, instance: &Instance, relationship: &str) -> Result<Related, DbErr> {
        let model = self.model(instance.collection())?;
        let (rel, target) = self
            .schema
            .resolve_relationship(model, relationship)
            .map_err(lookup)?;
        let base = Query::new(target);
        let target_key = FieldRef::new(base.alias(), target.primary_field());

        let query = match &rel.join {
            Join::ForeignKey { field } => match instance.get(field) {
                None | Some(Scalar::Null) => None,
                Some(key) => Some(base.with_keys(std::slice::from_ref(key))),
            },
            Join::Reverse { field } => {
                let owner = Self::owner_key(model, instance)?;
                let field = target.field_named(field).map_err(lookup)?;
                let column = FieldRef::new(base.alias(), field);
                let condition = Condition::all()
                    .add(Expr::expr(column.expr()).eq(SimpleExpr::Value(owner.to_value(field.kind))));
                Some(base.filter(condition))
            }
            Join::Secondary {
                table,
                owner_column,
                related_column,
            } => {
                let owner = Self::owner_key(model, instance)?;
                let mut links = Statement::select();
                links
                    .column(Alias::new(related_column))
                    .from(Alias::new(table))
                    .and_where(
                        Expr::col(Alias::new(owner_column))
                            .eq(SimpleExpr::Value(owner.to_value(model.primary_field().kind))),
                    );
                let condition = Condition::all().add(Expr::expr(target_key.expr()).in_subquery(links));
                Some(base.filter(condition))
            }
        };

        let instances = match query {
            Some(query) => {
                self.all(&query.order_by(target_key.expr(), Order::Asc)).await?
            }
            None => Vec::new(),
        };
        Ok(if rel.to_many {
            Related::Many(instances)
        } else {
            Related::One(instances.into_iter().next())
        })
    }

    /// Primary keys of the instances related through `relationship`.
    ///
    /// # Errors
    /// As for [`Store::related`].
    pub async fn related_keys(&self, instance: &Instance, relationship: &str) -> Result<Vec<Scalar>, DbErr> {
        let model = self.model(instance.collection())?;
        let (_, target) = self
            .schema
            .resolve_relationship(model, relationship)
            .map_err(lookup)?;
        let related = self.related(instance, relationship).await?;
        Ok(related
            .instances()
            .into_iter()
            .filter_map(|related| related.get(&target.primary_field().name).cloned())
            .filter(|key| !key.is_null())
            .collect())
    }

    /// Copy to-one foreign key assignments into the owning row's attributes.
    fn fold_foreign_keys(&self, model: &Model, instance: &Instance) -> Result<Instance, DbErr> {
        let mut folded = instance.clone();
        for (name, related) in instance.assigned() {
            let rel = model.relationship_named(name).map_err(lookup)?;
            if let (Join::ForeignKey { field }, Related::One(one)) = (&rel.join, related) {
                let target = self.model(&rel.target)?;
                let key = one
                    .as_ref()
                    .and_then(|other| other.get(&target.primary_field().name).cloned())
                    .unwrap_or(Scalar::Null);
                folded.set(field.clone(), key);
            }
        }
        Ok(folded)
    }

    /// Persist relationship assignments that live outside the owning row.
    async fn write_relationships<C: ConnectionTrait>(
        &self,
        conn: &C,
        model: &Model,
        owner: &Instance,
        assigned: &BTreeMap<String, Related>,
        replace: bool,
    ) -> Result<(), DbErr> {
        let owner_key = Self::owner_key(model, owner)?;
        for (name, related) in assigned {
            let rel = model.relationship_named(name).map_err(lookup)?;
            let target = self.model(&rel.target)?;
            let target_field = target.primary_field();
            let keys: Vec<SimpleExpr> = related
                .instances()
                .into_iter()
                .filter_map(|other| other.get(&target_field.name))
                .map(|key| SimpleExpr::Value(key.to_value(target_field.kind)))
                .collect();

            match &rel.join {
                Join::ForeignKey { .. } => {}
                Join::Reverse { field } => {
                    let fk = target.field_named(field).map_err(lookup)?;
                    if replace {
                        let mut clear = Statement::update();
                        clear
                            .table(Alias::new(target.table()))
                            .value(Alias::new(&fk.column), SimpleExpr::Value(Scalar::Null.to_value(fk.kind)))
                            .and_where(
                                Expr::col(Alias::new(&fk.column))
                                    .eq(SimpleExpr::Value(owner_key.to_value(fk.kind))),
                            );
                        conn.execute(self.backend().build(&clear)).await?;
                    }
                    if !keys.is_empty() {
                        let mut set = Statement::update();
                        set.table(Alias::new(target.table()))
                            .value(Alias::new(&fk.column), SimpleExpr::Value(owner_key.to_value(fk.kind)))
                            .and_where(Expr::col(Alias::new(&target_field.column)).is_in(keys));
                        conn.execute(self.backend().build(&set)).await?;
                    }
                }
                Join::Secondary {
                    table,
                    owner_column,
                    related_column,
                } => {
                    let owner_value = SimpleExpr::Value(owner_key.to_value(model.primary_field().kind));
                    if replace {
                        let mut clear = Statement::delete();
                        clear
                            .from_table(Alias::new(table))
                            .and_where(Expr::col(Alias::new(owner_column)).eq(owner_value.clone()));
                        conn.execute(self.backend().build(&clear)).await?;
                    }
                    for key in keys {
                        let mut link = Statement::insert();
                        link.into_table(Alias::new(table))
                            .columns([Alias::new(owner_column), Alias::new(related_column)])
                            .values([owner_value.clone(), key])
                            .map_err(|err| DbErr::Custom(err.to_string()))?;
                        conn.execute(self.backend().build(&link)).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn reload<C: ConnectionTrait>(&self, conn: &C, model: &Model, keys: &[Scalar]) -> Result<Instance, DbErr> {
        let query = Query::new(model);
        let condition = Self::key_condition(model, Some(query.alias()), keys)?;
        match self.one_on(conn, &query.filter(condition)).await {
            Ok(instance) => Ok(instance),
            Err(FetchError::Database(err)) => Err(err),
            Err(_) => Err(DbErr::RecordNotFound(model.collection_name().to_string())),
        }
    }

    /// Insert a new row and its relationship assignments; returns the row as
    /// stored, including generated keys.
    ///
    /// The row and its links are written in one transaction, so a failed link
    /// leaves nothing behind.
    ///
    /// # Errors
    /// Database failures.
    pub async fn insert(&self, instance: &Instance) -> Result<Instance, DbErr> {
        let txn = self.db.begin().await?;
        let saved = self.insert_on(&txn, instance).await?;
        txn.commit().await?;
        Ok(saved)
    }

    async fn insert_on<C: ConnectionTrait>(&self, conn: &C, instance: &Instance) -> Result<Instance, DbErr> {
        let model = self.model(instance.collection())?;
        let instance = self.fold_foreign_keys(model, instance)?;

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for field in model.fields() {
            if let Some(value) = instance.get(&field.name) {
                columns.push(Alias::new(&field.column));
                values.push(SimpleExpr::Value(value.to_value(field.kind)));
            }
        }
        let mut insert = Statement::insert();
        insert.into_table(Alias::new(model.table()));
        if columns.is_empty() {
            insert.or_default_values();
        } else {
            insert
                .columns(columns)
                .values(values)
                .map_err(|err| DbErr::Custom(err.to_string()))?;
        }

        let saved = if self.backend() == DatabaseBackend::MySql {
            let statement = self.backend().build(&insert);
            tracing::debug!(%statement, "insert");
            let result = conn.execute(statement).await?;
            let keys = match instance.primary_key_value(model) {
                Some(keys) => keys,
                None => vec![Scalar::Int(
                    i64::try_from(result.last_insert_id()).map_err(|err| DbErr::Custom(err.to_string()))?,
                )],
            };
            self.reload(conn, model, &keys).await?
        } else {
            insert.returning_all();
            let statement = self.backend().build(&insert);
            tracing::debug!(%statement, "insert");
            let row = conn
                .query_one(statement)
                .await?
                .ok_or(DbErr::RecordNotInserted)?;
            Instance::from_row(model, &row)?
        };

        self.write_relationships(conn, model, &saved, instance.assigned(), false)
            .await?;
        Ok(saved)
    }

    /// Write changed attributes and replace assigned relationships of an
    /// existing row, in one transaction.
    ///
    /// # Errors
    /// Database failures; instances without a primary key.
    pub async fn update(&self, instance: &Instance) -> Result<Instance, DbErr> {
        let txn = self.db.begin().await?;
        let saved = self.update_on(&txn, instance).await?;
        txn.commit().await?;
        Ok(saved)
    }

    async fn update_on<C: ConnectionTrait>(&self, conn: &C, instance: &Instance) -> Result<Instance, DbErr> {
        let model = self.model(instance.collection())?;
        let instance = self.fold_foreign_keys(model, instance)?;
        let keys = instance.primary_key_value(model).ok_or_else(|| {
            DbErr::Custom(format!(
                "instance of \"{}\" has no primary key",
                model.collection_name()
            ))
        })?;

        let mut update = Statement::update();
        update.table(Alias::new(model.table()));
        let mut changed = false;
        for field in model.fields() {
            if model.is_primary_key(&field.name) {
                continue;
            }
            if let Some(value) = instance.get(&field.name) {
                update.value(Alias::new(&field.column), SimpleExpr::Value(value.to_value(field.kind)));
                changed = true;
            }
        }
        if changed {
            update.cond_where(Self::key_condition(model, None, &keys)?);
            let statement = self.backend().build(&update);
            tracing::debug!(%statement, "update");
            conn.execute(statement).await?;
        }

        self.write_relationships(conn, model, &instance, instance.assigned(), true)
            .await?;
        self.reload(conn, model, &keys).await
    }

    /// Delete the row of `instance`.
    ///
    /// # Errors
    /// Database failures; instances without a primary key.
    pub async fn delete(&self, instance: &Instance) -> Result<(), DbErr> {
        let model = self.model(instance.collection())?;
        let keys = instance
            .primary_key_value(model)
            .ok_or_else(|| DbErr::RecordNotFound(model.collection_name().to_string()))?;
        let mut delete = Statement::delete();
        delete
            .from_table(Alias::new(model.table()))
            .cond_where(Self::key_condition(model, None, &keys)?);
        let statement = self.backend().build(&delete);
        tracing::debug!(%statement, "delete");
        self.db.execute(statement).await?;
        Ok(())
    }

    /// Find the row with exactly these attribute values, inserting it when
    /// there is none. The flag is `true` when a row was created.
    ///
    /// # Errors
    /// Database failures; more than one matching row.
    pub async fn get_or_create(
        &self,
        model: &Model,
        attributes: &BTreeMap<String, Scalar>,
    ) -> Result<(Instance, bool), DbErr> {
        let mut query = Query::new(model);
        for (name, value) in attributes {
            let field = model.field_named(name).map_err(lookup)?;
            let column = Expr::expr(FieldRef::new(query.alias(), field).expr());
            let expr = if value.is_null() {
                column.is_null()
            } else {
                column.eq(SimpleExpr::Value(value.to_value(field.kind)))
            };
            query = query.filter(Condition::all().add(expr));
        }
        match self.one(&query).await {
            Ok(found) => Ok((found, false)),
            Err(FetchError::NoResult) => {
                let mut instance = Instance::new(model.collection_name());
                for (name, value) in attributes {
                    instance.set(name.clone(), value.clone());
                }
                Ok((self.insert(&instance).await?, true))
            }
            Err(FetchError::MultipleResults) => Err(DbErr::Custom(format!(
                "more than one \"{}\" matches",
                model.collection_name()
            ))),
            Err(FetchError::Database(err)) => Err(err),
        }
    }
}
