//! Restricted select queries over a registered model.
//!
//! A [`Query`] collects the pieces the search layer produces (one predicate,
//! aliased joins, ordering, grouping and a page window) and renders them into
//! Sea-Query statements only when executed. Table aliases keep self-joins and
//! nested relationship filters unambiguous.

use std::sync::Arc;

use sea_orm::sea_query::{
    Alias, Condition, Expr, JoinType, Order, Query as Statement, SelectStatement, SimpleExpr,
};

use crate::instance::Scalar;
use crate::schema::{Field, FieldKind, Join, Model, Relationship};

/// A model field resolved under a table alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub name: String,
    pub alias: String,
    pub column: String,
    pub kind: FieldKind,
}

impl FieldRef {
    pub fn new(alias: &str, field: &Field) -> Self {
        Self {
            name: field.name.clone(),
            alias: alias.to_string(),
            column: field.column.clone(),
            kind: field.kind,
        }
    }

    /// The qualified column expression, `"alias"."column"`.
    pub fn expr(&self) -> SimpleExpr {
        column(&self.alias, &self.column)
    }
}

/// A relationship resolved between two table aliases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationRef {
    pub name: String,
    pub to_many: bool,
    pub join: Join,
    pub owner_alias: String,
    pub owner_key: String,
    pub related_table: String,
    pub related_alias: String,
    pub related_key: String,
    /// Column of `Join::ForeignKey`/`Join::Reverse` fields
    join_column: String,
}

impl RelationRef {
    pub fn new(
        owner: &Model,
        owner_alias: &str,
        relationship: &Relationship,
        related: &Model,
        related_alias: &str,
    ) -> Self {
        let join_column = match &relationship.join {
            Join::ForeignKey { field } => owner.find_field(field),
            Join::Reverse { field } => related.find_field(field),
            Join::Secondary { .. } => None,
        }
        .map(|field| field.column.clone())
        .unwrap_or_default();
        Self {
            name: relationship.name.clone(),
            to_many: relationship.to_many,
            join: relationship.join.clone(),
            owner_alias: owner_alias.to_string(),
            owner_key: owner.primary_field().column.clone(),
            related_table: related.table().to_string(),
            related_alias: related_alias.to_string(),
            related_key: related.primary_field().column.clone(),
            join_column,
        }
    }

    fn link_alias(&self) -> String {
        format!("{}_link", self.related_alias)
    }

    /// `EXISTS (SELECT 1 FROM related WHERE <join> AND <predicate>)`.
    pub fn exists(&self, predicate: Condition) -> SimpleExpr {
        let mut select = Statement::select();
        select
            .expr(Expr::val(1))
            .from_as(Alias::new(&self.related_table), Alias::new(&self.related_alias));
        let mut condition = Condition::all();
        match &self.join {
            Join::ForeignKey { .. } => {
                condition = condition.add(
                    Expr::col((Alias::new(&self.related_alias), Alias::new(&self.related_key)))
                        .equals((Alias::new(&self.owner_alias), Alias::new(&self.join_column))),
                );
            }
            Join::Reverse { .. } => {
                condition = condition.add(
                    Expr::col((Alias::new(&self.related_alias), Alias::new(&self.join_column)))
                        .equals((Alias::new(&self.owner_alias), Alias::new(&self.owner_key))),
                );
            }
            Join::Secondary {
                table,
                owner_column,
                related_column,
            } => {
                let link = self.link_alias();
                select.from_as(Alias::new(table), Alias::new(&link));
                condition = condition
                    .add(
                        Expr::col((Alias::new(&link), Alias::new(owner_column)))
                            .equals((Alias::new(&self.owner_alias), Alias::new(&self.owner_key))),
                    )
                    .add(
                        Expr::col((Alias::new(&link), Alias::new(related_column))).equals((
                            Alias::new(&self.related_alias),
                            Alias::new(&self.related_key),
                        )),
                    );
            }
        }
        select.cond_where(condition.add(predicate));
        Expr::exists(select)
    }

    /// LEFT JOIN clauses bringing the related table in under `related_alias`.
    pub fn joins(&self) -> Vec<JoinClause> {
        let related = |column: &str| column_ref(&self.related_alias, column);
        match &self.join {
            Join::ForeignKey { .. } => vec![JoinClause {
                table: self.related_table.clone(),
                alias: self.related_alias.clone(),
                on: Expr::col(related(&self.related_key))
                    .equals(column_ref(&self.owner_alias, &self.join_column)),
            }],
            Join::Reverse { .. } => vec![JoinClause {
                table: self.related_table.clone(),
                alias: self.related_alias.clone(),
                on: Expr::col(related(&self.join_column))
                    .equals(column_ref(&self.owner_alias, &self.owner_key)),
            }],
            Join::Secondary {
                table,
                owner_column,
                related_column,
            } => {
                let link = self.link_alias();
                vec![
                    JoinClause {
                        table: table.clone(),
                        alias: link.clone(),
                        on: Expr::col(column_ref(&link, owner_column))
                            .equals(column_ref(&self.owner_alias, &self.owner_key)),
                    },
                    JoinClause {
                        table: self.related_table.clone(),
                        alias: self.related_alias.clone(),
                        on: Expr::col(related(&self.related_key))
                            .equals(column_ref(&link, related_column)),
                    },
                ]
            }
        }
    }
}

/// One aliased LEFT JOIN.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub table: String,
    pub alias: String,
    pub on: SimpleExpr,
}

fn column_ref(alias: &str, column: &str) -> (Alias, Alias) {
    (Alias::new(alias), Alias::new(column))
}

pub(crate) fn column(alias: &str, column: &str) -> SimpleExpr {
    Expr::col(column_ref(alias, column)).into()
}

pub(crate) fn always_true() -> SimpleExpr {
    Expr::cust("1 = 1")
}

pub(crate) fn always_false() -> SimpleExpr {
    Expr::cust("1 = 0")
}

/// A select over one model, built up by the search layer.
#[derive(Debug, Clone)]
pub struct Query {
    model: Arc<Model>,
    alias: String,
    condition: Condition,
    joins: Vec<JoinClause>,
    order_by: Vec<(SimpleExpr, Order)>,
    group_by: Vec<SimpleExpr>,
    limit: Option<u64>,
    offset: Option<u64>,
    matches_nothing: bool,
}

impl Query {
    /// Every row of the model, aliased by its table name.
    pub fn new(model: &Model) -> Self {
        Self {
            alias: model.table().to_string(),
            model: Arc::new(model.clone()),
            condition: Condition::all(),
            joins: Vec::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            limit: None,
            offset: None,
            matches_nothing: false,
        }
    }

    /// A query that can never match; it is never sent to the database.
    pub fn nothing(model: &Model) -> Self {
        let mut query = Self::new(model);
        query.condition = Condition::all().add(always_false());
        query.matches_nothing = true;
        query
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn matches_nothing(&self) -> bool {
        self.matches_nothing
    }

    pub fn joins(&self) -> &[JoinClause] {
        &self.joins
    }

    pub fn is_ordered(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Resolve a field of this query's model under the base alias.
    pub fn field(&self, name: &str) -> Option<FieldRef> {
        self.model
            .find_field(name)
            .map(|field| FieldRef::new(&self.alias, field))
    }

    /// AND another predicate onto the query.
    #[must_use]
    pub fn filter(mut self, predicate: impl Into<Condition>) -> Self {
        self.condition = self.condition.add(predicate.into());
        self
    }

    /// Restrict to rows whose primary key is one of `keys`.
    #[must_use]
    pub fn with_keys(self, keys: &[Scalar]) -> Self {
        let field = FieldRef::new(&self.alias, self.model.primary_field());
        let values: Vec<SimpleExpr> = keys
            .iter()
            .map(|key| SimpleExpr::Value(key.to_value(field.kind)))
            .collect();
        self.filter(Condition::all().add(Expr::expr(field.expr()).is_in(values)))
    }

    #[must_use]
    pub fn join(mut self, clauses: Vec<JoinClause>) -> Self {
        self.joins.extend(clauses);
        self
    }

    #[must_use]
    pub fn order_by(mut self, expr: SimpleExpr, order: Order) -> Self {
        self.order_by.push((expr, order));
        self
    }

    #[must_use]
    pub fn group_by(mut self, expr: SimpleExpr) -> Self {
        self.group_by.push(expr);
        self
    }

    /// Limit the result window; `None` clears it.
    #[must_use]
    pub fn window(mut self, offset: Option<u64>, limit: Option<u64>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    fn base(&self) -> SelectStatement {
        let mut select = Statement::select();
        select.from_as(Alias::new(self.model.table()), Alias::new(&self.alias));
        for join in &self.joins {
            select.join_as(
                JoinType::LeftJoin,
                Alias::new(&join.table),
                Alias::new(&join.alias),
                join.on.clone(),
            );
        }
        select.cond_where(self.condition.clone());
        if !self.group_by.is_empty() {
            select.add_group_by(self.group_by.clone());
        }
        select
    }

    /// `SELECT <model columns> ...` with ordering and window.
    pub fn select_statement(&self) -> SelectStatement {
        let mut select = self.base();
        for field in self.model.fields() {
            select.column(column_ref(&self.alias, &field.column));
        }
        for (expr, order) in &self.order_by {
            select.order_by_expr(expr.clone(), order.clone());
        }
        if let Some(limit) = self.limit {
            select.limit(limit);
        }
        if let Some(offset) = self.offset {
            select.offset(offset);
        }
        select
    }

    /// `SELECT COUNT(*)` over the unpaged rows.
    pub fn count_statement(&self) -> SelectStatement {
        let mut inner = self.base();
        for field in self.model.fields() {
            inner.column(column_ref(&self.alias, &field.column));
        }
        let mut select = Statement::select();
        select
            .expr_as(Expr::cust("COUNT(*)"), Alias::new("total"))
            .from_subquery(inner, Alias::new("counted"));
        select
    }

    /// `SELECT <aggregates>` over the filtered rows.
    pub fn aggregate_statement(&self, exprs: Vec<(SimpleExpr, String)>) -> SelectStatement {
        let mut select = self.base();
        for (expr, alias) in exprs {
            select.expr_as(expr, Alias::new(alias));
        }
        select
    }
}
