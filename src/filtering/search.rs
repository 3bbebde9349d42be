//! Query building from filters, sort and group specifications.
//!
//! The order of application is fixed: filters (as one implicit conjunction),
//! then ordering, then grouping. Dotted sort and group names follow exactly
//! one relationship, joined under a fresh alias.

use std::fmt;
use std::str::FromStr;

use sea_orm::sea_query::{Func, Order};
use serde_json::Value;
use thiserror::Error;

use crate::filtering::filters::{Filter, FilterCreationError, FilterParser, FilterParsingError};
use crate::filtering::operators::OperatorRegistry;
use crate::instance::Scalar;
use crate::query::{FieldRef, JoinClause, Query, RelationRef};
use crate::schema::{FieldKind, LookupError, Model, Schema};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl From<Direction> for Order {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Asc => Order::Asc,
            Direction::Desc => Order::Desc,
        }
    }
}

/// One entry of a `sort` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub direction: Direction,
    pub field: String,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            direction: Direction::Asc,
            field: field.into(),
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            direction: Direction::Desc,
            field: field.into(),
        }
    }

    /// Parse a comma separated `sort` value such as `-age,name`.
    pub fn parse_list(value: &str) -> Vec<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .filter_map(|item| item.parse().ok())
            .collect()
    }
}

impl FromStr for SortSpec {
    type Err = SearchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (direction, field) = match value.as_bytes().first() {
            Some(b'-') => (Direction::Desc, &value[1..]),
            Some(b'+') => (Direction::Asc, &value[1..]),
            _ => (Direction::Asc, value),
        };
        if field.is_empty() {
            return Err(SearchError::InvalidPath(value.to_string()));
        }
        Ok(Self {
            direction,
            field: field.to_string(),
        })
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Asc => write!(f, "{}", self.field),
            Direction::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// Everything the client asked for besides paging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchParams {
    pub filters: Vec<Value>,
    pub sort: Vec<SortSpec>,
    pub group_by: Vec<String>,
    pub ignorecase: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error(transparent)]
    Parsing(#[from] FilterParsingError),
    #[error(transparent)]
    Creation(#[from] FilterCreationError),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("invalid field path \"{0}\"")]
    InvalidPath(String),
}

/// Turns client search parameters into a [`Query`].
pub struct Search<'a> {
    schema: &'a Schema,
    registry: &'a OperatorRegistry,
}

impl<'a> Search<'a> {
    pub fn new(schema: &'a Schema, registry: &'a OperatorRegistry) -> Self {
        Self { schema, registry }
    }

    /// Build the query for `model`, starting from `initial` when given.
    ///
    /// # Errors
    /// Parse and operator failures of any filter; unknown sort or group
    /// fields; paths with more than one relationship hop.
    pub fn build_query(
        &self,
        model: &Model,
        params: &SearchParams,
        initial: Option<Query>,
    ) -> Result<Query, SearchError> {
        let mut query = initial.unwrap_or_else(|| Query::new(model));
        let mut parser = FilterParser::new(self.schema);

        let filters = params
            .filters
            .iter()
            .map(|spec| parser.parse(model, query.alias(), spec))
            .collect::<Result<Vec<_>, _>>()?;
        if !filters.is_empty() {
            let predicate = Filter::Conjunction(filters).to_predicate(self.registry)?;
            tracing::debug!(model = model.collection_name(), ?predicate, "compiled filters");
            query = query.filter(predicate);
        }

        for spec in &params.sort {
            let (field, joined) = self.resolve_path(model, &mut parser, &query, &spec.field)?;
            let mut expr = field.expr();
            if params.ignorecase && field.kind == FieldKind::Text {
                expr = Func::lower(expr).into();
            }
            query = query.join(joined).order_by(expr, spec.direction.into());
        }

        for name in &params.group_by {
            let (field, joined) = self.resolve_path(model, &mut parser, &query, name)?;
            query = query.join(joined).group_by(field.expr());
        }

        if !query.is_ordered() {
            for name in model.primary_key_names() {
                let field = model.field_named(name)?;
                let expr = FieldRef::new(query.alias(), field).expr();
                query = query.order_by(expr, Order::Asc);
            }
        }

        Ok(query)
    }

    /// Search within the instances currently related through `relationship`.
    ///
    /// With no related keys the result is [`Query::nothing`]: no joins and no
    /// database round trip.
    ///
    /// # Errors
    /// As for [`Search::build_query`], plus unknown relationships.
    pub fn relationship_query(
        &self,
        model: &Model,
        relationship: &str,
        related_keys: &[Scalar],
        params: &SearchParams,
    ) -> Result<Query, SearchError> {
        let (_, related) = self.schema.resolve_relationship(model, relationship)?;
        if related_keys.is_empty() {
            return Ok(Query::nothing(related));
        }
        let initial = Query::new(related).with_keys(related_keys);
        self.build_query(related, params, Some(initial))
    }

    fn resolve_path(
        &self,
        model: &Model,
        parser: &mut FilterParser<'_>,
        query: &Query,
        path: &str,
    ) -> Result<(FieldRef, Vec<JoinClause>), SearchError> {
        match path.split('.').collect::<Vec<_>>().as_slice() {
            [name] => Ok((FieldRef::new(query.alias(), model.field_named(name)?), Vec::new())),
            [relation, name] => {
                let (relationship, related) = self.schema.resolve_relationship(model, relation)?;
                let alias = parser.fresh_alias(relation);
                let relation = RelationRef::new(model, query.alias(), relationship, related, &alias);
                let field = FieldRef::new(&alias, related.field_named(name)?);
                Ok((field, relation.joins()))
            }
            _ => Err(SearchError::InvalidPath(path.to_string())),
        }
    }
}
