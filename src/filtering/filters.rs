//! Filter expression trees.
//!
//! A filter object from the client is parsed against a [`Model`] into a
//! [`Filter`]. Parsing resolves every field and relationship name and coerces
//! literals; it never touches operators. Operators are applied afterwards by
//! [`Filter::to_predicate`], so parse failures and operator failures stay
//! distinguishable.
//!
//! Accepted shapes:
//!
//! ```json
//! {"name": "age", "op": "gt", "val": 18}
//! {"name": "age", "op": "eq", "field": "id"}
//! {"name": "comments", "op": "any", "val": {"name": "content", "op": "like", "val": "%cool%"}}
//! {"name": "author.name", "op": "eq", "val": "Jesus"}
//! {"or": [ ... ]}   {"and": [ ... ]}   {"not": { ... }}
//! ```

use sea_orm::sea_query::{Condition, Expr};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::dates::ClockMarker;
use crate::filtering::operators::{Operand, OperatorError, OperatorRegistry};
use crate::instance::Scalar;
use crate::query::{self, FieldRef, RelationRef};
use crate::schema::{LookupError, Model, Schema};

/// A filter object that could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterParsingError {
    #[error("missing field name")]
    MissingName,
    #[error("missing operator")]
    MissingOperator,
    #[error("no such field \"{0}\"")]
    NoSuchField(String),
    #[error("\"{0}\" is not a relationship")]
    NotARelationship(String),
    #[error("unable to parse \"{value}\" as a date or time for field \"{field}\"")]
    UnparseableDate { field: String, value: String },
    #[error("invalid value \"{value}\" for field \"{field}\"")]
    InvalidValue { field: String, value: String },
    #[error("{0}")]
    Malformed(String),
    #[error("a filter object holds exactly one of \"and\", \"or\", \"not\" or a field comparison")]
    Ambiguous,
}

impl From<LookupError> for FilterParsingError {
    fn from(err: LookupError) -> Self {
        match err {
            LookupError::NoSuchField { field, .. } => Self::NoSuchField(field),
            LookupError::NoSuchRelationship { relationship, .. } => {
                Self::NoSuchField(relationship)
            }
            other => Self::Malformed(other.to_string()),
        }
    }
}

/// A well-formed filter whose operator could not be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(transparent)]
pub struct FilterCreationError(#[from] pub OperatorError);

/// The left-hand side of a field comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Column(FieldRef),
    Relation(RelationRef),
}

impl Target {
    pub fn name(&self) -> &str {
        match self {
            Self::Column(field) => &field.name,
            Self::Relation(relation) => &relation.name,
        }
    }

    fn operand(&self) -> Operand {
        match self {
            Self::Column(field) => Operand::Column(field.clone()),
            Self::Relation(relation) => Operand::Relation(relation.clone()),
        }
    }
}

/// The right-hand side of a field comparison.
///
/// `Absent` (no `val` key) and `Null` (`"val": null`) are different: unary
/// operators accept both, binary operators reject both with different errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Absent,
    Null,
    Value(Scalar),
    List(Vec<Scalar>),
    Field(FieldRef),
    Filter(Box<Filter>),
    Clock(ClockMarker),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub target: Target,
    pub operator: String,
    pub argument: Argument,
}

/// A node of a parsed filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Field(FieldFilter),
    Negation(Box<Filter>),
    Conjunction(Vec<Filter>),
    Disjunction(Vec<Filter>),
}

impl Filter {
    /// Parse one filter object against `model`, aliased by its table name.
    ///
    /// # Errors
    /// See [`FilterParsingError`].
    pub fn from_spec(
        schema: &Schema,
        model: &Model,
        spec: &Value,
    ) -> Result<Self, FilterParsingError> {
        FilterParser::new(schema).parse(model, model.table(), spec)
    }

    /// Apply operators bottom-up and produce the predicate.
    ///
    /// An empty conjunction is always true and an empty disjunction is
    /// always false.
    ///
    /// # Errors
    /// The first operator failure met in a depth-first walk.
    pub fn to_predicate(
        &self,
        registry: &OperatorRegistry,
    ) -> Result<Condition, FilterCreationError> {
        match self {
            Self::Field(filter) => {
                let rhs = match &filter.argument {
                    Argument::Absent => None,
                    Argument::Null => Some(Operand::Value(Scalar::Null)),
                    Argument::Value(value) => Some(Operand::Value(value.clone())),
                    Argument::List(values) => Some(Operand::List(values.clone())),
                    Argument::Field(field) => Some(Operand::Column(field.clone())),
                    Argument::Filter(nested) => Some(Operand::Predicate(nested.to_predicate(registry)?)),
                    Argument::Clock(marker) => Some(Operand::Expression(Expr::cust(marker.sql()))),
                };
                let expr =
                    registry.create_operation(&filter.operator, &filter.target.operand(), rhs.as_ref())?;
                Ok(Condition::all().add(expr))
            }
            Self::Negation(inner) => Ok(Condition::all().not().add(inner.to_predicate(registry)?)),
            Self::Conjunction(filters) if filters.is_empty() => {
                Ok(Condition::all().add(query::always_true()))
            }
            Self::Disjunction(filters) if filters.is_empty() => {
                Ok(Condition::all().add(query::always_false()))
            }
            Self::Conjunction(filters) => filters
                .iter()
                .try_fold(Condition::all(), |acc, filter| Ok(acc.add(filter.to_predicate(registry)?))),
            Self::Disjunction(filters) => filters
                .iter()
                .try_fold(Condition::any(), |acc, filter| Ok(acc.add(filter.to_predicate(registry)?))),
        }
    }
}

const COMBINATORS: [&str; 3] = ["or", "and", "not"];

/// Recursive filter parser.
///
/// One parser hands out table aliases for every relationship it walks, so
/// all filters of one query should share a parser.
#[derive(Debug)]
pub struct FilterParser<'a> {
    schema: &'a Schema,
    aliases: usize,
}

impl<'a> FilterParser<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema, aliases: 0 }
    }

    /// A table alias not handed out before by this parser.
    pub fn fresh_alias(&mut self, relationship: &str) -> String {
        self.aliases += 1;
        format!("{relationship}_{}", self.aliases)
    }

    /// Parse `spec` against `model`, whose table is aliased as `alias`.
    ///
    /// # Errors
    /// See [`FilterParsingError`].
    pub fn parse(
        &mut self,
        model: &Model,
        alias: &str,
        spec: &Value,
    ) -> Result<Filter, FilterParsingError> {
        let Value::Object(object) = spec else {
            return Err(FilterParsingError::Malformed(
                "a filter must be a JSON object".to_string(),
            ));
        };
        let present: Vec<&str> = COMBINATORS
            .into_iter()
            .filter(|key| object.contains_key(*key))
            .collect();
        match present.as_slice() {
            [] => self.parse_comparison(model, alias, object),
            ["not"] if object.len() == 1 => Ok(Filter::Negation(Box::new(self.parse(
                model,
                alias,
                &object["not"],
            )?))),
            [key] if object.len() == 1 => {
                let Value::Array(items) = &object[*key] else {
                    return Err(FilterParsingError::Malformed(format!(
                        "\"{key}\" must hold a list of filters"
                    )));
                };
                let filters = items
                    .iter()
                    .map(|item| self.parse(model, alias, item))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if *key == "or" {
                    Filter::Disjunction(filters)
                } else {
                    Filter::Conjunction(filters)
                })
            }
            _ => Err(FilterParsingError::Ambiguous),
        }
    }

    fn parse_comparison(
        &mut self,
        model: &Model,
        alias: &str,
        object: &Map<String, Value>,
    ) -> Result<Filter, FilterParsingError> {
        let name = match object.get("name") {
            None | Some(Value::Null) => return Err(FilterParsingError::MissingName),
            Some(Value::String(name)) => name.as_str(),
            Some(_) => {
                return Err(FilterParsingError::Malformed(
                    "\"name\" must be a string".to_string(),
                ));
            }
        };
        let operator = match object.get("op") {
            None | Some(Value::Null) => return Err(FilterParsingError::MissingOperator),
            Some(Value::String(op)) => op.clone(),
            Some(_) => {
                return Err(FilterParsingError::Malformed(
                    "\"op\" must be a string".to_string(),
                ));
            }
        };
        let relational = matches!(operator.as_str(), "has" | "any");

        if let Some(field) = model.find_field(name) {
            if relational {
                return Err(FilterParsingError::NotARelationship(name.to_string()));
            }
            let target = FieldRef::new(alias, field);
            let argument = match object.get("field") {
                Some(other) => Argument::Field(Self::other_field(model, alias, other)?),
                None => Self::literal(&target, object.get("val"))?,
            };
            return Ok(Filter::Field(FieldFilter {
                target: Target::Column(target),
                operator,
                argument,
            }));
        }

        if model.find_relationship(name).is_some() {
            return self.parse_relation(model, alias, name, operator, object);
        }

        // `relation.field` is shorthand for has/any around a nested comparison.
        if let Some((head, rest)) = name.split_once('.') {
            if let Some(relationship) = model.find_relationship(head) {
                let mut nested = object.clone();
                nested.insert("name".to_string(), Value::String(rest.to_string()));
                let wrapper = if relationship.to_many { "any" } else { "has" };
                let mut outer = Map::new();
                outer.insert("name".to_string(), Value::String(head.to_string()));
                outer.insert("op".to_string(), Value::String(wrapper.to_string()));
                outer.insert("val".to_string(), Value::Object(nested));
                return self.parse_relation(model, alias, head, wrapper.to_string(), &outer);
            }
        }

        Err(FilterParsingError::NoSuchField(name.to_string()))
    }

    fn parse_relation(
        &mut self,
        model: &Model,
        alias: &str,
        name: &str,
        operator: String,
        object: &Map<String, Value>,
    ) -> Result<Filter, FilterParsingError> {
        let (relationship, related) = self.schema.resolve_relationship(model, name)?;
        let related_alias = self.fresh_alias(name);
        let relation = RelationRef::new(model, alias, relationship, related, &related_alias);

        let argument = if let Some(other) = object.get("field") {
            Argument::Field(Self::other_field(model, alias, other)?)
        } else if matches!(operator.as_str(), "has" | "any") {
            match object.get("val") {
                None => Argument::Absent,
                Some(Value::Null) => Argument::Null,
                Some(spec @ Value::Object(_)) => {
                    Argument::Filter(Box::new(self.parse(related, &related_alias, spec)?))
                }
                Some(_) => {
                    return Err(FilterParsingError::Malformed(format!(
                        "the {operator} operator takes a filter object"
                    )));
                }
            }
        } else {
            match object.get("val") {
                None => Argument::Absent,
                Some(Value::Null) => Argument::Null,
                Some(Value::Array(items)) => {
                    Argument::List(items.iter().map(Scalar::from_json).collect())
                }
                Some(value) => Argument::Value(Scalar::from_json(value)),
            }
        };

        Ok(Filter::Field(FieldFilter {
            target: Target::Relation(relation),
            operator,
            argument,
        }))
    }

    fn other_field(
        model: &Model,
        alias: &str,
        name: &Value,
    ) -> Result<FieldRef, FilterParsingError> {
        let Value::String(name) = name else {
            return Err(FilterParsingError::Malformed(
                "\"field\" must be a string".to_string(),
            ));
        };
        let field = model
            .find_field(name)
            .ok_or_else(|| FilterParsingError::NoSuchField(name.clone()))?;
        Ok(FieldRef::new(alias, field))
    }

    fn literal(target: &FieldRef, value: Option<&Value>) -> Result<Argument, FilterParsingError> {
        match value {
            None => Ok(Argument::Absent),
            Some(Value::Null) => Ok(Argument::Null),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| Self::coerce(target, item))
                .collect::<Result<Vec<_>, _>>()
                .map(Argument::List),
            Some(Value::String(text)) if target.kind.is_temporal() => {
                match ClockMarker::parse(text) {
                    Some(marker) => Ok(Argument::Clock(marker)),
                    None => Self::coerce(target, &Value::String(text.clone())).map(Self::scalar),
                }
            }
            Some(value) => Self::coerce(target, value).map(Self::scalar),
        }
    }

    fn scalar(value: Scalar) -> Argument {
        if value.is_null() {
            Argument::Null
        } else {
            Argument::Value(value)
        }
    }

    fn coerce(target: &FieldRef, value: &Value) -> Result<Scalar, FilterParsingError> {
        Scalar::coerce(value, target.kind).map_err(|err| {
            if target.kind.is_temporal() {
                FilterParsingError::UnparseableDate {
                    field: target.name.clone(),
                    value: err.value,
                }
            } else {
                FilterParsingError::InvalidValue {
                    field: target.name.clone(),
                    value: err.value,
                }
            }
        })
    }
}
