//! Aggregate functions over a whole collection.
//!
//! A request such as `[{"name": "sum", "field": "age"}, {"name": "count", "field": "id"}]`
//! is answered by a single `SELECT SUM(age), COUNT(id)` and returned as
//! `{"sum__age": 45.0, "count__id": 3}`.

use sea_orm::sea_query::{Func, SimpleExpr};
use sea_orm::{DbErr, QueryResult};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::instance::Scalar;
use crate::query::Query;
use crate::schema::{Field, Model};
use crate::store::Store;

#[derive(Debug, Error)]
pub enum FunctionError {
    #[error("Missing `{0}` key in function object")]
    MissingKey(&'static str),
    #[error("No such field \"{0}\"")]
    NoSuchField(String),
    #[error("No such function \"{0}\"")]
    NoSuchFunction(String),
    #[error(transparent)]
    Database(#[from] DbErr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Aggregate {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Aggregate {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "count" => Some(Self::Count),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    fn apply(self, column: SimpleExpr) -> SimpleExpr {
        match self {
            Self::Sum => Func::sum(column).into(),
            Self::Avg => Func::avg(column).into(),
            Self::Count => Func::count(column).into(),
            Self::Min => Func::min(column).into(),
            Self::Max => Func::max(column).into(),
        }
    }

    fn read(self, row: &QueryResult, alias: &str, field: &Field) -> Result<Value, DbErr> {
        match self {
            Self::Sum | Self::Avg => {
                let value = match row.try_get_by::<Option<f64>, _>(alias) {
                    Ok(value) => value,
                    #[allow(clippy::cast_precision_loss)]
                    Err(_) => row
                        .try_get_by::<Option<i64>, _>(alias)?
                        .map(|value| value as f64),
                };
                Ok(value.map_or(Value::Null, Value::from))
            }
            Self::Count => Ok(Value::from(row.try_get_by::<i64, _>(alias)?)),
            Self::Min | Self::Max => Ok(Scalar::read(row, alias, field.kind)?.to_json()),
        }
    }
}

struct Call<'m> {
    aggregate: Aggregate,
    field: &'m Field,
    alias: String,
}

fn key<'v>(spec: &'v Value, name: &'static str) -> Result<&'v str, FunctionError> {
    spec.get(name)
        .and_then(Value::as_str)
        .ok_or(FunctionError::MissingKey(name))
}

fn parse_call<'m>(model: &'m Model, spec: &Value) -> Result<Call<'m>, FunctionError> {
    let name = key(spec, "name")?;
    let field_name = key(spec, "field")?;
    let field = model
        .find_field(field_name)
        .ok_or_else(|| FunctionError::NoSuchField(field_name.to_string()))?;
    let aggregate =
        Aggregate::parse(name).ok_or_else(|| FunctionError::NoSuchFunction(name.to_string()))?;
    Ok(Call {
        aggregate,
        field,
        alias: format!("{name}__{field_name}"),
    })
}

/// Evaluate every function object in `specs` over all rows of `model`.
///
/// # Errors
/// The first malformed function object; database failures.
pub async fn evaluate_functions(
    store: &Store,
    model: &Model,
    specs: &[Value],
) -> Result<Map<String, Value>, FunctionError> {
    let calls = specs
        .iter()
        .map(|spec| parse_call(model, spec))
        .collect::<Result<Vec<_>, _>>()?;
    if calls.is_empty() {
        return Ok(Map::new());
    }

    let query = Query::new(model);
    let exprs = calls
        .iter()
        .map(|call| {
            let column = query
                .field(&call.field.name)
                .map(|field| field.expr())
                .ok_or_else(|| FunctionError::NoSuchField(call.field.name.clone()))?;
            Ok((call.aggregate.apply(column), call.alias.clone()))
        })
        .collect::<Result<Vec<_>, FunctionError>>()?;
    let row = store
        .query_one(&query.aggregate_statement(exprs))
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(model.collection_name().to_string()))?;

    let mut results = Map::new();
    for call in &calls {
        let value = call.aggregate.read(&row, &call.alias, call.field)?;
        results.insert(call.alias.clone(), value);
    }
    Ok(results)
}
