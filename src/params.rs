//! Query string parameters of collection and resource requests.
//!
//! | Parameter | Example |
//! |-----------|---------|
//! | `filter[objects]` | `[{"name":"age","op":"gt","val":18}]` |
//! | `filter[<field>]` | `filter[id]=1,2` or `filter[author]=3` |
//! | `filter[single]` | `1` to require exactly one result |
//! | `sort` | `-age,name` |
//! | `group` | `age` |
//! | `include` | `comments,comments.author` |
//! | `fields[<type>]` | `fields[person]=name,comments` |
//! | `page[number]`, `page[size]` | `2`, `20` |
//! | `ignorecase` | `1` |

use std::collections::{BTreeMap, BTreeSet};

use axum::extract::Query;
use axum::http::Uri;
use serde::Deserialize;
use serde_json::{Value, json};
use serde_with::formats::CommaSeparator;
use serde_with::{StringWithSeparator, serde_as};
use thiserror::Error;

use crate::filtering::{SearchParams, SortSpec};
use crate::instance::Scalar;
use crate::schema::{FieldKind, Model, Schema};
use crate::serialization::SerializeOptions;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("Unable to decode data for parameter {param}: {message}")]
    InvalidJson { param: String, message: String },
    #[error("parameter {0} must be a JSON list")]
    NotAList(String),
    #[error("parameter {param} must be a non-negative integer, got \"{value}\"")]
    InvalidNumber { param: String, value: String },
    #[error("parameter {param} must be 0 or 1, got \"{value}\"")]
    InvalidFlag { param: String, value: String },
    #[error("Invalid include \"{0}\"")]
    InvalidInclude(String),
    #[error("{0}")]
    Malformed(String),
}

#[serde_as]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryParams {
    #[serde(rename = "filter[objects]")]
    pub filter_objects: Option<String>,
    #[serde(rename = "filter[single]")]
    pub filter_single: Option<String>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, SortSpec>>")]
    pub sort: Option<Vec<SortSpec>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    pub group: Option<Vec<String>>,
    #[serde_as(as = "Option<StringWithSeparator::<CommaSeparator, String>>")]
    pub include: Option<Vec<String>>,
    #[serde(rename = "page[number]")]
    pub page_number: Option<String>,
    #[serde(rename = "page[size]")]
    pub page_size: Option<String>,
    pub ignorecase: Option<String>,
    /// `filter[<field>]` and `fields[<type>]` entries, plus anything unknown
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// The `x` of a `prefix[x]` parameter name.
fn bracketed<'k>(key: &'k str, prefix: &str) -> Option<&'k str> {
    key.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')
        .filter(|inner| !inner.is_empty())
}

fn comma_list(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .collect()
}

fn flag(param: &str, value: Option<&String>) -> Result<bool, ParamsError> {
    match value.map(|value| value.trim()) {
        None | Some("" | "0" | "false") => Ok(false),
        Some("1" | "true") => Ok(true),
        Some(other) => Err(ParamsError::InvalidFlag {
            param: param.to_string(),
            value: other.to_string(),
        }),
    }
}

fn number(param: &str, value: Option<&String>) -> Result<Option<u64>, ParamsError> {
    value
        .map(|value| {
            value.trim().parse().map_err(|_| ParamsError::InvalidNumber {
                param: param.to_string(),
                value: value.clone(),
            })
        })
        .transpose()
}

/// Values as JSON literals of `kind`, left as text when unparseable.
fn literals(kind: FieldKind, values: &[&str]) -> Value {
    Value::Array(
        values
            .iter()
            .map(|value| {
                Scalar::parse_key(value, kind).map_or_else(|| json!(value), |key| key.to_json())
            })
            .collect(),
    )
}

impl QueryParams {
    /// Parse the query string of `uri`.
    ///
    /// # Errors
    /// `Malformed` when the query string does not decode, including
    /// unparseable `sort` entries.
    pub fn from_uri(uri: &Uri) -> Result<Self, ParamsError> {
        Query::<Self>::try_from_uri(uri)
            .map(|Query(params)| params)
            .map_err(|rejection| ParamsError::Malformed(rejection.body_text()))
    }

    /// Filter objects from `filter[objects]` followed by the simple
    /// `filter[<name>]` filters.
    ///
    /// A simple filter on an attribute becomes an `in` over its comma
    /// separated values; on a relationship it matches related primary keys.
    ///
    /// # Errors
    /// `filter[objects]` that is not a JSON list.
    pub fn filters(&self, schema: &Schema, model: &Model) -> Result<Vec<Value>, ParamsError> {
        let mut filters = match &self.filter_objects {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str(raw) {
                Ok(Value::Array(filters)) => filters,
                Ok(_) => return Err(ParamsError::NotAList("filter[objects]".to_string())),
                Err(err) => {
                    return Err(ParamsError::InvalidJson {
                        param: "filter[objects]".to_string(),
                        message: err.to_string(),
                    });
                }
            },
        };

        for (key, value) in &self.extra {
            let Some(name) = bracketed(key, "filter") else {
                continue;
            };
            let values = comma_list(value);
            if let Some(field) = model.find_field(name) {
                let val = literals(field.kind, &values);
                filters.push(json!({"name": name, "op": "in", "val": val}));
            } else if let Ok((relationship, related)) = schema.resolve_relationship(model, name) {
                let op = if relationship.to_many { "any" } else { "has" };
                filters.push(json!({
                    "name": name,
                    "op": op,
                    "val": {
                        "name": related.primary_field().name,
                        "op": "in",
                        "val": literals(related.primary_field().kind, &values),
                    },
                }));
            } else {
                filters.push(json!({"name": name, "op": "in", "val": values}));
            }
        }
        Ok(filters)
    }

    /// Everything the query builder needs.
    ///
    /// # Errors
    /// As for [`QueryParams::filters`]; a malformed `ignorecase`.
    pub fn search_params(&self, schema: &Schema, model: &Model) -> Result<SearchParams, ParamsError> {
        Ok(SearchParams {
            filters: self.filters(schema, model)?,
            sort: self.sort.clone().unwrap_or_default(),
            group_by: self.group.clone().unwrap_or_default(),
            ignorecase: flag("ignorecase", self.ignorecase.as_ref())?,
        })
    }

    /// Whether `filter[single]=1` asks for exactly one result.
    ///
    /// # Errors
    /// Values other than 0 or 1.
    pub fn single(&self) -> Result<bool, ParamsError> {
        flag("filter[single]", self.filter_single.as_ref())
    }

    /// # Errors
    /// Non-numeric page parameters.
    pub fn page(&self) -> Result<(Option<u64>, Option<u64>), ParamsError> {
        Ok((
            number("page[number]", self.page_number.as_ref())?,
            number("page[size]", self.page_size.as_ref())?,
        ))
    }

    /// Requested sparse fieldsets keyed by collection.
    pub fn fields(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.extra
            .iter()
            .filter_map(|(key, value)| {
                let collection = bracketed(key, "fields")?;
                let names = comma_list(value).into_iter().map(str::to_string).collect();
                Some((collection.to_string(), names))
            })
            .collect()
    }

    /// Include paths and fieldsets, with every include path checked against
    /// the relationships of `model`.
    ///
    /// # Errors
    /// `InvalidInclude` for a path through an unknown relationship.
    pub fn serialize_options(&self, schema: &Schema, model: &Model) -> Result<SerializeOptions, ParamsError> {
        if let Some(paths) = &self.include {
            for path in paths {
                validate_include(schema, model, path)?;
            }
        }
        Ok(SerializeOptions {
            include: self.include.clone(),
            fields: self.fields(),
        })
    }
}

/// Check that every segment of a dotted include path is a relationship.
///
/// # Errors
/// `InvalidInclude` naming the whole path.
pub fn validate_include(schema: &Schema, model: &Model, path: &str) -> Result<(), ParamsError> {
    let mut current = model;
    for segment in path.split('.') {
        let (_, related) = schema
            .resolve_relationship(current, segment)
            .map_err(|_| ParamsError::InvalidInclude(path.to_string()))?;
        current = related;
    }
    Ok(())
}
