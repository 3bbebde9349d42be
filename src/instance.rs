//! Typed rows.
//!
//! An [`Instance`] is one row of a registered model: its collection name,
//! typed attribute values and relationship assignments that are waiting to be
//! persisted by the [`Store`](crate::store::Store).

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use sea_orm::{DbErr, QueryResult, Value};
use serde_json::Value as Json;
use uuid::Uuid;

use crate::dates;
use crate::schema::{FieldKind, Model};

/// A single typed value read from or written to a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Time(NaiveTime),
    Uuid(Uuid),
    Json(Json),
}

/// A JSON value that does not fit the declared kind of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoercionError {
    pub kind: FieldKind,
    pub value: String,
}

impl fmt::Display for CoercionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot interpret {} as {:?}", self.value, self.kind)
    }
}

impl std::error::Error for CoercionError {}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON literal without any knowledge of the target column.
    pub fn from_json(value: &Json) -> Self {
        match value {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(*b),
            Json::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Float(n.as_f64().unwrap_or(f64::NAN)), Self::Int),
            Json::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.clone()),
        }
    }

    /// Convert a JSON literal for a column of the given kind.
    ///
    /// Strings for temporal kinds go through the permissive date parser; an
    /// empty string is treated as null.
    ///
    /// # Errors
    /// `CoercionError` when a temporal or uuid string cannot be parsed.
    #[allow(clippy::cast_precision_loss)]
    pub fn coerce(value: &Json, kind: FieldKind) -> Result<Self, CoercionError> {
        let Json::String(text) = value else {
            return Ok(match (kind, Self::from_json(value)) {
                (FieldKind::Float, Self::Int(i)) => Self::Float(i as f64),
                (FieldKind::Json, _) => Self::Json(value.clone()),
                (_, scalar) => scalar,
            });
        };
        if kind.is_temporal() && text.trim().is_empty() {
            return Ok(Self::Null);
        }
        let fail = || CoercionError {
            kind,
            value: text.clone(),
        };
        match kind {
            FieldKind::Date => dates::parse_date(text).map(Self::Date).ok_or_else(fail),
            FieldKind::DateTime => dates::parse_datetime(text)
                .map(Self::DateTime)
                .ok_or_else(fail),
            FieldKind::DateTimeTz => dates::parse_datetime_tz(text)
                .map(Self::DateTimeTz)
                .ok_or_else(fail),
            FieldKind::Time => dates::parse_time(text).map(Self::Time).ok_or_else(fail),
            FieldKind::Uuid => Uuid::parse_str(text).map(Self::Uuid).map_err(|_| fail()),
            _ => Ok(Self::Text(text.clone())),
        }
    }

    /// Parse the string form of a primary key.
    pub fn parse_key(text: &str, kind: FieldKind) -> Option<Self> {
        match kind {
            FieldKind::Integer => text.parse().ok().map(Self::Int),
            FieldKind::Uuid => Uuid::parse_str(text).ok().map(Self::Uuid),
            _ => Self::coerce(&Json::String(text.to_string()), kind).ok(),
        }
    }

    /// JSON rendering; temporal values use ISO-8601.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Null => Json::Null,
            Self::Bool(b) => Json::Bool(*b),
            Self::Int(i) => Json::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
            Self::Text(s) => Json::String(s.clone()),
            Self::Date(d) => Json::String(d.format("%Y-%m-%d").to_string()),
            Self::DateTime(dt) => Json::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Self::DateTimeTz(dt) => Json::String(dt.to_rfc3339()),
            Self::Time(t) => Json::String(t.format("%H:%M:%S%.f").to_string()),
            Self::Uuid(u) => Json::String(u.to_string()),
            Self::Json(v) => v.clone(),
        }
    }

    /// The database value, typed after `kind` when null.
    pub fn to_value(&self, kind: FieldKind) -> Value {
        match self {
            Self::Null => match kind {
                FieldKind::Integer => Value::BigInt(None),
                FieldKind::Float => Value::Double(None),
                FieldKind::Text => Value::String(None),
                FieldKind::Boolean => Value::Bool(None),
                FieldKind::Date => Value::ChronoDate(None),
                FieldKind::DateTime => Value::ChronoDateTime(None),
                FieldKind::DateTimeTz => Value::ChronoDateTimeWithTimeZone(None),
                FieldKind::Time => Value::ChronoTime(None),
                FieldKind::Uuid => Value::Uuid(None),
                FieldKind::Json => Value::Json(None),
            },
            other => other.clone().into(),
        }
    }

    /// Read one column of a result row.
    ///
    /// # Errors
    /// Propagates decoding failures from the driver.
    pub fn read(row: &QueryResult, column: &str, kind: FieldKind) -> Result<Self, DbErr> {
        Ok(match kind {
            FieldKind::Integer => row
                .try_get_by::<Option<i64>, _>(column)?
                .map_or(Self::Null, Self::Int),
            FieldKind::Float => row
                .try_get_by::<Option<f64>, _>(column)?
                .map_or(Self::Null, Self::Float),
            FieldKind::Text => row
                .try_get_by::<Option<String>, _>(column)?
                .map_or(Self::Null, Self::Text),
            FieldKind::Boolean => row
                .try_get_by::<Option<bool>, _>(column)?
                .map_or(Self::Null, Self::Bool),
            FieldKind::Date => row
                .try_get_by::<Option<NaiveDate>, _>(column)?
                .map_or(Self::Null, Self::Date),
            FieldKind::DateTime => row
                .try_get_by::<Option<NaiveDateTime>, _>(column)?
                .map_or(Self::Null, Self::DateTime),
            FieldKind::DateTimeTz => row
                .try_get_by::<Option<DateTime<FixedOffset>>, _>(column)?
                .map_or(Self::Null, Self::DateTimeTz),
            FieldKind::Time => row
                .try_get_by::<Option<NaiveTime>, _>(column)?
                .map_or(Self::Null, Self::Time),
            FieldKind::Uuid => row
                .try_get_by::<Option<Uuid>, _>(column)?
                .map_or(Self::Null, Self::Uuid),
            FieldKind::Json => row
                .try_get_by::<Option<Json>, _>(column)?
                .map_or(Self::Null, Self::Json),
        })
    }
}

impl From<Scalar> for Value {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Null => Value::String(None),
            Scalar::Bool(b) => b.into(),
            Scalar::Int(i) => i.into(),
            Scalar::Float(f) => f.into(),
            Scalar::Text(s) => s.into(),
            Scalar::Date(d) => d.into(),
            Scalar::DateTime(dt) => dt.into(),
            Scalar::DateTimeTz(dt) => dt.into(),
            Scalar::Time(t) => t.into(),
            Scalar::Uuid(u) => u.into(),
            Scalar::Json(v) => v.into(),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Json::String(s) => f.write_str(&s),
            Json::Null => f.write_str("null"),
            other => write!(f, "{other}"),
        }
    }
}

/// Relationship values assigned to an instance before it is saved.
#[derive(Debug, Clone, PartialEq)]
pub enum Related {
    One(Option<Instance>),
    Many(Vec<Instance>),
}

impl Related {
    pub fn instances(&self) -> Vec<&Instance> {
        match self {
            Self::One(one) => one.iter().collect(),
            Self::Many(many) => many.iter().collect(),
        }
    }
}

/// One row of a registered model.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    collection: String,
    attributes: BTreeMap<String, Scalar>,
    related: BTreeMap<String, Related>,
}

impl Instance {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            attributes: BTreeMap::new(),
            related: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set(field, value);
        self
    }

    /// Decode a result row, one column per model field.
    ///
    /// # Errors
    /// Propagates decoding failures from the driver.
    pub fn from_row(model: &Model, row: &QueryResult) -> Result<Self, DbErr> {
        let mut instance = Self::new(model.collection_name());
        for field in model.fields() {
            let value = Scalar::read(row, &field.column, field.kind)?;
            instance.attributes.insert(field.name.clone(), value);
        }
        Ok(instance)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn get(&self, field: &str) -> Option<&Scalar> {
        self.attributes.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Scalar>) {
        self.attributes.insert(field.into(), value.into());
    }

    pub fn attributes(&self) -> &BTreeMap<String, Scalar> {
        &self.attributes
    }

    pub fn assign(&mut self, relationship: impl Into<String>, related: Related) {
        self.related.insert(relationship.into(), related);
    }

    /// Relationship assignments not yet written to the database.
    pub fn assigned(&self) -> &BTreeMap<String, Related> {
        &self.related
    }

    /// The primary key value; `None` while any key column is unset.
    pub fn primary_key_value(&self, model: &Model) -> Option<Vec<Scalar>> {
        model
            .primary_key_names()
            .iter()
            .map(|name| self.get(name).filter(|v| !v.is_null()).cloned())
            .collect()
    }

    /// The JSON API `id`: the primary key rendered as a string, with
    /// composite keys joined by commas.
    pub fn id_string(&self, model: &Model) -> Option<String> {
        self.primary_key_value(model).map(|values| {
            values
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        })
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(value: NaiveDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<Uuid> for Scalar {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}
