//! # Filtering, sorting and grouping
//!
//! Clients describe what they want with JSON filter objects, a `sort` list and
//! a `group` list. This module turns them into a [`Query`](crate::query::Query).
//!
//! ## Filter objects
//!
//! ```json
//! [
//!   {"name": "name", "op": "like", "val": "%s%"},
//!   {"or": [
//!     {"name": "age", "op": "lt", "val": 10},
//!     {"name": "comments", "op": "any", "val": {"name": "content", "op": "like", "val": "%cool%"}}
//!   ]}
//! ]
//! ```
//!
//! - `name` is a field, a relationship, or a `relation.field` path
//! - `op` is any operator known to the [`OperatorRegistry`]
//! - `val` is a literal, a list (`in`, `not_in`) or, for `has`/`any`, a nested filter
//! - `field` replaces `val` to compare two fields of the same row
//!
//! ## Operators
//!
//! | Operators | SQL |
//! |-----------|-----|
//! | `==`, `eq`, `equals`, `equal_to` | `=` |
//! | `!=`, `ne`, `neq`, `not_equal_to`, `does_not_equal` | `<>` |
//! | `>`, `gt`, `<`, `lt`, `>=`, `ge`, `gte`, `geq`, `<=`, `le`, `lte`, `leq` | comparisons |
//! | `like`, `not_like`, `ilike` | pattern matching |
//! | `in`, `not_in` | list membership |
//! | `is_null`, `is_not_null` | unary, no `val` |
//! | `has`, `any` | `EXISTS` over a to-one / to-many relationship |
//! | `<<`, `<<=`, `>>`, `>>=`, `<>`, `&&` | passed through to the backend |
//!
//! ## Sorting
//!
//! `sort=-age,author.name` sorts by age descending, then by the related
//! author's name. With no sort the primary key ascending is used.

pub mod filters;
pub mod operators;
pub mod search;

pub use filters::{
    Argument, FieldFilter, Filter, FilterCreationError, FilterParser, FilterParsingError, Target,
};
pub use operators::{Operand, Operator, OperatorError, OperatorRegistry};
pub use search::{Direction, Search, SearchError, SearchParams, SortSpec};
