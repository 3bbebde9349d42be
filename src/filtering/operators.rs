//! Operator registry.
//!
//! Maps operator names used in filter objects to functions producing
//! Sea-Query expressions. The registry is an owned value: applications extend
//! or override it at startup through [`OperatorRegistry::register`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use sea_orm::sea_query::{BinOper, Condition, Expr, Func, SimpleExpr};
use thiserror::Error;

use crate::instance::Scalar;
use crate::query::{FieldRef, RelationRef};

/// Failure while applying an operator to its operands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperatorError {
    #[error("unknown operator \"{0}\"")]
    Unknown(String),
    #[error("To compare a value to NULL, use the unary is_null/is_not_null operators.")]
    NullComparison,
    #[error("expected an argument for this operator but none was given")]
    MissingArgument,
    #[error("{0}")]
    InvalidArgument(String),
}

/// A resolved operand.
#[derive(Debug, Clone)]
pub enum Operand {
    Column(FieldRef),
    Relation(RelationRef),
    Value(Scalar),
    List(Vec<Scalar>),
    /// A compiled nested filter, the argument of `has` and `any`
    Predicate(Condition),
    /// Raw SQL such as `CURRENT_TIMESTAMP`
    Expression(SimpleExpr),
}

impl Operand {
    /// The operand as a single SQL expression.
    ///
    /// # Errors
    /// Lists, relationships and predicates have no scalar form.
    pub fn expr(&self) -> Result<SimpleExpr, OperatorError> {
        match self {
            Self::Column(field) => Ok(field.expr()),
            Self::Value(value) => Ok(SimpleExpr::Value(value.clone().into())),
            Self::Expression(expr) => Ok(expr.clone()),
            Self::List(_) => Err(OperatorError::InvalidArgument(
                "expected a single value but got a list".to_string(),
            )),
            Self::Relation(relation) => Err(OperatorError::InvalidArgument(format!(
                "relationship \"{}\" can only be compared with the has or any operators",
                relation.name
            ))),
            Self::Predicate(_) => Err(OperatorError::InvalidArgument(
                "a nested filter is only valid with the has or any operators".to_string(),
            )),
        }
    }

    /// The operand as a list of SQL expressions, for `in`/`not_in`.
    ///
    /// # Errors
    /// Anything other than a list.
    pub fn exprs(&self) -> Result<Vec<SimpleExpr>, OperatorError> {
        match self {
            Self::List(values) => Ok(values
                .iter()
                .map(|value| SimpleExpr::Value(value.clone().into()))
                .collect()),
            _ => Err(OperatorError::InvalidArgument(
                "expected a list of values".to_string(),
            )),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Self::Value(Scalar::Null))
    }
}

pub type UnaryFn = dyn Fn(&Operand) -> Result<SimpleExpr, OperatorError> + Send + Sync;
pub type BinaryFn =
    dyn Fn(&Operand, &Operand) -> Result<SimpleExpr, OperatorError> + Send + Sync;

/// An operator and its arity.
#[derive(Clone)]
pub enum Operator {
    Unary(Arc<UnaryFn>),
    Binary(Arc<BinaryFn>),
}

impl Operator {
    pub fn unary<F>(f: F) -> Self
    where
        F: Fn(&Operand) -> Result<SimpleExpr, OperatorError> + Send + Sync + 'static,
    {
        Self::Unary(Arc::new(f))
    }

    pub fn binary<F>(f: F) -> Self
    where
        F: Fn(&Operand, &Operand) -> Result<SimpleExpr, OperatorError> + Send + Sync + 'static,
    {
        Self::Binary(Arc::new(f))
    }

    /// A binary operator rendered as `lhs <token> rhs`.
    pub fn infix(token: &'static str) -> Self {
        Self::binary(move |lhs, rhs| {
            Ok(Expr::expr(lhs.expr()?).binary(BinOper::Custom(token), rhs.expr()?))
        })
    }

    fn comparison(f: fn(Expr, SimpleExpr) -> SimpleExpr) -> Self {
        Self::binary(move |lhs, rhs| Ok(f(Expr::expr(lhs.expr()?), rhs.expr()?)))
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => f.write_str("Operator::Unary"),
            Self::Binary(_) => f.write_str("Operator::Binary"),
        }
    }
}

fn relation_exists(
    lhs: &Operand,
    rhs: &Operand,
    to_many: bool,
    name: &str,
) -> Result<SimpleExpr, OperatorError> {
    let Operand::Relation(relation) = lhs else {
        return Err(OperatorError::InvalidArgument(format!(
            "the {name} operator requires a relationship"
        )));
    };
    if relation.to_many != to_many {
        let expected = if to_many { "to-many" } else { "to-one" };
        return Err(OperatorError::InvalidArgument(format!(
            "the {name} operator requires a {expected} relationship but \"{}\" is not",
            relation.name
        )));
    }
    let Operand::Predicate(predicate) = rhs else {
        return Err(OperatorError::InvalidArgument(format!(
            "the {name} operator requires a nested filter object"
        )));
    };
    Ok(relation.exists(predicate.clone()))
}

/// Name to operator lookup table.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: HashMap<String, Operator>,
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorRegistry {
    /// A registry holding every built-in operator.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register("is_null", Operator::unary(|lhs| Ok(Expr::expr(lhs.expr()?).is_null())));
        registry.register(
            "is_not_null",
            Operator::unary(|lhs| Ok(Expr::expr(lhs.expr()?).is_not_null())),
        );

        for name in ["==", "eq", "equals", "equal_to"] {
            registry.register(name, Operator::comparison(Expr::eq::<SimpleExpr>));
        }
        for name in ["!=", "ne", "neq", "not_equal_to", "does_not_equal"] {
            registry.register(name, Operator::comparison(Expr::ne::<SimpleExpr>));
        }
        for name in [">", "gt"] {
            registry.register(name, Operator::comparison(Expr::gt::<SimpleExpr>));
        }
        for name in ["<", "lt"] {
            registry.register(name, Operator::comparison(Expr::lt::<SimpleExpr>));
        }
        for name in [">=", "ge", "gte", "geq"] {
            registry.register(name, Operator::comparison(Expr::gte::<SimpleExpr>));
        }
        for name in ["<=", "le", "lte", "leq"] {
            registry.register(name, Operator::comparison(Expr::lte::<SimpleExpr>));
        }

        registry.register(
            "like",
            Operator::binary(|lhs, rhs| {
                Ok(Expr::expr(lhs.expr()?).binary(BinOper::Like, rhs.expr()?))
            }),
        );
        registry.register(
            "not_like",
            Operator::binary(|lhs, rhs| {
                Ok(Expr::expr(lhs.expr()?).binary(BinOper::NotLike, rhs.expr()?))
            }),
        );
        registry.register(
            "ilike",
            Operator::binary(|lhs, rhs| {
                Ok(Expr::expr(Func::lower(lhs.expr()?))
                    .binary(BinOper::Like, Func::lower(rhs.expr()?)))
            }),
        );
        registry.register(
            "in",
            Operator::binary(|lhs, rhs| Ok(Expr::expr(lhs.expr()?).is_in(rhs.exprs()?))),
        );
        registry.register(
            "not_in",
            Operator::binary(|lhs, rhs| Ok(Expr::expr(lhs.expr()?).is_not_in(rhs.exprs()?))),
        );

        registry.register(
            "has",
            Operator::binary(|lhs, rhs| relation_exists(lhs, rhs, false, "has")),
        );
        registry.register(
            "any",
            Operator::binary(|lhs, rhs| relation_exists(lhs, rhs, true, "any")),
        );

        for token in ["<<", "<<=", ">>", ">>=", "<>", "&&"] {
            registry.register(token, Operator::infix(token));
        }

        registry
    }

    /// A registry with no operators at all.
    pub fn empty() -> Self {
        Self {
            operators: HashMap::new(),
        }
    }

    /// Add or replace an operator; the last registration wins.
    pub fn register(&mut self, name: impl Into<String>, operator: Operator) {
        self.operators.insert(name.into(), operator);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    /// # Errors
    /// `OperatorError::Unknown` for unregistered names.
    pub fn resolve(&self, name: &str) -> Result<&Operator, OperatorError> {
        self.operators
            .get(name)
            .ok_or_else(|| OperatorError::Unknown(name.to_string()))
    }

    /// Apply operator `name` to `lhs` and, for binary operators, `rhs`.
    ///
    /// `rhs` is `None` when the filter carried no argument at all and
    /// `Some(Operand::Value(Scalar::Null))` for an explicit null.
    ///
    /// # Errors
    /// Unknown operators, null or missing arguments for binary operators, and
    /// operand shapes the operator does not accept.
    pub fn create_operation(
        &self,
        name: &str,
        lhs: &Operand,
        rhs: Option<&Operand>,
    ) -> Result<SimpleExpr, OperatorError> {
        match self.resolve(name)? {
            Operator::Unary(f) => f(lhs),
            Operator::Binary(f) => match rhs {
                Some(rhs) if rhs.is_null() => Err(OperatorError::NullComparison),
                Some(rhs) => f(lhs, rhs),
                None => Err(OperatorError::MissingArgument),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, FieldKind, Join, Model, Relationship};
    use sea_orm::sea_query::{Alias, Query, QueryStatementWriter, SqliteQueryBuilder};

    fn age() -> Operand {
        Operand::Column(FieldRef {
            name: "age".into(),
            alias: "people".into(),
            column: "age".into(),
            kind: FieldKind::Integer,
        })
    }

    fn render(expr: SimpleExpr) -> String {
        Query::select()
            .expr(Expr::val(1))
            .from(Alias::new("people"))
            .and_where(expr)
            .to_string(SqliteQueryBuilder)
    }

    #[test]
    fn test_comparisons() {
        let registry = OperatorRegistry::new();
        let ten = Operand::Value(Scalar::Int(10));
        for (name, sql) in [
            ("eq", r#""people"."age" = 10"#),
            ("==", r#""people"."age" = 10"#),
            ("neq", r#""people"."age" <> 10"#),
            ("gt", r#""people"."age" > 10"#),
            ("geq", r#""people"."age" >= 10"#),
            ("lt", r#""people"."age" < 10"#),
            ("leq", r#""people"."age" <= 10"#),
        ] {
            let expr = registry.create_operation(name, &age(), Some(&ten)).unwrap();
            assert!(render(expr).contains(sql), "operator {name}");
        }
    }

    #[test]
    fn test_unary_ignores_argument() {
        let registry = OperatorRegistry::new();
        let expr = registry.create_operation("is_null", &age(), None).unwrap();
        assert!(render(expr).contains(r#""people"."age" IS NULL"#));
        let expr = registry
            .create_operation("is_not_null", &age(), Some(&Operand::Value(Scalar::Null)))
            .unwrap();
        assert!(render(expr).contains("IS NOT NULL"));
    }

    #[test]
    fn test_null_guard() {
        let registry = OperatorRegistry::new();
        let err = registry
            .create_operation("eq", &age(), Some(&Operand::Value(Scalar::Null)))
            .unwrap_err();
        assert_eq!(err, OperatorError::NullComparison);
    }

    #[test]
    fn test_missing_argument() {
        let registry = OperatorRegistry::new();
        let err = registry.create_operation("gt", &age(), None).unwrap_err();
        assert_eq!(err, OperatorError::MissingArgument);
    }

    #[test]
    fn test_unknown_operator() {
        let registry = OperatorRegistry::new();
        let err = registry
            .create_operation("bogus", &age(), Some(&Operand::Value(Scalar::Int(1))))
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown operator \"bogus\"");
    }

    #[test]
    fn test_in_requires_list() {
        let registry = OperatorRegistry::new();
        let list = Operand::List(vec![Scalar::Int(1), Scalar::Int(2)]);
        let expr = registry.create_operation("in", &age(), Some(&list)).unwrap();
        assert!(render(expr).contains("IN (1, 2)"));
        let err = registry
            .create_operation("in", &age(), Some(&Operand::Value(Scalar::Int(1))))
            .unwrap_err();
        assert!(matches!(err, OperatorError::InvalidArgument(_)));
    }

    #[test]
    fn test_has_on_to_many_is_rejected() {
        let person = Model::new("person", "people").field(Field::integer("id"));
        let comment = Model::new("comment", "comments")
            .field(Field::integer("id"))
            .field(Field::integer("author_id"));
        let rel = Relationship::to_many("comments", "comment", Join::reverse("author_id"));
        let relation = Operand::Relation(RelationRef::new(&person, "people", &rel, &comment, "c"));
        let predicate = Operand::Predicate(Condition::all());
        let registry = OperatorRegistry::new();
        assert!(registry.create_operation("any", &relation, Some(&predicate)).is_ok());
        assert!(matches!(
            registry.create_operation("has", &relation, Some(&predicate)),
            Err(OperatorError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_register_overrides_builtin() {
        let mut registry = OperatorRegistry::new();
        registry.register(
            "eq",
            Operator::binary(|lhs, _| Ok(Expr::expr(lhs.expr()?).is_null())),
        );
        registry.register(
            "is_set",
            Operator::unary(|lhs| Ok(Expr::expr(lhs.expr()?).is_not_null())),
        );
        let expr = registry
            .create_operation("eq", &age(), Some(&Operand::Value(Scalar::Int(3))))
            .unwrap();
        assert!(render(expr).contains("IS NULL"));
        assert!(registry.contains("is_set"));
    }

    #[test]
    fn test_network_operator_token() {
        let registry = OperatorRegistry::new();
        let expr = registry
            .create_operation("<<", &age(), Some(&Operand::Value(Scalar::Text("10.0.0.0/8".into()))))
            .unwrap();
        assert!(render(expr).contains("<< '10.0.0.0/8'"));
    }
}
