//! # Scalar Expressions
//!
//! This module defines the scalar expression trees that flow through the
//! pipeline: predicates and target lists on analyzed queries, join conditions
//! on candidate plan fragments, and the expression keys of functional indexes.
//!
//! Two details matter to the interceptors built on top of this model:
//!
//! - **Literal spans**: every literal carries the `(position, length)` span it
//!   occupied in the query source text. The fingerprint propagator records
//!   these spans so literals can later be redacted or normalized without
//!   re-parsing the query.
//! - **The row-identity pseudo-variable**: `Expr::RowIdentity` is a reserved
//!   marker meaning "this output position carries per-row identity tracking".
//!   A plan fragment whose output references it must not be wrapped by a
//!   pass-through node, because the wrapper would break the identity chain.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Reference to a relation by qualified name. Doubles as the dot-qualified
/// object name used by the direct statistics entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse a dot-qualified name. An unqualified name lands in the `public`
    /// schema, matching the host engine's default search path.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new("public", qualified),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Reference to a column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
    pub index: u32,
}

impl ColumnRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
            index: 0,
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref t) = self.table {
            write!(f, "{}.{}", t, self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Constant values appearing in queries and result rows.
///
/// Uses `OrderedFloat` for `f64` so scalar values can serve as hash-map keys
/// (the in-memory join executor keys its build table on them).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
        }
    }
}

/// Position marker for "the original location is not recoverable".
pub const UNKNOWN_POSITION: i32 = -1;

/// Byte span of a token in the query source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset into the source text, or [`UNKNOWN_POSITION`].
    pub position: i32,
    /// Length of the token in bytes.
    pub length: i32,
}

impl Span {
    pub fn new(position: i32, length: i32) -> Self {
        Self { position, length }
    }

    pub fn unknown(length: i32) -> Self {
        Self {
            position: UNKNOWN_POSITION,
            length,
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    /// Reference to a column of an input relation.
    Column(ColumnRef),
    /// Reserved per-row identity marker (see module docs).
    RowIdentity,
    /// External parameter supplied by the client (`$n`).
    ExternParam(u32),
    /// Constant literal with its span in the query source text.
    Literal { value: ScalarValue, span: Span },
    /// Binary operation (`a + b`, `x = y`, `price > 100`).
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (`NOT flag`, `-value`, `IS NULL`).
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// Named function call. Functional index keys are stored as these.
    Function { name: String, args: Vec<Expr> },
    /// Flat conjunction, avoiding nested binary AND trees.
    And(Vec<Expr>),
    /// Flat disjunction.
    Or(Vec<Expr>),
}

impl Expr {
    pub fn literal(value: ScalarValue, position: i32, length: i32) -> Self {
        Expr::Literal {
            value,
            span: Span::new(position, length),
        }
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column(ColumnRef::named(name))
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::RowIdentity | Expr::ExternParam(_) | Expr::Literal { .. } => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Whether any part of this expression is the row-identity marker.
    pub fn references_row_identity(&self) -> bool {
        match self {
            Expr::RowIdentity => true,
            Expr::Column(_) | Expr::ExternParam(_) | Expr::Literal { .. } => false,
            Expr::BinaryOp { left, right, .. } => {
                left.references_row_identity() || right.references_row_identity()
            }
            Expr::UnaryOp { operand, .. } => operand.references_row_identity(),
            Expr::Function { args, .. } => args.iter().any(Expr::references_row_identity),
            Expr::And(exprs) | Expr::Or(exprs) => {
                exprs.iter().any(Expr::references_row_identity)
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

/// Unary operators for boolean logic and null checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types. Only inner joins qualify for pass-through wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_qualified_name() {
        assert_eq!(TableRef::parse("s.t"), TableRef::new("s", "t"));
        assert_eq!(TableRef::parse("t"), TableRef::new("public", "t"));
    }

    #[test]
    fn test_references_row_identity() {
        let plain = Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(Expr::column("a")),
            right: Box::new(Expr::literal(ScalarValue::Int64(1), 10, 1)),
        };
        assert!(!plain.references_row_identity());

        let tagged = Expr::Function {
            name: "coalesce".into(),
            args: vec![Expr::column("a"), Expr::RowIdentity],
        };
        assert!(tagged.references_row_identity());
    }
}
