//! # Extended Statistics Specifications
//!
//! A `StatisticsSpec` describes a multivariate statistics object to be
//! registered with the host: which table it covers, which columns or
//! expressions it spans, and which statistic kinds to compute. The actual
//! computation is the host's job; this module only carries the
//! specification to the catalog's creation primitive.

use crate::expr::{Expr, TableRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of multivariate statistics the host can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    /// Number-of-distinct-values counts over column combinations.
    Ndistinct,
    /// Functional dependency degrees between columns.
    Dependencies,
    /// Most-common-value lists over column combinations.
    Mcv,
}

impl StatKind {
    /// Every kind the synthesizer requests, in the host's canonical order.
    pub fn all() -> Vec<StatKind> {
        vec![StatKind::Ndistinct, StatKind::Dependencies, StatKind::Mcv]
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatKind::Ndistinct => "ndistinct",
            StatKind::Dependencies => "dependencies",
            StatKind::Mcv => "mcv",
        };
        f.write_str(s)
    }
}

/// One covered position: a plain column by name, or an expression tree
/// (from a functional index key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsTarget {
    Column(String),
    Expression(Expr),
}

/// Specification of a statistics object to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsSpec {
    pub source_table: TableRef,
    /// Covered positions, in source-index key order.
    pub entries: Vec<StatsTarget>,
    pub kinds: Vec<StatKind>,
}

impl StatisticsSpec {
    /// Identity string used by the host's duplicate-rejection rule: one
    /// statistics object per (table, entry list).
    pub fn identity(&self) -> String {
        use std::fmt::Write;
        let mut out = self.source_table.to_string();
        for entry in &self.entries {
            match entry {
                StatsTarget::Column(name) => {
                    let _ = write!(out, "/{}", name);
                }
                StatsTarget::Expression(expr) => {
                    let _ = write!(out, "/({:?})", expr);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_distinguishes_entry_order() {
        let ab = StatisticsSpec {
            source_table: TableRef::parse("t"),
            entries: vec![
                StatsTarget::Column("a".into()),
                StatsTarget::Column("b".into()),
            ],
            kinds: StatKind::all(),
        };
        let mut ba = ab.clone();
        ba.entries.reverse();
        assert_ne!(ab.identity(), ba.identity());
    }
}
