//! # Metadata Sidecar
//!
//! Extensions frequently need to attach auxiliary values to a query or plan
//! object at one pipeline stage and read them back at a later one. The host
//! engine offers no fields for this, so each query/plan node carries a
//! `MetaMap`: a side-table of string-keyed, typed payloads owned by the node
//! and destroyed with it.
//!
//! ## Duplicate-key policy
//!
//! `attach` takes an explicit `replace_on_duplicate` flag. With `false`, an
//! attach on an existing key is a no-op that returns `false` -- callers that
//! care must check the return value. This is how a once-set value (e.g. a
//! query fingerprint set by the first interceptor in a chain) is protected
//! from being silently overwritten by later interceptors.
//!
//! ## Payloads
//!
//! Payloads come from a small closed set of variants rather than an
//! open-ended dynamic type, keeping the "attach anything, look up by key"
//! contract statically checkable. The sidecar never interprets payload
//! contents; the one structured encoding layered on top of it (the flattened
//! location list) lives in [`crate::location`].
//!
//! Keys are namespaced by convention: `"extension-name:field-name"`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A metadata payload: a scalar integer or a nested list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetaValue {
    Int(i64),
    List(Vec<MetaValue>),
}

impl MetaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            MetaValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Some(items),
            MetaValue::Int(_) => None,
        }
    }
}

/// Keyed metadata attached to a single query or plan node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaMap {
    entries: HashMap<String, MetaValue>,
}

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `value` under `key`.
    ///
    /// Returns `true` if the value was stored. If the key already exists and
    /// `replace_on_duplicate` is `false`, nothing is mutated and `false` is
    /// returned -- insertion failure is an expected outcome, not an error.
    pub fn attach(&mut self, key: &str, value: MetaValue, replace_on_duplicate: bool) -> bool {
        if !replace_on_duplicate && self.entries.contains_key(key) {
            return false;
        }
        self.entries.insert(key.to_string(), value);
        true
    }

    /// Look up a key. Absence is a normal outcome callers must branch on;
    /// a key that was never inserted yields `None`, never a default value.
    pub fn lookup(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
