//! # Literal Location Lists
//!
//! A `LocationList` describes the substitutable literal spans inside a
//! query's source text: a leading scalar (the highest external parameter id
//! seen in the query) followed by ordered `(length, position)` pairs, one per
//! literal.
//!
//! The list crosses pipeline stage boundaries through the metadata sidecar,
//! which only carries integers and lists of integers. The flattened encoding
//! is therefore a flat integer sequence: the scalar first, then one *length*
//! per span. Positions are deliberately not encoded -- after unflattening
//! they come back as [`UNKNOWN_POSITION`] placeholders. The round-trip is
//! lossy by design: span count, order, lengths, and the leading scalar
//! survive exactly; positions do not.

use crate::expr::{Span, UNKNOWN_POSITION};
use crate::meta::MetaValue;
use serde::{Deserialize, Serialize};

/// Ordered literal spans plus the highest external parameter id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationList {
    /// Highest `$n` parameter id referenced by the query, 0 if none.
    pub highest_extern_param_id: i64,
    spans: Vec<Span>,
}

impl LocationList {
    pub fn new(highest_extern_param_id: i64) -> Self {
        Self {
            highest_extern_param_id,
            spans: Vec::new(),
        }
    }

    /// Record the next literal span, in source order.
    pub fn push(&mut self, position: i32, length: i32) {
        self.spans.push(Span::new(position, length));
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    /// Number of recorded literal spans.
    pub fn count(&self) -> usize {
        self.spans.len()
    }

    /// Encode as a flat metadata list: `[scalar, len_0, len_1, ...]`.
    pub fn flatten(&self) -> MetaValue {
        let mut items = Vec::with_capacity(self.spans.len() + 1);
        items.push(MetaValue::Int(self.highest_extern_param_id));
        items.extend(self.spans.iter().map(|s| MetaValue::Int(s.length as i64)));
        MetaValue::List(items)
    }

    /// Decode a flattened list. Returns `None` when the payload is not the
    /// expected shape (wrong variant, missing scalar, non-integer entry).
    /// Positions come back as [`UNKNOWN_POSITION`].
    pub fn unflatten(value: &MetaValue) -> Option<Self> {
        let items = value.as_list()?;
        let (scalar, lengths) = items.split_first()?;
        let mut list = LocationList::new(scalar.as_int()?);
        for entry in lengths {
            list.push(UNKNOWN_POSITION, entry.as_int()? as i32);
        }
        Some(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_count_scalar_and_lengths() {
        let mut list = LocationList::new(3);
        list.push(14, 2);
        list.push(29, 5);
        list.push(40, 1);

        let back = LocationList::unflatten(&list.flatten()).unwrap();
        assert_eq!(back.count(), list.count());
        assert_eq!(back.highest_extern_param_id, 3);
        let lengths: Vec<i32> = back.spans().iter().map(|s| s.length).collect();
        assert_eq!(lengths, vec![2, 5, 1]);
    }

    #[test]
    fn test_round_trip_discards_positions() {
        let mut list = LocationList::new(0);
        list.push(14, 2);
        let back = LocationList::unflatten(&list.flatten()).unwrap();
        assert_eq!(back.spans()[0].position, UNKNOWN_POSITION);
    }

    #[test]
    fn test_empty_list_keeps_scalar() {
        let list = LocationList::new(9);
        let back = LocationList::unflatten(&list.flatten()).unwrap();
        assert_eq!(back.highest_extern_param_id, 9);
        assert_eq!(back.count(), 0);
    }

    #[test]
    fn test_unflatten_rejects_malformed_payloads() {
        assert!(LocationList::unflatten(&MetaValue::Int(1)).is_none());
        assert!(LocationList::unflatten(&MetaValue::List(vec![])).is_none());
        let nested = MetaValue::List(vec![MetaValue::Int(0), MetaValue::List(vec![])]);
        assert!(LocationList::unflatten(&nested).is_none());
    }
}
