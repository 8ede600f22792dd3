//! Suggestion identifiers — the Paxos proposal numbers.
//!
//! A [`SuggestionId`] is a pair of a monotonically advancing round
//! counter and a tie-breaking proposer id. Two proposers can never mint
//! the same id for distinct proposals because the `id` component is
//! unique per proposer.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The Paxos proposal number.
///
/// Ordered lexicographically on `(integer, id)`: `a > b` iff
/// `a.integer > b.integer`, or the integers are equal and `a.id` is
/// lexicographically greater than `b.id`. Equality is componentwise.
///
/// # Invariants
///
/// - Any id emitted by a given proposer in a given epoch is strictly
///   greater than all ids it previously emitted.
/// - [`increment`](Self::increment) preserves the `id` component and is
///   strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuggestionId {
    /// Monotonically advancing round counter.
    pub integer: u64,
    /// Tie-breaking proposer id, unique per proposer.
    pub id: String,
}

impl SuggestionId {
    /// Create a suggestion id from its two components.
    #[must_use]
    pub fn new(integer: u64, id: impl Into<String>) -> Self {
        Self {
            integer,
            id: id.into(),
        }
    }

    /// The first suggestion id a proposer with this uid may use.
    #[must_use]
    pub fn initial(uid: impl Into<String>) -> Self {
        Self::new(0, uid)
    }

    /// The next suggestion id in this proposer's sequence.
    ///
    /// Strictly greater than `self`; the `id` component is preserved.
    #[must_use]
    pub fn increment(&self) -> Self {
        Self {
            integer: self.integer + 1,
            id: self.id.clone(),
        }
    }
}

impl PartialOrd for SuggestionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SuggestionId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.integer
            .cmp(&other.integer)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Injective on the `(integer, id)` domain: the integer part contains
/// no `/`, so the first `/` always separates the two components.
impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.integer, self.id)
    }
}

/// The proposal an acceptor most recently accepted. Persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastAccepted<V> {
    /// The suggestion id the acceptance was for.
    pub sid: SuggestionId,
    /// The accepted value.
    pub value: V,
}

impl<V> LastAccepted<V> {
    /// Pair a suggestion id with its accepted value.
    #[must_use]
    pub fn new(sid: SuggestionId, value: V) -> Self {
        Self { sid, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_integer_first() {
        let low = SuggestionId::new(3, "z");
        let high = SuggestionId::new(4, "a");
        assert!(high > low);
    }

    #[test]
    fn breaks_ties_lexicographically() {
        let a = SuggestionId::new(7, "node-a");
        let b = SuggestionId::new(7, "node-b");
        assert!(b > a);
        assert_eq!(a, SuggestionId::new(7, "node-a"));
    }

    #[test]
    fn increment_is_strictly_greater_and_keeps_id() {
        let sid = SuggestionId::new(41, "uid-1");
        let next = sid.increment();
        assert!(next > sid);
        assert_eq!(next.id, sid.id);
        assert_eq!(next.integer, 42);
    }

    #[test]
    fn display_is_injective() {
        // Components that would collide under naive concatenation.
        let a = SuggestionId::new(1, "23");
        let b = SuggestionId::new(12, "3");
        assert_ne!(a.to_string(), b.to_string());

        let c = SuggestionId::new(5, "x/y");
        assert_eq!(c.to_string(), "5/x/y");
        assert_ne!(c.to_string(), SuggestionId::new(5, "x").to_string());
    }

    #[test]
    fn round_trips_through_serde() {
        let sid = SuggestionId::new(9, "f81d4fae-7dec-11d0-a765-00a0c91e6bf6");
        let json = serde_json::to_string(&sid).unwrap();
        let back: SuggestionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sid);
    }
}
