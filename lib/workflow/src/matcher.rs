//! Trigger matching: filter predicates evaluated against event payloads.
//!
//! Matching is pure and referentially transparent: the same (filters,
//! event) pair always produces the same verdict, which keeps dry-run
//! traces reproducible. Filter keys are ANDed; a key whose value is a
//! set matches when the event's field is a member (OR within the key).
//! A field the event lacks fails its filter — conservative no-match,
//! never a fault.

use serde::de::{Deserializer, Error as DeError};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;

/// A normalized filter value.
///
/// The editor stores either a scalar or an array per filter key; both
/// are normalized into a set at deserialization time so the matcher
/// core only ever reasons about set membership.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FilterSet(BTreeSet<String>);

impl FilterSet {
    /// Creates a filter set from any collection of values.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    /// Creates a single-value filter.
    #[must_use]
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::from_values([value.into()])
    }

    /// Returns true when `value` is a member of the set.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.0.contains(value)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when the set is empty (matches nothing).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Converts a scalar JSON value to its comparable string form.
///
/// Objects, arrays and null have no scalar form and yield `None`.
fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

impl Serialize for FilterSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for FilterSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        let values = match raw {
            JsonValue::Array(values) => values,
            scalar => vec![scalar],
        };

        let mut set = BTreeSet::new();
        for value in &values {
            let s = scalar_to_string(value)
                .ok_or_else(|| DeError::custom("filter values must be scalars"))?;
            set.insert(s);
        }
        Ok(Self(set))
    }
}

/// Filter predicates for an event-driven trigger.
///
/// Every configured key must be satisfied for the event to match.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TriggerFilters {
    /// Task status filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FilterSet>,
    /// Project phase filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<FilterSet>,
    /// Assignee filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<FilterSet>,
    /// Priority filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<FilterSet>,
    /// Task type filter.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FilterSet>,
}

impl TriggerFilters {
    /// Returns true when no keys are configured (match-all).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.phase.is_none()
            && self.assignee.is_none()
            && self.priority.is_none()
            && self.kind.is_none()
    }

    /// Evaluates the filters against an event payload.
    ///
    /// Each configured key is checked against the payload field of the
    /// same name; all must pass. Missing or non-scalar event fields
    /// fail their filter.
    #[must_use]
    pub fn matches(&self, event_data: &JsonValue) -> bool {
        let keys = [
            ("status", &self.status),
            ("phase", &self.phase),
            ("assignee", &self.assignee),
            ("priority", &self.priority),
            ("type", &self.kind),
        ];

        keys.iter().all(|(field, filter)| match filter {
            None => true,
            Some(set) => event_data
                .get(field)
                .and_then(scalar_to_string)
                .is_some_and(|v| set.contains(&v)),
        })
    }
}

/// Evaluates optional filters against an event payload.
///
/// Absent filters match every event of the trigger type.
#[must_use]
pub fn matches(filters: Option<&TriggerFilters>, event_data: &JsonValue) -> bool {
    match filters {
        None => true,
        Some(f) => f.matches(event_data),
    }
}
