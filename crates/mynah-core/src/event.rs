//! Change-notification event model.
//!
//! One event describes one create, field-level update, or delete of one
//! upstream object. The producer (the webhook endpoint, or the CLI ingest
//! command) deserializes and validates events before they reach the core;
//! the action is an external JSON tag on the payload:
//!
//! ```json
//! {"entity_type": "Defect", "object_id": "u-1", "created_ts_ms": 100,
//!  "action": "Created", "state": {"Name": "Login fails"}}
//! ```
//!
//! `created_ts_ms` is the authoritative ordering key, assigned upstream
//! when the user made the change; local arrival order is tracked by the
//! reorder buffer, not carried here.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

/// The three upstream notification actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    /// A new object was created; payload carries a full attribute snapshot.
    Created,
    /// Fields changed; payload carries per-field changes.
    Updated,
    /// The object was moved to the recycle bin (a delete, from the
    /// mirror's point of view).
    Recycled,
}

impl ChangeAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Recycled => "Recycled",
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One validated change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Tracked entity type, e.g. `Defect`.
    pub entity_type: String,
    /// Stable object identifier (the mirror table key).
    pub object_id: String,
    /// Millisecond timestamp assigned by the upstream service when the
    /// change was made. Authoritative ordering key.
    pub created_ts_ms: i64,
    /// Acting user, when the producer knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(flatten)]
    pub payload: ChangePayload,
}

impl ChangeEvent {
    #[must_use]
    pub const fn action(&self) -> ChangeAction {
        match self.payload {
            ChangePayload::Created { .. } => ChangeAction::Created,
            ChangePayload::Updated { .. } => ChangeAction::Updated,
            ChangePayload::Recycled => ChangeAction::Recycled,
        }
    }
}

/// Action-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ChangePayload {
    /// Full attribute snapshot, keyed by (unsanitized) attribute name.
    Created { state: BTreeMap<String, Json> },
    /// Field-level changes.
    Updated { changes: Vec<FieldChange> },
    /// No payload; the object id is sufficient.
    Recycled,
}

/// One field-level change inside an `Updated` event.
///
/// Carries either an absolute change (`value`/`old_value`) or a delta on a
/// multi-valued field (`added`/`removed` collection members). Both `value`
/// and `old_value` absent marks the delta form; an explicit
/// `"value": null` is an absolute change to null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FieldChange {
    /// Upstream field name (unsanitized).
    pub name: String,
    /// Human-facing label for outcome records; falls back to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<Json>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<Json>>,
}

impl FieldChange {
    /// Whether this is a collection delta rather than an absolute change.
    #[must_use]
    pub const fn is_delta(&self) -> bool {
        self.value.is_none() && self.old_value.is_none()
    }

    /// Net membership change: `|added| - |removed|`.
    #[must_use]
    pub fn net_delta(&self) -> i64 {
        let added = self.added.as_ref().map_or(0, Vec::len);
        let removed = self.removed.as_ref().map_or(0, Vec::len);
        i64::try_from(added).unwrap_or(i64::MAX) - i64::try_from(removed).unwrap_or(i64::MAX)
    }

    /// Display label for outcome records.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}
