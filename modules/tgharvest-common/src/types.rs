use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single fetched message, kept as the JSON object the source delivered.
pub type MessageRecord = serde_json::Map<String, Value>;

/// Sequence number of a record, if it carries a usable `id`.
///
/// Accepts integer ids and numeric strings (older logs stringified every
/// scalar before writing).
pub fn record_id(record: &Value) -> Option<i64> {
    match record.get("id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// --- Entity references ---

/// How a member is addressed on the platform: by canonical numeric id or by handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Id(i64),
    Handle(String),
}

impl EntityRef {
    /// Purely numeric identifiers are canonical ids, everything else is a handle.
    pub fn parse(member: &str) -> Self {
        let member = member.trim();
        if is_numeric_id(member) {
            if let Ok(id) = member.parse() {
                return EntityRef::Id(id);
            }
        }
        EntityRef::Handle(member.to_string())
    }

    pub fn is_handle(&self) -> bool {
        matches!(self, EntityRef::Handle(_))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Id(id) => write!(f, "{id}"),
            EntityRef::Handle(handle) => f.write_str(handle),
        }
    }
}

/// True for non-empty strings made only of ASCII digits.
pub fn is_numeric_id(member: &str) -> bool {
    !member.is_empty() && member.chars().all(|c| c.is_ascii_digit())
}

// --- Profiles ---

/// A resolved platform entity. Written one-per-line to a group's profile cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Remaining platform attributes, string-normalized.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, String>,
}

impl Profile {
    /// Build a profile from a raw entity object as returned by the platform.
    /// Returns `None` when the object has no usable numeric `id`.
    pub fn from_entity(entity: &Value) -> Option<Self> {
        let id = record_id(entity)?;
        let object = entity.as_object()?;
        let username = object
            .get("username")
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        let attributes = object
            .iter()
            .filter(|(key, _)| key.as_str() != "id" && key.as_str() != "username")
            .filter_map(|(key, value)| stringify_value(value).map(|v| (key.clone(), v)))
            .collect();

        Some(Self {
            id,
            username,
            attributes,
        })
    }

    /// Handles are case-insensitive on the platform.
    pub fn matches_handle(&self, handle: &str) -> bool {
        self.username
            .as_deref()
            .is_some_and(|u| u.eq_ignore_ascii_case(handle.trim_start_matches('@')))
    }

    pub fn canonical_id(&self) -> String {
        self.id.to_string()
    }

    /// The profile as a JSON object, for injecting into message records.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Render a JSON value as a flat string. Nulls are dropped, strings kept
/// verbatim, nested objects and arrays rendered as compact JSON.
pub fn stringify_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

// --- Fetch parameters ---

/// Bounds and filters for a message fetch. Every field is optional; an
/// absent `limit` means "no limit".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<i64>,
}

impl FetchParams {
    /// Merge `overrides` on top of `self`. Set fields in `overrides` win.
    pub fn merged(&self, overrides: &FetchParams) -> FetchParams {
        FetchParams {
            limit: overrides.limit.or(self.limit),
            offset_date: overrides.offset_date.or(self.offset_date),
            offset_id: overrides.offset_id.or(self.offset_id),
            min_id: overrides.min_id.or(self.min_id),
            max_id: overrides.max_id.or(self.max_id),
            add_offset: overrides.add_offset.or(self.add_offset),
            from_user: overrides.from_user.clone().or_else(|| self.from_user.clone()),
            reverse: overrides.reverse.or(self.reverse),
            reply_to: overrides.reply_to.or(self.reply_to),
        }
    }

    /// Raise `min_id` to `checkpoint` so already captured records are not
    /// requested again. A configured `min_id` above the checkpoint is kept.
    pub fn with_lower_bound(mut self, checkpoint: Option<i64>) -> FetchParams {
        if let Some(checkpoint) = checkpoint {
            self.min_id = Some(self.min_id.map_or(checkpoint, |m| m.max(checkpoint)));
        }
        self
    }
}
