//! On-disk schema of a group document (`group.toml`).
//!
//! The document is an explicit, versioned TOML table. It is meant to be
//! read and hand-edited by operators:
//!
//! ```toml
//! schema_version = 1
//! name = "g"
//! members = ["555", "news_feed"]
//!
//! [[quarantined]]
//! member = "123"
//! reason = "entity not found: USERNAME_NOT_OCCUPIED"
//!
//! [params]
//! limit = 500
//! reverse = true
//!
//! [cooldowns]
//! profile-resolution = "2026-03-01T13:00:00Z"
//! ```

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgharvest_common::FetchParams;
use thiserror::Error;
use tracing::warn;

use crate::cooldown::Cooldowns;
use crate::group::{Group, QuarantineEntry};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("missing schema_version")]
    MissingVersion,

    #[error("unsupported schema_version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion(u32),

    #[error("invalid TOML: {0}")]
    Parse(String),

    #[error("cannot serialize group: {0}")]
    Serialize(String),
}

/// Plain values first, tables last, so the TOML writer never has to emit a
/// bare key after a table header.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct GroupDocumentV1 {
    schema_version: u32,
    name: String,
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    quarantined: Vec<QuarantineEntry>,
    #[serde(default)]
    params: FetchParams,
    #[serde(default)]
    cooldowns: BTreeMap<String, DateTime<Utc>>,
}

#[derive(Deserialize)]
struct VersionProbe {
    schema_version: Option<u32>,
}

pub fn encode(group: &Group) -> Result<String, DocumentError> {
    let document = GroupDocumentV1 {
        schema_version: SCHEMA_VERSION,
        name: group.name().to_string(),
        members: group.members().to_vec(),
        quarantined: group.quarantined().to_vec(),
        params: group.base_params().clone(),
        cooldowns: group.cooldowns().as_map().clone(),
    };
    toml::to_string(&document).map_err(|e| DocumentError::Serialize(e.to_string()))
}

pub fn decode(text: &str) -> Result<Group, DocumentError> {
    let probe: VersionProbe =
        toml::from_str(text).map_err(|e| DocumentError::Parse(e.to_string()))?;
    match probe.schema_version {
        None => return Err(DocumentError::MissingVersion),
        Some(SCHEMA_VERSION) => {}
        Some(other) => return Err(DocumentError::UnsupportedVersion(other)),
    }

    let document: GroupDocumentV1 =
        toml::from_str(text).map_err(|e| DocumentError::Parse(e.to_string()))?;
    let members = active_members(&document.name, document.members, &document.quarantined);
    Ok(Group::from_parts(
        document.name,
        members,
        document.quarantined,
        document.params,
        Cooldowns::from_map(document.cooldowns),
    ))
}

/// A member is either active or quarantined, never both. Hand edits that
/// list one in both places keep the quarantine entry.
fn active_members(group: &str, members: Vec<String>, quarantined: &[QuarantineEntry]) -> Vec<String> {
    let mut seen: HashSet<String> = quarantined.iter().map(|q| q.member.clone()).collect();
    let listed = members.len();
    let kept: Vec<String> = members
        .into_iter()
        .filter(|m| seen.insert(m.clone()))
        .collect();
    if kept.len() != listed {
        warn!(group, dropped = listed - kept.len(), "Dropped duplicate or quarantined members from document");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooldown::PROFILE_RESOLUTION;
    use chrono::TimeZone;

    fn sample() -> Group {
        let params = FetchParams {
            limit: Some(500),
            reverse: Some(true),
            offset_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let mut group = Group::new(
            "g",
            vec!["alice".into(), "123".into(), "news".into()],
            params,
        );
        group.quarantine("123", "entity not found: USERNAME_NOT_OCCUPIED");
        group.set_cooldown(
            PROFILE_RESOLUTION,
            3600,
            Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        );
        group
    }

    #[test]
    fn full_group_survives_encode_decode() {
        let group = sample();
        let text = encode(&group).unwrap();
        assert!(text.starts_with("schema_version = 1"));
        assert_eq!(decode(&text).unwrap(), group);
    }

    #[test]
    fn fresh_group_encodes_empty_collections() {
        let group = Group::new("fresh", vec!["a".into()], FetchParams::default());
        let decoded = decode(&encode(&group).unwrap()).unwrap();
        assert_eq!(decoded, group);
        assert!(decoded.quarantined().is_empty());
        assert!(decoded.cooldowns().is_empty());
    }

    #[test]
    fn hand_written_document_loads() {
        let text = r#"
            schema_version = 1
            name = "research"
            members = ["555", "news_feed"]

            [[quarantined]]
            member = "123"
            reason = "entity is private: CHANNEL_PRIVATE"

            [params]
            limit = 50

            [cooldowns]
            profile-resolution = "2026-03-01T13:00:00Z"
        "#;
        let group = decode(text).unwrap();
        assert_eq!(group.name(), "research");
        assert_eq!(group.members(), ["555", "news_feed"]);
        assert_eq!(group.quarantined()[0].member, "123");
        assert_eq!(group.base_params().limit, Some(50));
        let before_end = Utc.with_ymd_and_hms(2026, 3, 1, 12, 59, 0).unwrap();
        assert!(group.is_suspended(PROFILE_RESOLUTION, before_end));
    }

    #[test]
    fn version_is_required_and_checked() {
        assert!(matches!(
            decode("name = \"g\"\nmembers = []\n"),
            Err(DocumentError::MissingVersion)
        ));
        assert!(matches!(
            decode("schema_version = 2\nname = \"g\"\n"),
            Err(DocumentError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let text = "schema_version = 1\nname = \"g\"\nkind = \"group\"\n";
        assert!(matches!(decode(text), Err(DocumentError::Parse(_))));
    }

    #[test]
    fn hand_written_document_with_overlapping_member_keeps_quarantine() {
        let text = r#"
            schema_version = 1
            name = "research"
            members = ["555", "123", "555"]

            [[quarantined]]
            member = "123"
            reason = "entity is private: CHANNEL_PRIVATE"
        "#;
        let mut group = decode(text).unwrap();
        assert_eq!(group.members(), ["555"]);
        assert!(!group.is_active("123"));
        assert!(group.is_quarantined("123"));

        assert_eq!(group.retry_all(), 1);
        assert_eq!(group.members(), ["555", "123"]);
    }
}
