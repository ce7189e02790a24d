//! Member identifiers as operators type them: numeric ids, `@handles`, or
//! `t.me` links. Everything is reduced to a bare id or handle.

use regex::Regex;
use std::sync::LazyLock;

static RE_TME_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?(?:t|telegram)\.me/(?:s/)?([A-Za-z0-9_]+)").unwrap()
});
static RE_IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Reduce one operator-supplied member to its bare id or handle.
/// Returns `None` for anything that is not a plausible identifier.
pub fn normalize_member(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if let Some(caps) = RE_TME_LINK.captures(raw) {
        return Some(caps[1].to_string());
    }
    let bare = raw.trim_start_matches('@');
    RE_IDENTIFIER.is_match(bare).then(|| bare.to_string())
}

/// Parse an account list, one member per line. Blank lines and `#`
/// comments are skipped; unparseable lines are logged and dropped.
pub fn parse_member_list(content: &str) -> Vec<String> {
    let mut members = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match normalize_member(line) {
            Some(member) => {
                tracing::debug!(member = member.as_str(), "Found member");
                members.push(member);
            }
            None => tracing::warn!(line, "Skipping unrecognized member line"),
        }
    }
    members
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_prefixes_and_links() {
        assert_eq!(normalize_member("@alice").as_deref(), Some("alice"));
        assert_eq!(normalize_member("https://t.me/alice").as_deref(), Some("alice"));
        assert_eq!(normalize_member("t.me/s/news_feed").as_deref(), Some("news_feed"));
        assert_eq!(normalize_member("https://telegram.me/bob/123").as_deref(), Some("bob"));
        assert_eq!(normalize_member("  1234567 ").as_deref(), Some("1234567"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(normalize_member("not a handle"), None);
        assert_eq!(normalize_member("https://example.com/alice"), None);
        assert_eq!(normalize_member("@"), None);
    }

    #[test]
    fn parses_account_files() {
        let content = "# seed list\nalice\n\n@bob\nhttps://t.me/carol\nwhat is this\n123\n";
        assert_eq!(parse_member_list(content), vec!["alice", "bob", "carol", "123"]);
    }
}
