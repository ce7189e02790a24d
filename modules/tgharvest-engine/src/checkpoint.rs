//! Where a member's harvest left off: the highest record `id` already in
//! its output log.

use std::io::{BufRead, BufReader};
use std::path::Path;

use tgharvest_common::record_id;
use tracing::debug;

/// Highest record id in the log at `path`.
///
/// `None` when the log is missing, empty, or has no record with a usable
/// `id`. Lines that are not valid JSON (typically a truncated last line
/// from an interrupted run) are skipped.
pub fn last_seen(path: &Path) -> std::io::Result<Option<i64>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut max = None;
    let mut skipped = 0usize;
    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<serde_json::Value>(&line) {
            Ok(value) => max = max.max(record_id(&value)),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        debug!(path = %path.display(), skipped, "Skipped unreadable lines while computing checkpoint");
    }
    Ok(max)
}
