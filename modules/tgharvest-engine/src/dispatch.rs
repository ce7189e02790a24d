//! Ad-hoc commands that talk to the platform without a group: fetch whole
//! channels, hydrate post references, and run global searches.
//!
//! Unlike the harvest loop these wait out short rate limits in-process
//! (cooperatively, with `tokio::time::sleep`) and retry, since there is no
//! group document to park a cooldown in.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tgharvest_common::{normalize_member, record_id, EntityRef, FetchParams, MessageRecord, Profile};
use tracing::{error, info, warn};

use crate::error::{HarvestError, Result};
use crate::records::RecordLog;
use crate::traits::{MessageQuery, MessageSource, MessageTarget, SourceError};

/// Results per global search query.
pub const SEARCH_LIMIT: u32 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Fetched { id: i64, records: usize },
    Skipped { reason: String },
}

pub struct Dispatcher {
    source: Arc<dyn MessageSource>,
    out_dir: PathBuf,
    flood_sleep_threshold: Duration,
}

/// What to do about a rate limit.
enum Backoff {
    Wait(Duration),
    GiveUp(String),
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn MessageSource>,
        out_dir: impl Into<PathBuf>,
        flood_sleep_threshold: Duration,
    ) -> Self {
        Self {
            source,
            out_dir: out_dir.into(),
            flood_sleep_threshold,
        }
    }

    fn backoff(&self, seconds: u64) -> Backoff {
        let wait = Duration::from_secs(seconds);
        if wait <= self.flood_sleep_threshold {
            Backoff::Wait(wait)
        } else {
            Backoff::GiveUp(format!(
                "rate limited for {seconds}s, above the {}s sleep threshold",
                self.flood_sleep_threshold.as_secs()
            ))
        }
    }

    async fn resolve(&self, entity: &EntityRef) -> Result<std::result::Result<Profile, String>> {
        loop {
            match self.source.resolve_entity(entity).await {
                Ok(profile) => return Ok(Ok(profile)),
                Err(SourceError::AccountDeactivated) => return Err(HarvestError::AccountDeactivated),
                Err(SourceError::RateLimited { seconds }) => match self.backoff(seconds) {
                    Backoff::Wait(wait) => {
                        warn!(entity = %entity, seconds, "Rate limited, waiting");
                        tokio::time::sleep(wait).await;
                    }
                    Backoff::GiveUp(reason) => return Ok(Err(reason)),
                },
                Err(e) => return Ok(Err(e.to_string())),
            }
        }
    }

    /// Fetch each channel into `<canonical id>.jsonl`, with the channel's
    /// profile injected under `user` in every record.
    pub async fn get(&self, channels: &[String], params: &FetchParams) -> Result<Vec<ChannelOutcome>> {
        let mut outcomes = Vec::with_capacity(channels.len());
        for channel in channels {
            let outcome = self.get_channel(channel, params).await?;
            match &outcome {
                ChannelOutcome::Fetched { id, records } => {
                    info!(channel = %channel, id, records, "Fetched channel")
                }
                ChannelOutcome::Skipped { reason } => {
                    error!(channel = %channel, reason = %reason, "Skipped channel")
                }
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn get_channel(&self, channel: &str, params: &FetchParams) -> Result<ChannelOutcome> {
        let entity = match normalize_member(channel) {
            Some(member) => EntityRef::parse(&member),
            None => EntityRef::parse(channel),
        };
        let profile = match self.resolve(&entity).await? {
            Ok(profile) => profile,
            Err(reason) => return Ok(ChannelOutcome::Skipped { reason }),
        };

        let path = self.out_dir.join(format!("{}.jsonl", profile.canonical_id()));
        let mut log = RecordLog::open(&path).map_err(|e| HarvestError::io(&path, e))?;
        let user = profile.to_value();
        let mut params = params.clone();

        'fetch: loop {
            let mut stream = self
                .source
                .iter_messages(MessageQuery::history(EntityRef::Id(profile.id), params.clone()));
            let mut last_id = None;
            let mut fetched = 0u32;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(mut record) => {
                        last_id = record.get("id").and_then(Value::as_i64).or(last_id);
                        record.insert("user".into(), user.clone());
                        log.append(&record).map_err(|e| HarvestError::io(&path, e))?;
                        fetched += 1;
                    }
                    Err(SourceError::AccountDeactivated) => {
                        return Err(HarvestError::AccountDeactivated)
                    }
                    Err(SourceError::RateLimited { seconds }) => match self.backoff(seconds) {
                        Backoff::Wait(wait) => {
                            warn!(channel, seconds, fetched, "Rate limited mid-stream, waiting");
                            tokio::time::sleep(wait).await;
                            params = resume_after(params, last_id, fetched);
                            continue 'fetch;
                        }
                        Backoff::GiveUp(reason) => return Ok(ChannelOutcome::Skipped { reason }),
                    },
                    Err(e) => {
                        warn!(channel, error = %e, records = log.written(), "Stream ended early");
                        break 'fetch;
                    }
                }
            }
            break;
        }

        Ok(ChannelOutcome::Fetched {
            id: profile.id,
            records: log.written(),
        })
    }

    /// Fetch the referenced posts and write them to `out` as JSON lines.
    /// Returns the number of records written.
    pub async fn hydrate(&self, requests: &[(String, Vec<i64>)], out: &mut dyn Write) -> Result<usize> {
        let mut written = 0;
        for (channel, ids) in requests {
            let entity = EntityRef::parse(channel);
            let mut pending: Vec<i64> = ids.clone();

            while !pending.is_empty() {
                let query = MessageQuery {
                    target: MessageTarget::Ids {
                        entity: entity.clone(),
                        ids: pending.clone(),
                    },
                    params: FetchParams::default(),
                };
                let mut seen = HashSet::new();
                let mut retry = None;
                let mut stream = self.source.iter_messages(query);

                while let Some(item) = stream.next().await {
                    match item {
                        Ok(record) => {
                            if let Some(id) = record_id(&Value::Object(record.clone())) {
                                seen.insert(id);
                            }
                            write_line(out, &record)?;
                            written += 1;
                        }
                        Err(SourceError::AccountDeactivated) => {
                            return Err(HarvestError::AccountDeactivated)
                        }
                        Err(SourceError::RateLimited { seconds }) => {
                            retry = Some(seconds);
                            break;
                        }
                        Err(e) => {
                            warn!(channel = %channel, error = %e, "Could not hydrate channel");
                            break;
                        }
                    }
                }
                drop(stream);

                match retry.map(|seconds| (seconds, self.backoff(seconds))) {
                    Some((seconds, Backoff::Wait(wait))) => {
                        warn!(channel = %channel, seconds, "Rate limited, waiting");
                        tokio::time::sleep(wait).await;
                        pending.retain(|id| !seen.contains(id));
                    }
                    Some((_, Backoff::GiveUp(reason))) => {
                        error!(channel = %channel, reason = %reason, "Skipped channel");
                        pending.clear();
                    }
                    None => pending.clear(),
                }
            }
        }
        out.flush().map_err(|e| HarvestError::io("<output>", e))?;
        Ok(written)
    }

    /// Log the operating account, then append up to `SEARCH_LIMIT` global
    /// results per query to `<query>.jsonl`.
    pub async fn search(&self, queries: &[String]) -> Result<Vec<usize>> {
        match self.source.current_account().await {
            Ok(me) => info!(id = me.id, username = ?me.username, "Searching as"),
            Err(SourceError::AccountDeactivated) => return Err(HarvestError::AccountDeactivated),
            Err(e) => warn!(error = %e, "Could not identify the operating account"),
        }

        let mut counts = Vec::with_capacity(queries.len());
        for query in queries {
            let path = self.out_dir.join(format!("{}.jsonl", file_stem(query)));
            let mut log = RecordLog::open(&path).map_err(|e| HarvestError::io(&path, e))?;
            let params = FetchParams {
                limit: Some(SEARCH_LIMIT),
                ..Default::default()
            };
            let mut stream = self.source.iter_messages(MessageQuery {
                target: MessageTarget::Search(query.clone()),
                params,
            });
            while let Some(item) = stream.next().await {
                match item {
                    Ok(record) => log.append(&record).map_err(|e| HarvestError::io(&path, e))?,
                    Err(SourceError::AccountDeactivated) => {
                        return Err(HarvestError::AccountDeactivated)
                    }
                    Err(e) => {
                        warn!(query = %query, error = %e, "Search ended early");
                        break;
                    }
                }
            }
            info!(query = %query, results = log.written(), path = %path.display(), "Search done");
            counts.push(log.written());
        }
        Ok(counts)
    }
}

fn write_line(out: &mut dyn Write, record: &MessageRecord) -> Result<()> {
    let line = serde_json::to_string(record)
        .map_err(|e| HarvestError::io("<output>", std::io::Error::other(e)))?;
    writeln!(out, "{line}").map_err(|e| HarvestError::io("<output>", e))
}

/// Parameters that continue an interrupted fetch after `last_id`, having
/// already received `fetched` records.
pub fn resume_after(mut params: FetchParams, last_id: Option<i64>, fetched: u32) -> FetchParams {
    if let Some(last) = last_id {
        if params.reverse.unwrap_or(false) {
            params.min_id = Some(params.min_id.map_or(last, |m| m.max(last)));
        } else {
            params.max_id = Some(params.max_id.map_or(last, |m| m.min(last)));
        }
    }
    params.limit = params.limit.map(|l| l.saturating_sub(fetched));
    params
}

/// Query strings become file names; path separators would escape `out_dir`.
fn file_stem(query: &str) -> String {
    query.replace(['/', '\\'], "_")
}

/// Parse `channel/post_id` lines into per-channel id lists, channels in
/// first-seen order. Blank lines are ignored, malformed ones skipped with a
/// warning.
pub fn parse_hydrate_input(input: &str) -> Vec<(String, Vec<i64>)> {
    let mut requests: Vec<(String, Vec<i64>)> = Vec::new();
    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed = line
            .rsplit_once('/')
            .and_then(|(channel, id)| Some((channel.trim(), id.trim().parse::<i64>().ok()?)))
            .filter(|(channel, _)| !channel.is_empty());
        let Some((channel, id)) = parsed else {
            warn!(line = lineno + 1, content = line, "Skipping malformed hydrate line");
            continue;
        };
        let channel = normalize_member(channel).unwrap_or_else(|| channel.to_string());
        match requests.iter_mut().find(|(c, _)| *c == channel) {
            Some((_, ids)) => ids.push(id),
            None => requests.push((channel, vec![id])),
        }
    }
    requests
}
