//! In-memory doubles for the platform and the clock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tgharvest_common::{record_id, EntityRef, MessageRecord, Profile};

use crate::clock::Clock;
use crate::traits::{MessageQuery, MessageSource, MessageTarget, SourceError};

/// Build a message record `{"id": id, "message": text}`.
pub fn message(id: i64, text: &str) -> MessageRecord {
    let mut record = MessageRecord::new();
    record.insert("id".into(), Value::from(id));
    record.insert("message".into(), Value::from(text));
    record
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// Scripted `MessageSource`.
///
/// History queries honour `min_id`/`max_id` (exclusive), `reverse` and
/// `limit` the way the platform does.
#[derive(Default)]
pub struct MockSource {
    profiles: Vec<Profile>,
    resolve_errors: HashMap<String, SourceError>,
    messages: HashMap<i64, Vec<MessageRecord>>,
    stream_errors: HashMap<i64, (usize, SourceError)>,
    search_results: HashMap<String, Vec<MessageRecord>>,
    account: Option<Profile>,
    resolve_calls: AtomicUsize,
    queries: Mutex<Vec<MessageQuery>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity (raw platform object with `id` and optional `username`).
    pub fn on_entity(mut self, entity: Value) -> Self {
        let profile = Profile::from_entity(&entity).expect("mock entity needs a numeric id");
        self.profiles.push(profile);
        self
    }

    /// Fail every resolution of `member` (as written in the group) with `error`.
    pub fn on_resolve_error(mut self, member: &str, error: SourceError) -> Self {
        self.resolve_errors.insert(member.to_string(), error);
        self
    }

    pub fn on_messages(mut self, entity_id: i64, messages: Vec<MessageRecord>) -> Self {
        self.messages.entry(entity_id).or_default().extend(messages);
        self
    }

    /// End the history stream of `entity_id` with `error` after `after` records.
    pub fn on_stream_error(mut self, entity_id: i64, after: usize, error: SourceError) -> Self {
        self.stream_errors.insert(entity_id, (after, error));
        self
    }

    pub fn on_search(mut self, query: &str, results: Vec<MessageRecord>) -> Self {
        self.search_results.insert(query.to_string(), results);
        self
    }

    pub fn with_account(mut self, entity: Value) -> Self {
        self.account = Profile::from_entity(&entity);
        self
    }

    /// Remote entity lookups made so far.
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Message queries issued so far, in order.
    pub fn queries(&self) -> Vec<MessageQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    fn lookup(&self, entity: &EntityRef) -> Option<&Profile> {
        self.profiles.iter().rev().find(|p| match entity {
            EntityRef::Id(id) => p.id == *id,
            EntityRef::Handle(handle) => p.matches_handle(handle),
        })
    }

    fn history(&self, entity_id: i64, query: &MessageQuery) -> Vec<MessageRecord> {
        let params = &query.params;
        let mut records: Vec<MessageRecord> = self
            .messages
            .get(&entity_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| {
                let id = id_of(m);
                params.min_id.map_or(true, |min| id > min)
                    && params.max_id.map_or(true, |max| id < max)
            })
            .collect();
        if params.reverse.unwrap_or(false) {
            records.sort_by_key(id_of);
        } else {
            records.sort_by_key(|m| std::cmp::Reverse(id_of(m)));
        }
        if let Some(limit) = params.limit {
            records.truncate(limit as usize);
        }
        records
    }
}

fn id_of(record: &MessageRecord) -> i64 {
    record_id(&Value::Object(record.clone())).unwrap_or_default()
}

#[async_trait]
impl MessageSource for MockSource {
    async fn resolve_entity(&self, entity: &EntityRef) -> Result<Profile, SourceError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.resolve_errors.get(&entity.to_string()) {
            return Err(error.clone());
        }
        self.lookup(entity)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("no entity {entity}")))
    }

    async fn current_account(&self) -> Result<Profile, SourceError> {
        self.account
            .clone()
            .ok_or_else(|| SourceError::Protocol("no account configured".into()))
    }

    fn iter_messages(
        &self,
        query: MessageQuery,
    ) -> BoxStream<'_, Result<MessageRecord, SourceError>> {
        self.queries.lock().unwrap().push(query.clone());

        let items: Vec<Result<MessageRecord, SourceError>> = match &query.target {
            MessageTarget::History(entity) => match self.lookup(entity).map(|p| p.id) {
                Some(id) => {
                    let records = self.history(id, &query);
                    match self.stream_errors.get(&id) {
                        Some((after, error)) => records
                            .into_iter()
                            .take(*after)
                            .map(Ok)
                            .chain(std::iter::once(Err(error.clone())))
                            .collect(),
                        None => records.into_iter().map(Ok).collect(),
                    }
                }
                None => vec![Err(SourceError::NotFound(format!("no entity {entity}")))],
            },
            MessageTarget::Ids { entity, ids } => match self.lookup(entity).map(|p| p.id) {
                Some(id) => self
                    .messages
                    .get(&id)
                    .into_iter()
                    .flatten()
                    .filter(|m| ids.contains(&id_of(m)))
                    .cloned()
                    .map(Ok)
                    .collect(),
                None => vec![Err(SourceError::NotFound(format!("no entity {entity}")))],
            },
            MessageTarget::Search(q) => {
                let mut results = self.search_results.get(q).cloned().unwrap_or_default();
                if let Some(limit) = query.params.limit {
                    results.truncate(limit as usize);
                }
                results.into_iter().map(Ok).collect()
            }
        };
        stream::iter(items).boxed()
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
