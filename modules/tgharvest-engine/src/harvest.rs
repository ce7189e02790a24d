//! One harvest pass over a group.
//!
//! Every active member goes through
//!
//! ```text
//! PENDING -> RESOLVING -> CHECKPOINTING -> FETCHING -> DONE
//!    |           |
//!    |           +-> QUARANTINED -> DONE
//!    +-----------+-> SUSPENDED   -> DONE
//! ```
//!
//! in the group's member order, one at a time. Member-level failures become
//! a `MemberOutcome`; only a deactivated account ends the pass early.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tgharvest_common::{EntityRef, FetchParams, Profile};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::checkpoint;
use crate::clock::Clock;
use crate::cooldown::{MESSAGE_FETCH, PROFILE_RESOLUTION};
use crate::error::{HarvestError, Result};
use crate::group::GroupHandle;
use crate::records::RecordLog;
use crate::resolver::{IdentityResolver, ResolveError};
use crate::store::GroupStore;
use crate::traits::{MessageQuery, MessageSource, SourceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberOutcome {
    /// Stream drained; `records` new records appended.
    Harvested { records: usize },
    /// Resolution failed permanently; the member left rotation.
    Quarantined { reason: String },
    /// Skipped this pass because `slot` is cooling down.
    Suspended { slot: &'static str },
    /// Ended early without quarantine. Records written before the error are kept.
    Interrupted { records: usize, error: String },
    /// Resolved to an account already fetched earlier in this pass.
    Duplicate { id: i64 },
}

#[derive(Debug, Clone)]
pub struct MemberReport {
    /// Identifier as it was listed when the pass started.
    pub member: String,
    pub outcome: MemberOutcome,
}

#[derive(Debug, Clone)]
pub struct PassReport {
    pub group: String,
    pub run_id: Uuid,
    pub members: Vec<MemberReport>,
}

impl PassReport {
    pub fn records(&self) -> usize {
        self.members
            .iter()
            .map(|m| match m.outcome {
                MemberOutcome::Harvested { records } | MemberOutcome::Interrupted { records, .. } => {
                    records
                }
                _ => 0,
            })
            .sum()
    }

    pub fn count(&self, pred: impl Fn(&MemberOutcome) -> bool) -> usize {
        self.members.iter().filter(|m| pred(&m.outcome)).count()
    }

    pub fn outcome(&self, member: &str) -> Option<&MemberOutcome> {
        self.members
            .iter()
            .find(|m| m.member == member)
            .map(|m| &m.outcome)
    }
}

pub struct Harvester {
    source: Arc<dyn MessageSource>,
    resolver: IdentityResolver,
    store: GroupStore,
    clock: Arc<dyn Clock>,
}

impl Harvester {
    pub fn new(source: Arc<dyn MessageSource>, store: GroupStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver: IdentityResolver::new(source.clone()),
            source,
            store,
            clock,
        }
    }

    /// Run one pass over group `name`.
    pub async fn run_group(&self, name: &str) -> Result<PassReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("harvest", group = name, run_id = %run_id);
        self.run_pass(name, run_id).instrument(span).await
    }

    async fn run_pass(&self, name: &str, run_id: Uuid) -> Result<PassReport> {
        let mut group = GroupHandle::open(&self.store, name, self.clock.clone())?;
        let members = group.group().members().to_vec();
        let total = members.len();
        info!(members = total, quarantined = group.group().quarantined().len(), "Starting pass");

        let mut report = PassReport {
            group: name.to_string(),
            run_id,
            members: Vec::with_capacity(total),
        };

        let mut fetched = HashSet::new();
        for (index, member) in members.into_iter().enumerate() {
            // Another member's canonicalization may have folded this one away.
            if !group.group().is_active(&member) {
                debug!(member = %member, "No longer active, skipping");
                continue;
            }

            let outcome = self.harvest_member(&mut group, &member, &mut fetched).await?;
            let progress = (index + 1) * 100 / total;
            match &outcome {
                MemberOutcome::Harvested { records } => {
                    info!(member = %member, records, progress, "Harvested member")
                }
                MemberOutcome::Quarantined { reason } => {
                    warn!(member = %member, reason = %reason, progress, "Member quarantined")
                }
                MemberOutcome::Suspended { slot } => {
                    info!(member = %member, slot, progress, "Member suspended")
                }
                MemberOutcome::Interrupted { records, error } => {
                    warn!(member = %member, records, error = %error, progress, "Member interrupted")
                }
                MemberOutcome::Duplicate { id } => {
                    info!(member = %member, id, progress, "Already fetched this pass")
                }
            }
            report.members.push(MemberReport { member, outcome });
        }

        info!(
            records = report.records(),
            harvested = report.count(|o| matches!(o, MemberOutcome::Harvested { .. })),
            quarantined = report.count(|o| matches!(o, MemberOutcome::Quarantined { .. })),
            suspended = report.count(|o| matches!(o, MemberOutcome::Suspended { .. })),
            interrupted = report.count(|o| matches!(o, MemberOutcome::Interrupted { .. })),
            "Pass complete"
        );
        Ok(report)
    }

    async fn harvest_member(
        &self,
        group: &mut GroupHandle,
        member: &str,
        fetched: &mut HashSet<i64>,
    ) -> Result<MemberOutcome> {
        // PENDING
        if group.is_suspended(MESSAGE_FETCH) {
            return Ok(MemberOutcome::Suspended {
                slot: MESSAGE_FETCH,
            });
        }

        // RESOLVING
        let profile = match self.resolver.resolve(group, member).await {
            Ok(profile) => profile,
            Err(ResolveError::Suspended) | Err(ResolveError::RateLimited { .. }) => {
                return Ok(MemberOutcome::Suspended {
                    slot: PROFILE_RESOLUTION,
                })
            }
            Err(ResolveError::Unresolvable { reason }) => {
                group.quarantine(member, &reason)?;
                return Ok(MemberOutcome::Quarantined { reason });
            }
            Err(ResolveError::Unavailable(message)) => {
                return Ok(MemberOutcome::Interrupted {
                    records: 0,
                    error: message,
                })
            }
            Err(ResolveError::AccountDeactivated) => return Err(HarvestError::AccountDeactivated),
            Err(ResolveError::Store(e)) => return Err(e.into()),
        };

        let canonical = profile.canonical_id();
        if EntityRef::parse(member).is_handle() {
            group.replace_member(member, &canonical)?;
        }
        if !fetched.insert(profile.id) {
            return Ok(MemberOutcome::Duplicate { id: profile.id });
        }

        // CHECKPOINTING
        let log_path = group.member_log_path(&canonical);
        let checkpoint = match checkpoint::last_seen(&log_path) {
            Ok(checkpoint) => checkpoint,
            Err(e) => return Ok(local_failure(&log_path, 0, e)),
        };
        let params = group
            .params(&FetchParams::default())
            .with_lower_bound(checkpoint);
        debug!(member, checkpoint = ?checkpoint, min_id = ?params.min_id, "Computed checkpoint");

        // FETCHING
        self.fetch(group, &profile, params).await
    }

    async fn fetch(
        &self,
        group: &mut GroupHandle,
        profile: &Profile,
        params: FetchParams,
    ) -> Result<MemberOutcome> {
        let log_path = group.member_log_path(&profile.canonical_id());
        let mut log = match RecordLog::open(&log_path) {
            Ok(log) => log,
            Err(e) => return Ok(local_failure(&log_path, 0, e)),
        };
        let mut stream = self
            .source
            .iter_messages(MessageQuery::history(EntityRef::Id(profile.id), params));

        while let Some(item) = stream.next().await {
            match item {
                Ok(record) => {
                    if let Err(e) = log.append(&record) {
                        return Ok(local_failure(&log_path, log.written(), e));
                    }
                }
                Err(SourceError::AccountDeactivated) => {
                    error!(id = profile.id, "Account deactivated while streaming");
                    return Err(HarvestError::AccountDeactivated);
                }
                Err(e @ SourceError::RateLimited { seconds }) => {
                    group.set_cooldown(MESSAGE_FETCH, seconds)?;
                    return Ok(MemberOutcome::Interrupted {
                        records: log.written(),
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    return Ok(MemberOutcome::Interrupted {
                        records: log.written(),
                        error: e.to_string(),
                    })
                }
            }
        }

        Ok(MemberOutcome::Harvested {
            records: log.written(),
        })
    }
}

/// A member log that cannot be read or written ends that member only.
fn local_failure(path: &Path, records: usize, err: std::io::Error) -> MemberOutcome {
    error!(path = %path.display(), error = %err, "Member log I/O failed");
    MemberOutcome::Interrupted {
        records,
        error: format!("I/O error on {}: {err}", path.display()),
    }
}
