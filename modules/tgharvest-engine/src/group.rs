//! Group aggregate: who is harvested, who is quarantined, with which
//! parameters, and which operations are cooling down.
//!
//! `Group` is plain state. `GroupHandle` binds it to its directory and a
//! clock, and persists after every mutation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgharvest_common::{EntityRef, FetchParams, Profile};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::cooldown::Cooldowns;
use crate::error::StoreError;
use crate::profiles::ProfileCache;
use crate::store::GroupStore;

/// A member taken out of rotation, with the reason it could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub member: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    members: Vec<String>,
    quarantined: Vec<QuarantineEntry>,
    params: FetchParams,
    cooldowns: Cooldowns,
}

impl Group {
    pub fn new(name: impl Into<String>, members: Vec<String>, params: FetchParams) -> Self {
        let mut group = Self {
            name: name.into(),
            members: Vec::new(),
            quarantined: Vec::new(),
            params,
            cooldowns: Cooldowns::default(),
        };
        group.add_members(members);
        group
    }

    /// Reassemble a group from persisted parts.
    pub(crate) fn from_parts(
        name: String,
        members: Vec<String>,
        quarantined: Vec<QuarantineEntry>,
        params: FetchParams,
        cooldowns: Cooldowns,
    ) -> Self {
        Self {
            name,
            members,
            quarantined,
            params,
            cooldowns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active members, in harvest order.
    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn quarantined(&self) -> &[QuarantineEntry] {
        &self.quarantined
    }

    pub fn base_params(&self) -> &FetchParams {
        &self.params
    }

    pub fn cooldowns(&self) -> &Cooldowns {
        &self.cooldowns
    }

    pub fn is_active(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    pub fn is_quarantined(&self, member: &str) -> bool {
        self.quarantined.iter().any(|q| q.member == member)
    }

    /// Append members to the active set. Members already active or
    /// quarantined are skipped silently.
    pub fn add_members<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for id in ids {
            let id = id.into();
            if !self.is_active(&id) && !self.is_quarantined(&id) {
                self.members.push(id);
            }
        }
    }

    /// Move an active member to quarantine. Returns false (and changes
    /// nothing) if the member is not active.
    pub fn quarantine(&mut self, member: &str, reason: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m == member) else {
            return false;
        };
        let member = self.members.remove(pos);
        self.quarantined.push(QuarantineEntry {
            member,
            reason: reason.to_string(),
        });
        true
    }

    /// Return every quarantined member to the active set, dropping reasons.
    /// Returns how many members came back.
    pub fn retry_all(&mut self) -> usize {
        let entries = std::mem::take(&mut self.quarantined);
        let count = entries.len();
        for entry in entries {
            if !self.is_active(&entry.member) {
                self.members.push(entry.member);
            }
        }
        count
    }

    /// Rewrite an active member in place, e.g. a handle to its canonical id.
    /// If `new` is already active the old entry is dropped instead, so the
    /// member is not harvested twice. Returns false if `old` is not active.
    pub fn replace_member(&mut self, old: &str, new: &str) -> bool {
        let Some(pos) = self.members.iter().position(|m| m == old) else {
            return false;
        };
        if old == new {
            return true;
        }
        if self.is_active(new) {
            self.members.remove(pos);
        } else {
            self.members[pos] = new.to_string();
        }
        true
    }

    /// The group's parameters with `overrides` applied on top.
    pub fn params(&self, overrides: &FetchParams) -> FetchParams {
        self.params.merged(overrides)
    }

    pub fn is_suspended(&self, slot: &str, now: DateTime<Utc>) -> bool {
        self.cooldowns.is_suspended(slot, now)
    }

    pub fn set_cooldown(&mut self, slot: &str, seconds: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        self.cooldowns.set(slot, seconds, now)
    }
}

// ---------------------------------------------------------------------------
// GroupHandle
// ---------------------------------------------------------------------------

/// A loaded group bound to its storage directory, profile cache and clock.
/// Every mutating call writes the group document before returning.
pub struct GroupHandle {
    group: Group,
    store: GroupStore,
    profiles: ProfileCache,
    clock: Arc<dyn Clock>,
}

impl GroupHandle {
    pub fn open(store: &GroupStore, name: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        let group = store.load(name)?;
        let profiles_path = store.profiles_path(name);
        let profiles =
            ProfileCache::load(&profiles_path).map_err(|e| StoreError::io(&profiles_path, e))?;
        debug!(group = name, profiles = profiles.len(), "Opened group");
        Ok(Self {
            group,
            store: store.clone(),
            profiles,
            clock,
        })
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn name(&self) -> &str {
        self.group.name()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn persist(&self) -> Result<(), StoreError> {
        self.store.save(&self.group)
    }

    pub fn is_suspended(&self, slot: &str) -> bool {
        self.group.is_suspended(slot, self.clock.now())
    }

    /// Suspend `slot` for `seconds` and persist immediately.
    pub fn set_cooldown(&mut self, slot: &str, seconds: u64) -> Result<DateTime<Utc>, StoreError> {
        let end = self.group.set_cooldown(slot, seconds, self.clock.now());
        warn!(group = self.name(), slot, seconds, until = %end, "Suspending operation");
        self.persist()?;
        Ok(end)
    }

    pub fn quarantine(&mut self, member: &str, reason: &str) -> Result<bool, StoreError> {
        if !self.group.quarantine(member, reason) {
            return Ok(false);
        }
        warn!(group = self.name(), member, reason, "Quarantined member");
        self.persist()?;
        Ok(true)
    }

    pub fn replace_member(&mut self, old: &str, new: &str) -> Result<bool, StoreError> {
        if old == new || !self.group.replace_member(old, new) {
            return Ok(false);
        }
        info!(group = self.name(), old, new, "Replaced member handle by canonical id");
        self.persist()?;
        Ok(true)
    }

    pub fn retry_all(&mut self) -> Result<usize, StoreError> {
        let count = self.group.retry_all();
        if count > 0 {
            info!(group = self.name(), count, "Returned quarantined members to rotation");
            self.persist()?;
        }
        Ok(count)
    }

    pub fn params(&self, overrides: &FetchParams) -> FetchParams {
        self.group.params(overrides)
    }

    pub fn cached_profile(&self, entity: &EntityRef) -> Option<&Profile> {
        self.profiles.lookup(entity)
    }

    /// Append a freshly resolved profile to the group's profile cache.
    pub fn remember_profile(&mut self, profile: Profile) -> Result<(), StoreError> {
        let path = self.store.profiles_path(self.group.name());
        self.profiles
            .append(profile)
            .map_err(|e| StoreError::io(path, e))
    }

    pub fn member_log_path(&self, canonical_id: &str) -> PathBuf {
        self.store.member_log_path(self.group.name(), canonical_id)
    }
}
