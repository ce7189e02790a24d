//! Member identifier -> canonical profile, through the group's profile cache.

use std::sync::Arc;

use tgharvest_common::{EntityRef, Profile};
use thiserror::Error;
use tracing::{debug, info};

use crate::cooldown::PROFILE_RESOLUTION;
use crate::error::StoreError;
use crate::group::GroupHandle;
use crate::traits::{MessageSource, SourceError};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The platform rate-limited the lookup. The cooldown is already recorded.
    #[error("profile lookups rate limited for {seconds}s")]
    RateLimited { seconds: u64 },

    /// The member cannot be resolved and should be quarantined.
    #[error("{reason}")]
    Unresolvable { reason: String },

    /// Not cached, and remote lookups are cooling down.
    #[error("profile lookups are suspended")]
    Suspended,

    #[error("operating account has been deactivated")]
    AccountDeactivated,

    /// The platform could not be reached. Nothing was recorded.
    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct IdentityResolver {
    source: Arc<dyn MessageSource>,
}

impl IdentityResolver {
    pub fn new(source: Arc<dyn MessageSource>) -> Self {
        Self { source }
    }

    /// Resolve `member` for the group behind `group`.
    ///
    /// Cache hits never touch the network. A miss goes to the platform
    /// unless the `profile-resolution` slot is suspended; the resolved
    /// profile is appended to the cache before it is returned.
    pub async fn resolve(
        &self,
        group: &mut GroupHandle,
        member: &str,
    ) -> Result<Profile, ResolveError> {
        let entity = EntityRef::parse(member);
        if let Some(profile) = group.cached_profile(&entity) {
            debug!(member, id = profile.id, "Profile cache hit");
            return Ok(profile.clone());
        }

        if group.is_suspended(PROFILE_RESOLUTION) {
            return Err(ResolveError::Suspended);
        }

        let profile = match self.source.resolve_entity(&entity).await {
            Ok(profile) => profile,
            Err(SourceError::RateLimited { seconds }) => {
                group.set_cooldown(PROFILE_RESOLUTION, seconds)?;
                return Err(ResolveError::RateLimited { seconds });
            }
            Err(SourceError::AccountDeactivated) => return Err(ResolveError::AccountDeactivated),
            Err(SourceError::Unavailable(message)) => {
                return Err(ResolveError::Unavailable(message))
            }
            Err(
                e @ (SourceError::NotFound(_)
                | SourceError::Private(_)
                | SourceError::Protocol(_)),
            ) => {
                return Err(ResolveError::Unresolvable {
                    reason: e.to_string(),
                })
            }
        };

        info!(member, id = profile.id, username = ?profile.username, "Resolved profile");
        group.remember_profile(profile.clone())?;
        Ok(profile)
    }
}
