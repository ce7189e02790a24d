pub mod checkpoint;
pub mod clock;
pub mod cooldown;
pub mod dispatch;
pub mod document;
pub mod error;
pub mod group;
pub mod harvest;
pub mod profiles;
pub mod records;
pub mod resolver;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use clock::{Clock, SystemClock};
pub use cooldown::{Cooldowns, MESSAGE_FETCH, PROFILE_RESOLUTION};
pub use dispatch::{parse_hydrate_input, ChannelOutcome, Dispatcher};
pub use error::{HarvestError, Result, StoreError};
pub use group::{Group, GroupHandle, QuarantineEntry};
pub use harvest::{Harvester, MemberOutcome, PassReport};
pub use resolver::{IdentityResolver, ResolveError};
pub use store::GroupStore;
pub use traits::{GatewaySource, MessageQuery, MessageSource, MessageTarget, SourceError};
