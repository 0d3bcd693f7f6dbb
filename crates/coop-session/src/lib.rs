//! Co-op session coordination on top of `coop-net`.
//!
//! [`SessionCore`] runs the id handshake, tracks readiness, distributes the
//! run seed, and replicates poses and appearances between up to eight players.
//! Game-side work goes through the [`AvatarFactory`] and [`SceneLoader`]
//! seams; generation code reads seeds through [`DeterminismHook`].

pub mod appearance;
pub mod avatar;
pub mod error;
pub mod pose;
pub mod queue;
pub mod readiness;
pub mod replication;
pub mod scene;
pub mod seed;
pub mod session;

pub use appearance::{AppearanceDescriptor, AppearanceError, NO_CHARACTER, StatSnapshot};
pub use avatar::{AvatarError, AvatarFactory, AvatarHandle};
pub use error::SessionError;
pub use pose::{Pose, ReplicationTimer, flatten_orientation};
pub use queue::{ActionQueue, ActionSender, DrainReport};
pub use readiness::ReadyGate;
pub use replication::RemotePeer;
pub use scene::SceneLoader;
pub use seed::{CallSite, DeterminismHook, SEED_UNSET, SeedSlot, derive_call_seed, draw_seed};
pub use session::{Handshake, PeerRecord, SessionCore};
