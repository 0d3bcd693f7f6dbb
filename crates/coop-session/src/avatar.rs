//! Avatar construction seam. The session decides when a remote player's
//! avatar must exist, change or go away; an [`AvatarFactory`] does the work.

use coop_net::PeerId;
use glam::{Quat, Vec3};

use crate::appearance::AppearanceDescriptor;
use crate::pose::Pose;

/// Opaque handle to an avatar owned by the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AvatarHandle(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum AvatarError {
    #[error("avatar for peer {peer} could not be built: {reason}")]
    Build { peer: PeerId, reason: String },
    #[error("no avatar assets for character {0}")]
    UnknownCharacter(i32),
}

pub trait AvatarFactory: Send {
    /// Build an avatar for `peer`, or update the existing one in place.
    ///
    /// Returning a handle different from the previous one replaces the old
    /// avatar, which the session then destroys. On error the previous avatar
    /// stays in use.
    fn create_or_update(
        &mut self,
        peer: PeerId,
        appearance: &AppearanceDescriptor,
        position: Vec3,
        rotation: Quat,
    ) -> Result<AvatarHandle, AvatarError>;

    /// Move an avatar. The rotation is already flattened.
    fn apply_pose(&mut self, handle: AvatarHandle, pose: &Pose);

    fn destroy(&mut self, handle: AvatarHandle);
}
