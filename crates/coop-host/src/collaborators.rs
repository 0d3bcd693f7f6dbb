//! Headless stand-ins for the game side of a session.

use coop_config::PlayerConfig;
use coop_net::PeerId;
use coop_session::{
    AppearanceDescriptor, AvatarError, AvatarFactory, AvatarHandle, Pose, SceneLoader,
};
use crossbeam_channel::{Receiver, Sender};
use glam::{Quat, Vec3};

/// Avatar factory that only logs. Handles are sequential.
#[derive(Default)]
pub struct LoggingAvatars {
    next: u64,
}

impl AvatarFactory for LoggingAvatars {
    fn create_or_update(
        &mut self,
        peer: PeerId,
        appearance: &AppearanceDescriptor,
        position: Vec3,
        _rotation: Quat,
    ) -> Result<AvatarHandle, AvatarError> {
        self.next += 1;
        let handle = AvatarHandle(self.next);
        tracing::info!(
            peer = %peer,
            avatar = handle.0,
            class = %appearance.character_class,
            character = appearance.character_id,
            skin = %appearance.skin_name,
            ?position,
            "Avatar created"
        );
        Ok(handle)
    }

    fn apply_pose(&mut self, handle: AvatarHandle, pose: &Pose) {
        tracing::trace!(avatar = handle.0, position = ?pose.position, "Avatar moved");
    }

    fn destroy(&mut self, handle: AvatarHandle) {
        tracing::info!(avatar = handle.0, "Avatar destroyed");
    }
}

/// Scene loader that completes immediately. Requests come out of the paired
/// receiver so the owner can report them back as loaded.
pub struct ImmediateScenes {
    requests: Sender<(String, i32)>,
}

impl ImmediateScenes {
    pub fn new() -> (Self, Receiver<(String, i32)>) {
        let (requests, loaded) = crossbeam_channel::unbounded();
        (Self { requests }, loaded)
    }
}

impl SceneLoader for ImmediateScenes {
    fn request_scene_load(&mut self, scene: &str, seed: i32) {
        tracing::info!(scene, seed, "Scene load requested");
        let _ = self.requests.send((scene.to_string(), seed));
    }
}

/// The local player's appearance as configured.
pub fn player_appearance(player: &PlayerConfig) -> AppearanceDescriptor {
    AppearanceDescriptor {
        root_path: format!("Characters/{}", player.character_class),
        prefab_name: player.character_class.clone(),
        mesh_name: player.mesh_name.clone(),
        character_class: player.character_class.clone(),
        character_id: player.character_id,
        skin_name: player.skin_name.clone(),
        ..Default::default()
    }
}

/// Walk in a circle so remote peers see movement.
pub fn circling_pose(elapsed_secs: f32) -> Pose {
    const RADIUS: f32 = 4.0;
    let angle = elapsed_secs * 0.5;
    let position = Vec3::new(angle.cos() * RADIUS, 0.0, angle.sin() * RADIUS);
    // Tangent to the circle.
    let forward = Vec3::new(-angle.sin(), 0.0, angle.cos());
    Pose::new(position, Quat::from_rotation_y(forward.x.atan2(forward.z)))
}
