//! Per-remote replication state and relay routing.
//!
//! Topology is a star: clients only talk to the host, and the host forwards
//! each client's pose and appearance to everyone else. A client therefore
//! learns about other clients solely through relayed messages, keyed by the
//! original sender id carried in the payload.

use coop_net::PeerId;

use crate::appearance::AppearanceDescriptor;
use crate::avatar::AvatarHandle;
use crate::pose::Pose;

/// What this machine knows about one remote player.
#[derive(Debug, Default)]
pub struct RemotePeer {
    /// Most recent appearance received.
    pub latest: Option<AppearanceDescriptor>,
    /// Serialized form of `latest`, kept for late-joiner replay.
    pub payload: Option<String>,
    /// Appearance the current avatar was built from.
    pub applied: Option<AppearanceDescriptor>,
    /// Last pose received, flattened.
    pub pose: Option<Pose>,
    pub avatar: Option<AvatarHandle>,
    /// Set when the avatar must be rebuilt at the end of the tick.
    pub needs_replacement: bool,
    /// `(character, skin)` the factory last refused, so it is not retried
    /// every tick.
    pub rejected: Option<(i32, String)>,
}

impl RemotePeer {
    /// Record a new appearance and decide whether the avatar must change.
    pub fn record_appearance(&mut self, appearance: AppearanceDescriptor, payload: String) {
        let changed = match &self.applied {
            Some(applied) => !applied.matches(&appearance) && appearance.has_character(),
            None => true,
        };
        if self.avatar.is_none() || changed {
            self.needs_replacement = true;
        }
        if self
            .rejected
            .as_ref()
            .is_some_and(|(id, skin)| *id != appearance.character_id || *skin != appearance.skin_name)
        {
            self.rejected = None;
        }
        self.latest = Some(appearance);
        self.payload = Some(payload);
    }

    /// The appearance the avatar should be rebuilt from, if it needs one.
    pub fn pending_build(&self) -> Option<&AppearanceDescriptor> {
        if !self.needs_replacement {
            return None;
        }
        let latest = self.latest.as_ref()?;
        let refused = self
            .rejected
            .as_ref()
            .is_some_and(|(id, skin)| *id == latest.character_id && *skin == latest.skin_name);
        (!refused).then_some(latest)
    }

    /// Forget the avatar without destroying it, e.g. after a scene change
    /// took it down. It is rebuilt from the latest appearance.
    pub fn invalidate_avatar(&mut self) {
        self.avatar = None;
        self.applied = None;
        self.needs_replacement = self.latest.is_some();
    }

    pub fn spawn_pose(&self) -> Pose {
        self.pose.unwrap_or_default()
    }
}

/// Peers a relayed message from `sender` goes to.
pub fn relay_targets(sender: PeerId, connected: impl IntoIterator<Item = PeerId>) -> Vec<PeerId> {
    connected.into_iter().filter(|peer| *peer != sender).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn look(id: i32, skin: &str) -> AppearanceDescriptor {
        AppearanceDescriptor {
            mesh_name: "Body".into(),
            character_id: id,
            skin_name: skin.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_first_appearance_requests_build() {
        let mut remote = RemotePeer::default();
        remote.record_appearance(look(1, "a"), "p".into());
        assert_eq!(remote.pending_build().map(|a| a.character_id), Some(1));
        assert_eq!(remote.payload.as_deref(), Some("p"));
    }

    #[test]
    fn test_matching_appearance_keeps_avatar() {
        let mut remote = RemotePeer {
            avatar: Some(AvatarHandle(1)),
            applied: Some(look(1, "a")),
            ..Default::default()
        };
        let mut same = look(1, "a");
        same.mesh_name = "OtherMesh".into();
        remote.record_appearance(same, "p".into());
        assert!(remote.pending_build().is_none());
    }

    #[test]
    fn test_changed_skin_requests_replacement() {
        let mut remote = RemotePeer {
            avatar: Some(AvatarHandle(1)),
            applied: Some(look(1, "a")),
            ..Default::default()
        };
        remote.record_appearance(look(1, "b"), "p".into());
        assert!(remote.pending_build().is_some());
    }

    #[test]
    fn test_deselect_does_not_replace() {
        let mut remote = RemotePeer {
            avatar: Some(AvatarHandle(1)),
            applied: Some(look(1, "a")),
            ..Default::default()
        };
        remote.record_appearance(look(-1, ""), "p".into());
        assert!(remote.pending_build().is_none());
    }

    #[test]
    fn test_rejected_look_is_not_retried() {
        let mut remote = RemotePeer::default();
        remote.record_appearance(look(2, "x"), "p".into());
        remote.rejected = Some((2, "x".into()));
        assert!(remote.pending_build().is_none());

        remote.record_appearance(look(3, "x"), "q".into());
        assert!(remote.rejected.is_none());
        assert!(remote.pending_build().is_some());
    }

    #[test]
    fn test_invalidate_rebuilds_from_latest() {
        let mut remote = RemotePeer {
            avatar: Some(AvatarHandle(4)),
            applied: Some(look(1, "a")),
            latest: Some(look(1, "a")),
            ..Default::default()
        };
        remote.invalidate_avatar();
        assert!(remote.avatar.is_none());
        assert!(remote.pending_build().is_some());
    }

    #[test]
    fn test_relay_excludes_sender() {
        let targets = relay_targets(PeerId(2), [PeerId(1), PeerId(2), PeerId(3)]);
        assert_eq!(targets, vec![PeerId(1), PeerId(3)]);
    }
}
