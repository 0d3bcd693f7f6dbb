//! Avatar poses, orientation flattening, and send-rate limiting.

use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

/// Squared length below which a flattened axis is treated as degenerate.
const DEGENERATE_SQ: f32 = 1e-6;

/// Position and orientation of a pawn.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Build from wire components. `None` when any component is not finite.
    pub fn from_wire(position: [f32; 3], rotation: [f32; 4]) -> Option<Self> {
        let position = Vec3::from_array(position);
        let rotation = Quat::from_array(rotation);
        if !position.is_finite() || !rotation.is_finite() {
            return None;
        }
        Some(Self { position, rotation })
    }

    pub fn to_wire(&self) -> ([f32; 3], [f32; 4]) {
        (self.position.to_array(), self.rotation.to_array())
    }

    /// Same position, yaw-only orientation.
    pub fn flattened(&self) -> Self {
        Self {
            position: self.position,
            rotation: flatten_orientation(self.rotation),
        }
    }
}

/// Reduce a rotation to its heading about the vertical axis.
///
/// Uses the rotated forward axis projected onto the ground plane. When that
/// projection vanishes (looking straight up or down) the rotated right axis
/// supplies the heading instead. If both vanish, or the input is not a usable
/// rotation, the result is identity. Never produces NaN.
pub fn flatten_orientation(rotation: Quat) -> Quat {
    if !rotation.is_finite() || rotation.length_squared() < DEGENERATE_SQ {
        return Quat::IDENTITY;
    }
    let rotation = rotation.normalize();
    let forward = flat(rotation * Vec3::Z);
    if forward.length_squared() >= DEGENERATE_SQ {
        return heading(forward);
    }
    let right = flat(rotation * Vec3::X);
    if right.length_squared() >= DEGENERATE_SQ {
        // Forward is a quarter turn counter-clockwise from right.
        return heading(right.cross(Vec3::Y));
    }
    Quat::IDENTITY
}

fn flat(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

fn heading(forward: Vec3) -> Quat {
    Quat::from_rotation_y(forward.x.atan2(forward.z))
}

// ---------------------------------------------------------------------------
// Send-rate limiting
// ---------------------------------------------------------------------------

/// Fires at most once per interval.
#[derive(Debug, Clone)]
pub struct ReplicationTimer {
    interval: Duration,
    last_fired: Option<Instant>,
}

impl ReplicationTimer {
    /// A timer firing `rate_hz` times per second. Non-positive rates fire
    /// every time.
    pub fn new(rate_hz: f32) -> Self {
        let interval = if rate_hz.is_finite() && rate_hz > 0.0 {
            Duration::from_secs_f64(1.0 / f64::from(rate_hz))
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last_fired: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` and rearms when the interval has elapsed since the
    /// last firing. The first call always fires.
    pub fn fire(&mut self, now: Instant) -> bool {
        let due = match self.last_fired {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_fired = Some(now);
        }
        due
    }

    /// Fire on the next call regardless of elapsed time.
    pub fn force(&mut self) {
        self.last_fired = None;
    }
}
