use coop_net::{ProtocolError, TransportError};

use crate::appearance::AppearanceError;
use crate::avatar::AvatarError;

/// Errors raised by session operations and deferred actions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("only the host can start a run")]
    NotHost,
    #[error("not everyone is ready: {0}")]
    NotReady(String),
    #[error("session has been disposed")]
    Disposed,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("appearance error: {0}")]
    Appearance(#[from] AppearanceError),
    #[error("avatar error: {0}")]
    Avatar(#[from] AvatarError),
}
