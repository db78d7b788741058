//! Error types for the call core.
//!
//! The split follows the failure classes of the call path: media acquisition
//! is fatal to setup, negotiation failures abort the call, transport and
//! call-log failures are best-effort and logged where they occur.

use thiserror::Error;

/// Top-level error for call setup and negotiation.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    #[error("negotiation failed: {0}")]
    Negotiation(#[from] webrtc::Error),

    #[error("signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),
}

/// Local media acquisition and device errors.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("permission denied for {0}")]
    PermissionDenied(&'static str),

    #[error("no {0} input device available")]
    NoDevice(&'static str),

    #[error("device error: {0}")]
    Device(String),
}

/// Errors from the signaling channel and its transport.
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("channel closed")]
    Closed,
}

/// Errors from the auth collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authenticated")]
    NotAuthenticated,

    #[error("auth backend error: {0}")]
    Backend(String),
}
