//! Error taxonomy shared by the venue adapters and the reconcilers.
//!
//! Venue failures fall into three families that the poll loop treats
//! differently:
//! - `Transport`: the venue could not be reached; the tick is skipped.
//! - `Rejected`: the venue refused an action; only the current batch is affected.
//! - `Data`: a snapshot or instrument could not be interpreted.
//!
//! Startup problems are reported as [`ConfigError`] and are fatal.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

/// Convenience alias for venue results.
pub type VenueResult<T> = Result<T, VenueError>;

/// Error returned by every venue adapter operation.
#[derive(Debug, Error)]
pub enum VenueError {
    /// Network or API failure (unreachable host, HTTP error status, undecodable body).
    #[error("transport error: {0}")]
    Transport(String),

    /// The venue understood the request and refused it.
    #[error("venue rejected request: {0}")]
    Rejected(Rejection),

    /// A response was received but its content is unusable.
    #[error("malformed venue data: {0}")]
    Data(String),
}

impl VenueError {
    /// Build a rejection from the venue's error text.
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Rejected(Rejection {
            kind: classify_rejection(&message),
            message,
        })
    }

    /// True when the venue refused an action for lack of margin or balance.
    pub fn is_margin_rejection(&self) -> bool {
        matches!(
            self,
            Self::Rejected(Rejection {
                kind: RejectionKind::InsufficientMargin,
                ..
            })
        )
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<reqwest::Error> for VenueError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Business rejection reported by the venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub message: String,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.kind)
    }
}

/// Coarse classification of a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Not enough margin (perp) or balance (spot) to carry the order.
    InsufficientMargin,
    /// Any other refusal (bad price, unknown order, reduce-only conflict...).
    Other,
}

/// Classify a venue error message. The only place message text is inspected;
/// everything downstream branches on [`RejectionKind`].
pub fn classify_rejection(message: &str) -> RejectionKind {
    let lower = message.to_lowercase();
    if lower.contains("margin") || lower.contains("insufficient spot balance") {
        RejectionKind::InsufficientMargin
    } else {
        RejectionKind::Other
    }
}

/// Fatal startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("target address is not set")]
    MissingTarget,

    #[error("copy ratio must be positive, got {0}")]
    InvalidCopyRatio(Decimal),

    #[error("slippage must be within [0, 1), got {0}")]
    InvalidSlippage(Decimal),

    #[error("poll interval must be at least one second")]
    InvalidPollInterval,

    #[error("no instrument classes enabled")]
    NoInstrumentClasses,

    #[error("unknown sync mode '{0}' (expected 'full' or 'order')")]
    UnknownSyncMode(String),

    #[error("unknown instrument class '{0}' (expected 'perp' or 'spot')")]
    UnknownInstrumentClass(String),

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("no usable signing key and no dry-run address configured")]
    NoSigningIdentity,
}
