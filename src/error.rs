//! Error taxonomy for the listener core.

use alloy::primitives::{Address, U256};
use thiserror::Error;

use crate::events::types::EventKind;

/// Registering or cancelling a subscription with the event source failed.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("failed to subscribe to {kind} logs: {reason}")]
    Register { kind: EventKind, reason: String },

    #[error("failed to cancel subscription #{id}: {reason}")]
    Cancel { id: u64, reason: String },

    #[error("unknown subscription #{id}")]
    UnknownHandle { id: u64 },
}

/// Invalid construction parameters. Raised before any subscription attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid contract address '{0}'")]
    InvalidAddress(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid network descriptor: {0}")]
    InvalidNetwork(String),
}

/// Which side effect of a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Persistence,
    Notification,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Persistence => "persistence",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One or both effects of a handler failed for a single log entry.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{kind} persistence failed for {user} (amount {amount}): {reason}")]
    Persistence {
        kind: EventKind,
        user: Address,
        amount: U256,
        reason: String,
    },

    #[error("{kind} notification failed for {user} (amount {amount}): {reason}")]
    Notification {
        kind: EventKind,
        user: Address,
        amount: U256,
        reason: String,
    },

    #[error("{kind} persistence and notification failed for {user} (amount {amount}): {persistence}; {notification}")]
    Both {
        kind: EventKind,
        user: Address,
        amount: U256,
        persistence: String,
        notification: String,
    },
}

impl HandlerError {
    /// The effects that failed, persistence first.
    pub fn failed_effects(&self) -> &'static [Effect] {
        match self {
            Self::Persistence { .. } => &[Effect::Persistence],
            Self::Notification { .. } => &[Effect::Notification],
            Self::Both { .. } => &[Effect::Persistence, Effect::Notification],
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Persistence { kind, .. }
            | Self::Notification { kind, .. }
            | Self::Both { kind, .. } => *kind,
        }
    }
}
