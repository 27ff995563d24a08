use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolEvent;

use super::decoder::{ETHCollateralWithdrawn, EthStaked, USDBorrowed, USDRepaid};

/// The four MiniLend contract events this listener reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Staked,
    Borrowed,
    Repaid,
    Withdrawn,
}

impl EventKind {
    /// Subscription order used by the dispatcher.
    pub const ALL: [EventKind; 4] = [
        EventKind::Staked,
        EventKind::Borrowed,
        EventKind::Repaid,
        EventKind::Withdrawn,
    ];

    /// Event type sent to the notifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Staked => "eth_staked",
            Self::Borrowed => "usd_borrowed",
            Self::Repaid => "usd_repaid",
            Self::Withdrawn => "eth_withdrawn",
        }
    }

    /// Event name as declared in the contract ABI.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Staked => "EthStaked",
            Self::Borrowed => "USDBorrowed",
            Self::Repaid => "USDRepaid",
            Self::Withdrawn => "ETHCollateralWithdrawn",
        }
    }

    /// Canonical signature, e.g. `EthStaked(address,uint256)`.
    pub fn signature(&self) -> &'static str {
        match self {
            Self::Staked => EthStaked::SIGNATURE,
            Self::Borrowed => USDBorrowed::SIGNATURE,
            Self::Repaid => USDRepaid::SIGNATURE,
            Self::Withdrawn => ETHCollateralWithdrawn::SIGNATURE,
        }
    }

    /// keccak256 of the signature, i.e. the expected topic0.
    pub fn signature_hash(&self) -> B256 {
        match self {
            Self::Staked => EthStaked::SIGNATURE_HASH,
            Self::Borrowed => USDBorrowed::SIGNATURE_HASH,
            Self::Repaid => USDRepaid::SIGNATURE_HASH,
            Self::Withdrawn => ETHCollateralWithdrawn::SIGNATURE_HASH,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Where a log came from on chain. Used to suppress duplicate deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogOrigin {
    pub tx_hash: B256,
    pub log_index: u64,
    pub block_number: Option<u64>,
}

/// A decoded occurrence of one of the lending events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub user: Address,
    pub amount: U256,
    pub origin: Option<LogOrigin>,
}

impl LogEntry {
    pub fn new(user: Address, amount: U256) -> Self {
        Self {
            user,
            amount,
            origin: None,
        }
    }

    pub fn with_origin(mut self, origin: LogOrigin) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// A log entry tagged with the event it was decoded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LendingEvent {
    Staked(LogEntry),
    Borrowed(LogEntry),
    Repaid(LogEntry),
    Withdrawn(LogEntry),
}

impl LendingEvent {
    pub fn new(kind: EventKind, entry: LogEntry) -> Self {
        match kind {
            EventKind::Staked => Self::Staked(entry),
            EventKind::Borrowed => Self::Borrowed(entry),
            EventKind::Repaid => Self::Repaid(entry),
            EventKind::Withdrawn => Self::Withdrawn(entry),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Staked(_) => EventKind::Staked,
            Self::Borrowed(_) => EventKind::Borrowed,
            Self::Repaid(_) => EventKind::Repaid,
            Self::Withdrawn(_) => EventKind::Withdrawn,
        }
    }

    pub fn entry(&self) -> &LogEntry {
        match self {
            Self::Staked(e) | Self::Borrowed(e) | Self::Repaid(e) | Self::Withdrawn(e) => e,
        }
    }
}
