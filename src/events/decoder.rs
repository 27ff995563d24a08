use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;

use super::types::{EventKind, LogEntry, LogOrigin};

// MiniLend events. All four share the shape (address indexed user, uint256 amount),
// so one decoder path covers them.
sol! {
    #[derive(Debug)]
    event EthStaked(address indexed user, uint256 ethAmount);

    #[derive(Debug)]
    event USDBorrowed(address indexed user, uint256 usdAmount);

    #[derive(Debug)]
    event USDRepaid(address indexed user, uint256 usdAmount);

    #[derive(Debug)]
    event ETHCollateralWithdrawn(address indexed user, uint256 amount);
}

/// Decode a log that is expected to be of `kind`.
///
/// Returns `None` for another event's signature, a foreign emitter,
/// removed logs, or malformed topics/data.
pub fn decode_entry(kind: EventKind, log: &Log, contract: Address) -> Option<LogEntry> {
    let inner = &log.inner;

    if inner.address != contract {
        return None;
    }

    // Retracted by the node; not a new occurrence
    if log.removed {
        return None;
    }

    // Exactly 2 topics (signature + user) and 32 bytes of data (amount)
    let topics = inner.data.topics();
    if topics.len() != 2 || topics[0] != kind.signature_hash() {
        return None;
    }

    let data = inner.data.data.as_ref();
    if data.len() < 32 {
        return None;
    }

    let user = Address::from_word(topics[1]);
    let amount = U256::from_be_slice(&data[..32]);

    let mut entry = LogEntry::new(user, amount);
    if let (Some(tx_hash), Some(log_index)) = (log.transaction_hash, log.log_index) {
        entry = entry.with_origin(LogOrigin {
            tx_hash,
            log_index,
            block_number: log.block_number,
        });
    }

    Some(entry)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::{Bytes, LogData, B256};

    pub(crate) fn contract() -> Address {
        Address::repeat_byte(0x11)
    }

    pub(crate) fn make_log(kind: EventKind, user: Address, amount: U256) -> Log {
        let data = Bytes::from(amount.to_be_bytes::<32>().to_vec());
        Log {
            inner: alloy::primitives::Log {
                address: contract(),
                data: LogData::new_unchecked(
                    vec![kind.signature_hash(), user.into_word()],
                    data,
                ),
            },
            block_number: Some(100),
            transaction_hash: Some(B256::repeat_byte(0x22)),
            log_index: Some(3),
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_each_kind() {
        let user = Address::repeat_byte(0xaa);
        for kind in EventKind::ALL {
            let log = make_log(kind, user, U256::from(10));
            let entry = decode_entry(kind, &log, contract()).expect("decodes");
            assert_eq!(entry.user, user);
            assert_eq!(entry.amount, U256::from(10));

            let origin = entry.origin.expect("origin");
            assert_eq!(origin.tx_hash, B256::repeat_byte(0x22));
            assert_eq!(origin.log_index, 3);
            assert_eq!(origin.block_number, Some(100));
        }
    }

    #[test]
    fn test_decode_full_width_amount() {
        let log = make_log(EventKind::Borrowed, Address::repeat_byte(1), U256::MAX);
        let entry = decode_entry(EventKind::Borrowed, &log, contract()).unwrap();
        assert_eq!(entry.amount, U256::MAX);
    }

    #[test]
    fn test_reject_wrong_kind() {
        let log = make_log(EventKind::Staked, Address::repeat_byte(1), U256::from(1));
        assert!(decode_entry(EventKind::Repaid, &log, contract()).is_none());
    }

    #[test]
    fn test_reject_foreign_contract() {
        let log = make_log(EventKind::Staked, Address::repeat_byte(1), U256::from(1));
        assert!(decode_entry(EventKind::Staked, &log, Address::repeat_byte(0x99)).is_none());
    }

    #[test]
    fn test_reject_removed_and_malformed() {
        let mut removed = make_log(EventKind::Staked, Address::repeat_byte(1), U256::from(1));
        removed.removed = true;
        assert!(decode_entry(EventKind::Staked, &removed, contract()).is_none());

        let mut short = make_log(EventKind::Staked, Address::repeat_byte(1), U256::from(1));
        short.inner.data = LogData::new_unchecked(
            vec![EventKind::Staked.signature_hash(), Address::ZERO.into_word()],
            Bytes::from(vec![0u8; 8]),
        );
        assert!(decode_entry(EventKind::Staked, &short, contract()).is_none());

        let mut no_user = make_log(EventKind::Staked, Address::repeat_byte(1), U256::from(1));
        no_user.inner.data = LogData::new_unchecked(
            vec![EventKind::Staked.signature_hash()],
            Bytes::from(vec![0u8; 32]),
        );
        assert!(decode_entry(EventKind::Staked, &no_user, contract()).is_none());
    }

    #[test]
    fn test_missing_position_has_no_origin() {
        let mut log = make_log(EventKind::Withdrawn, Address::repeat_byte(1), U256::from(7));
        log.transaction_hash = None;
        let entry = decode_entry(EventKind::Withdrawn, &log, contract()).unwrap();
        assert!(entry.origin.is_none());
    }
}
