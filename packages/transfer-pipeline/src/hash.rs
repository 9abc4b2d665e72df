//! Event vote data and derived addresses
//!
//! Every relay event lives at an address computed from the deposit's vote
//! data and the hub event configuration it is deployed under. The derivation
//! is a pure function so any process can recompute it from chain data alone.
//!
//! ## Packed Layouts
//!
//! ```text
//! EVM     0x01 | tx hash (32) | log index (4) | block number (8) | block hash (32) | len (4) | data
//! TVM     0x02 | tx lt (8) | timestamp (4) | len (4) | data
//! Solana  0x03 | account seed (16) | slot (8) | block time (8) | signature (64) | len (4) | data
//! ```
//!
//! Event address: `0:keccak256("event" | configuration (33) | packed vote data)`

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::SolType;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use tiny_keccak::{Hasher, Keccak};

use crate::address::{SolanaSignature, TvmAddress};
use crate::types::NetworkKind;

/// Address of a relay event contract on the hub
pub type EventAddress = TvmAddress;

const EVENT_SEED: &[u8] = b"event";
const CREDIT_SEED: &[u8] = b"credit";
const PROPOSAL_SEED: &[u8] = b"proposal";

/// Compute keccak256 hash of data
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    output
}

/// Payload proving a deposit, decoded from the source transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum EventVoteData {
    Evm {
        event_transaction: B256,
        event_index: u32,
        event_data: Bytes,
        event_block_number: u64,
        event_block: B256,
    },
    Tvm {
        event_transaction_lt: u64,
        event_timestamp: u32,
        event_data: Bytes,
    },
    Solana {
        account_seed: u128,
        slot: u64,
        block_time: i64,
        tx_signature: SolanaSignature,
        event_data: Bytes,
    },
}

impl EventVoteData {
    pub fn kind(&self) -> NetworkKind {
        match self {
            EventVoteData::Evm { .. } => NetworkKind::Evm,
            EventVoteData::Tvm { .. } => NetworkKind::Tvm,
            EventVoteData::Solana { .. } => NetworkKind::Solana,
        }
    }

    pub fn event_data(&self) -> &Bytes {
        match self {
            EventVoteData::Evm { event_data, .. }
            | EventVoteData::Tvm { event_data, .. }
            | EventVoteData::Solana { event_data, .. } => event_data,
        }
    }

    /// Canonical packed encoding
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.event_data().len());
        match self {
            EventVoteData::Evm {
                event_transaction,
                event_index,
                event_data,
                event_block_number,
                event_block,
            } => {
                out.push(0x01);
                out.extend_from_slice(event_transaction.as_slice());
                out.extend_from_slice(&event_index.to_be_bytes());
                out.extend_from_slice(&event_block_number.to_be_bytes());
                out.extend_from_slice(event_block.as_slice());
                push_data(&mut out, event_data);
            }
            EventVoteData::Tvm {
                event_transaction_lt,
                event_timestamp,
                event_data,
            } => {
                out.push(0x02);
                out.extend_from_slice(&event_transaction_lt.to_be_bytes());
                out.extend_from_slice(&event_timestamp.to_be_bytes());
                push_data(&mut out, event_data);
            }
            EventVoteData::Solana {
                account_seed,
                slot,
                block_time,
                tx_signature,
                event_data,
            } => {
                out.push(0x03);
                out.extend_from_slice(&account_seed.to_be_bytes());
                out.extend_from_slice(&slot.to_be_bytes());
                out.extend_from_slice(&block_time.to_be_bytes());
                out.extend_from_slice(tx_signature.as_bytes());
                push_data(&mut out, event_data);
            }
        }
        out
    }
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

/// Address of the relay event deployed under `configuration` for `vote`
pub fn derive_event_address(configuration: &TvmAddress, vote: &EventVoteData) -> EventAddress {
    let encoded = vote.encode();
    let mut data = Vec::with_capacity(EVENT_SEED.len() + 33 + encoded.len());
    data.extend_from_slice(EVENT_SEED);
    data.extend_from_slice(&configuration.to_bytes());
    data.extend_from_slice(&encoded);
    TvmAddress::new(0, keccak256(&data))
}

/// Address of the credit processor serving a relay event
pub fn derive_credit_processor_address(event: &EventAddress) -> TvmAddress {
    let mut data = Vec::with_capacity(CREDIT_SEED.len() + 33);
    data.extend_from_slice(CREDIT_SEED);
    data.extend_from_slice(&event.to_bytes());
    TvmAddress::new(0, keccak256(&data))
}

// ============================================================================
// Outbound release payloads
// ============================================================================

sol! {
    /// Payload an EVM vault verifies before releasing a hub transfer
    struct HubEventPayload {
        uint64 eventTransactionLt;
        uint32 eventTimestamp;
        bytes eventData;
        int8 configurationWid;
        uint256 configurationAddress;
        int8 eventContractWid;
        uint256 eventContractAddress;
        address proxy;
        uint32 round;
    }
}

/// ABI-encoded release payload for a hub event heading to an EVM vault
pub fn encode_release_payload(
    vote: &EventVoteData,
    configuration: &TvmAddress,
    event: &EventAddress,
    proxy: Address,
    round: u32,
) -> Option<Bytes> {
    let EventVoteData::Tvm {
        event_transaction_lt,
        event_timestamp,
        event_data,
    } = vote
    else {
        return None;
    };

    let payload = HubEventPayload {
        eventTransactionLt: *event_transaction_lt,
        eventTimestamp: *event_timestamp,
        eventData: event_data.clone(),
        configurationWid: configuration.workchain,
        configurationAddress: U256::from_be_bytes(configuration.account),
        eventContractWid: event.workchain,
        eventContractAddress: U256::from_be_bytes(event.account),
        proxy,
        round,
    };
    Some(Bytes::from(<HubEventPayload as SolType>::abi_encode(&payload)))
}

/// Withdrawal id an EVM vault records for a release payload
pub fn withdrawal_id(payload: &[u8]) -> B256 {
    B256::from(keccak256(payload))
}

/// Program-derived address of the Solana release proposal for an event
pub fn solana_proposal_address(program: &Pubkey, round: u32, event: &EventAddress) -> Pubkey {
    let event_hash = keccak256(&event.to_bytes());
    let (address, _bump) = Pubkey::find_program_address(
        &[PROPOSAL_SEED, &round.to_le_bytes(), &event_hash],
        program,
    );
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evm_vote(index: u32) -> EventVoteData {
        EventVoteData::Evm {
            event_transaction: B256::repeat_byte(0xab),
            event_index: index,
            event_data: Bytes::from(vec![1, 2, 3]),
            event_block_number: 19_000_000,
            event_block: B256::repeat_byte(0x11),
        }
    }

    fn configuration() -> TvmAddress {
        TvmAddress::new(0, [0x42; 32])
    }

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            hex::encode(keccak256(&[])),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_event_address_is_deterministic() {
        let first = derive_event_address(&configuration(), &evm_vote(3));
        let second = derive_event_address(&configuration(), &evm_vote(3));
        assert_eq!(first, second);
        assert_eq!(first.workchain, 0);
    }

    #[test]
    fn test_event_address_depends_on_inputs() {
        let base = derive_event_address(&configuration(), &evm_vote(3));
        assert_ne!(base, derive_event_address(&configuration(), &evm_vote(4)));

        let other_config = TvmAddress::new(0, [0x43; 32]);
        assert_ne!(base, derive_event_address(&other_config, &evm_vote(3)));
    }

    #[test]
    fn test_packed_layout_lengths() {
        assert_eq!(evm_vote(0).encode().len(), 1 + 32 + 4 + 8 + 32 + 4 + 3);

        let tvm = EventVoteData::Tvm {
            event_transaction_lt: 7,
            event_timestamp: 1_700_000_000,
            event_data: Bytes::new(),
        };
        assert_eq!(tvm.encode().len(), 1 + 8 + 4 + 4);
        assert_eq!(tvm.kind(), NetworkKind::Tvm);
    }

    #[test]
    fn test_release_payload_only_for_hub_votes() {
        let event = derive_event_address(&configuration(), &evm_vote(0));
        assert!(encode_release_payload(&evm_vote(0), &configuration(), &event, Address::ZERO, 1)
            .is_none());

        let tvm = EventVoteData::Tvm {
            event_transaction_lt: 7,
            event_timestamp: 1_700_000_000,
            event_data: Bytes::from(vec![9; 40]),
        };
        let payload =
            encode_release_payload(&tvm, &configuration(), &event, Address::ZERO, 1).unwrap();
        assert_eq!(payload.len() % 32, 0);
        assert_eq!(withdrawal_id(&payload), withdrawal_id(&payload));
    }

    #[test]
    fn test_solana_proposal_address_is_stable() {
        let program = Pubkey::new_from_array([5; 32]);
        let event = TvmAddress::new(0, [1; 32]);
        let a = solana_proposal_address(&program, 4, &event);
        assert_eq!(a, solana_proposal_address(&program, 4, &event));
        assert_ne!(a, solana_proposal_address(&program, 5, &event));
    }

    #[test]
    fn test_vote_data_serde_tagged() {
        let json = serde_json::to_value(evm_vote(1)).unwrap();
        assert_eq!(json["kind"], "evm");
        let back: EventVoteData = serde_json::from_value(json).unwrap();
        assert_eq!(back, evm_vote(1));
    }
}
