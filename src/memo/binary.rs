//! Binary Memo Codec
//!
//! Wire layout, base58 encoded:
//!
//! ```text
//! [version u8][trading_type u8][action u8][ref 16B]...[reward_addr 20B]?[checksum 4B]
//! ```
//!
//! The checksum is the first four bytes of SHA256(SHA256(payload)) where
//! payload is everything before the checksum. Decoding verifies the
//! checksum before interpreting a single field.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::error::MemoError;
use super::types::{MemoAction, MemoPayload, RewardAddress, TradingType};

const HEADER_LEN: usize = 3;
const REF_LEN: usize = 16;
const CHECKSUM_LEN: usize = 4;

/// version + type + action + one ref + checksum
const MIN_LEN: usize = HEADER_LEN + REF_LEN + CHECKSUM_LEN;

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&second[..CHECKSUM_LEN]);
    out
}

/// Encode a payload into its base58 wire form.
pub fn encode_binary(payload: &MemoPayload) -> String {
    let mut raw = Vec::with_capacity(
        HEADER_LEN + payload.refs.len() * REF_LEN + RewardAddress::LEN + CHECKSUM_LEN,
    );
    raw.push(payload.version);
    raw.push(payload.trading_type.code());
    raw.push(payload.action.code());
    for r in &payload.refs {
        raw.extend_from_slice(r.as_bytes());
    }
    if let Some(addr) = &payload.reward_address {
        raw.extend_from_slice(addr.as_bytes());
    }
    let ck = checksum(&raw);
    raw.extend_from_slice(&ck);
    bs58::encode(raw).into_string()
}

/// Decode and verify a base58 wire memo.
pub fn decode_binary(memo: &str) -> Result<MemoPayload, MemoError> {
    let raw = bs58::decode(memo).into_vec()?;
    if raw.len() < MIN_LEN {
        return Err(MemoError::TooShort(raw.len()));
    }

    let (payload, ck) = raw.split_at(raw.len() - CHECKSUM_LEN);
    if checksum(payload) != ck {
        return Err(MemoError::ChecksumMismatch);
    }

    let version = payload[0];
    let trading_type = TradingType::from_code(payload[1])
        .ok_or(MemoError::UnknownTradingType(payload[1]))?;
    let action =
        MemoAction::from_code(payload[2]).ok_or(MemoError::UnknownAction(payload[2]))?;

    // Body is n refs of 16 bytes, optionally followed by a 20-byte
    // reward address. The trailing 20 is unambiguous because 20 is not
    // a multiple of 16 for any ref count difference we accept.
    let body = &payload[HEADER_LEN..];
    let (ref_bytes, addr_bytes) = if body.len() % REF_LEN == 0 {
        (body, None)
    } else if body.len() > RewardAddress::LEN
        && (body.len() - RewardAddress::LEN) % REF_LEN == 0
    {
        let (refs, addr) = body.split_at(body.len() - RewardAddress::LEN);
        (refs, Some(addr))
    } else {
        return Err(MemoError::InvalidLength(body.len()));
    };
    if ref_bytes.is_empty() {
        return Err(MemoError::InvalidLength(body.len()));
    }

    let refs = ref_bytes
        .chunks_exact(REF_LEN)
        .map(|chunk| {
            let arr: [u8; REF_LEN] = chunk.try_into().unwrap();
            Uuid::from_bytes(arr)
        })
        .collect();

    let reward_address = match addr_bytes {
        Some(bytes) => RewardAddress::from_slice(bytes),
        None => None,
    };

    Ok(MemoPayload {
        version,
        trading_type,
        action,
        refs,
        reward_address,
    })
}
