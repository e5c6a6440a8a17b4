//! Memo wire protocol
//!
//! Deposits on the settlement network carry an opaque memo naming the
//! strategy to start. Two encodings coexist:
//! - binary, base58, double-SHA256 checksummed (create actions)
//! - colon-delimited text, base64, best-effort (deposit/legacy actions)
//!
//! A memo is never trusted before its checksum verifies; unknown numeric
//! codes are a decode failure, never a default.

pub mod binary;
pub mod error;
pub mod text;
pub mod types;

pub use binary::{decode_binary, encode_binary};
pub use error::MemoError;
pub use text::{decode_text, encode_text};
pub use types::{Memo, MemoAction, MemoPayload, RewardAddress, TextMemo, TradingType};

impl Memo {
    /// Decode a raw memo string, trying the checksummed binary form first
    /// and falling back to the delimited text form.
    pub fn decode(raw: &str) -> Result<Memo, MemoError> {
        if let Ok(payload) = decode_binary(raw) {
            return Ok(Memo::Binary(payload));
        }
        match decode_text(raw) {
            Ok(text) => Ok(Memo::Text(text)),
            Err(_) => Err(MemoError::Undecodable),
        }
    }
}
