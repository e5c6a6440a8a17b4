//! Text Memo Codec
//!
//! Legacy colon-delimited form: numeric trading type and action codes,
//! then protocol-specific fields, joined with `:` and base64 encoded
//! without padding. No checksum; structural validation only.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;

use super::error::MemoError;
use super::types::{MemoAction, TextMemo, TradingType};

/// Encode a text memo into its base64 wire form.
pub fn encode_text(memo: &TextMemo) -> String {
    let mut parts = Vec::with_capacity(2 + memo.fields.len());
    parts.push(memo.trading_type.code().to_string());
    parts.push(memo.action.code().to_string());
    parts.extend(memo.fields.iter().cloned());
    STANDARD_NO_PAD.encode(parts.join(":"))
}

/// Decode a base64 text memo. Tolerates padded input from older senders.
pub fn decode_text(memo: &str) -> Result<TextMemo, MemoError> {
    let trimmed = memo.trim_end_matches('=');
    let raw = STANDARD_NO_PAD.decode(trimmed)?;
    let body = String::from_utf8(raw).map_err(|_| MemoError::InvalidUtf8)?;

    let mut parts = body.split(':');
    let type_code = parts.next().ok_or(MemoError::MissingField("trading_type"))?;
    let action_code = parts.next().ok_or(MemoError::MissingField("action"))?;

    let type_code: u8 = type_code
        .parse()
        .map_err(|_| MemoError::MissingField("trading_type"))?;
    let action_code: u8 = action_code
        .parse()
        .map_err(|_| MemoError::MissingField("action"))?;

    let trading_type =
        TradingType::from_code(type_code).ok_or(MemoError::UnknownTradingType(type_code))?;
    let action =
        MemoAction::from_code(action_code).ok_or(MemoError::UnknownAction(action_code))?;

    Ok(TextMemo {
        trading_type,
        action,
        fields: parts.map(str::to_owned).collect(),
    })
}
