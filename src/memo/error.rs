use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoError {
    #[error("invalid base58: {0}")]
    InvalidBase58(#[from] bs58::decode::Error),

    #[error("invalid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("memo too short: {0} bytes")]
    TooShort(usize),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("unknown trading type code: {0}")]
    UnknownTradingType(u8),

    #[error("unknown action code: {0}")]
    UnknownAction(u8),

    #[error("invalid payload length: {0} bytes after header")]
    InvalidLength(usize),

    #[error("memo body is not valid utf-8")]
    InvalidUtf8,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("memo is neither binary nor text encoded")]
    Undecodable,
}
