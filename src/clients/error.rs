use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("remote rejected request: {0}")]
    Rejected(String),

    #[error("unknown exchange order status: {0}")]
    UnknownOrderStatus(String),

    #[error("no client configured for exchange: {0}")]
    UnknownExchange(String),

    #[error("pool not found: chain {chain_id} {token_in}/{token_out} fee {fee_tier}")]
    PoolNotFound {
        chain_id: u64,
        token_in: String,
        token_out: String,
        fee_tier: u32,
    },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
