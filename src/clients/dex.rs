//! DEX Router Adapter
//!
//! Single-hop quote and swap primitives against an AMM pool, keyed by
//! chain id, token pair, and fee tier. Used by the volume strategy loop.

use std::fmt::Debug;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::ClientError;

/// Identifies one pool on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolRef {
    pub chain_id: u64,
    pub token_in: String,
    pub token_out: String,
    pub fee_tier: u32,
}

#[derive(Debug, Clone)]
pub struct PoolInfo {
    /// Marginal price, token_out per token_in.
    pub spot_price: Decimal,
    pub liquidity: Decimal,
}

#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub tx_hash: String,
    pub amount_out: Decimal,
}

#[async_trait]
pub trait DexAdapter: Send + Sync + Debug {
    async fn get_pool(&self, pool: &PoolRef) -> Result<PoolInfo, ClientError>;

    /// Exact amount of token_out a swap of `amount_in` would return now.
    async fn quote_exact_input_single(
        &self,
        pool: &PoolRef,
        amount_in: Decimal,
    ) -> Result<Decimal, ClientError>;

    /// Estimated gas cost of the swap, denominated in token_out.
    async fn estimate_gas(&self, pool: &PoolRef, amount_in: Decimal)
        -> Result<Decimal, ClientError>;

    /// Execute the swap with `signer`, reverting below `min_amount_out`.
    async fn exact_input_single(
        &self,
        pool: &PoolRef,
        signer: &str,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<SwapReceipt, ClientError>;
}

/// A swap captured by [`MockDex`] for assertions.
#[derive(Debug, Clone)]
pub struct RecordedSwap {
    pub signer: String,
    pub amount_in: Decimal,
    pub min_amount_out: Decimal,
}

/// In-memory AMM for development and tests. Prices and quotes are
/// scripted; swaps return exactly the quoted amount.
#[derive(Debug)]
pub struct MockDex {
    spot_price: Mutex<Decimal>,
    /// When set, overrides the linear quote derived from spot price.
    quote_override: Mutex<Option<Decimal>>,
    gas: Mutex<Decimal>,
    swaps: Mutex<Vec<RecordedSwap>>,
    swap_count: AtomicUsize,
    quote_count: AtomicUsize,
    fail_swap: Mutex<bool>,
}

impl Default for MockDex {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDex {
    pub fn new() -> Self {
        Self {
            spot_price: Mutex::new(Decimal::ONE),
            quote_override: Mutex::new(None),
            gas: Mutex::new(Decimal::ZERO),
            swaps: Mutex::new(Vec::new()),
            swap_count: AtomicUsize::new(0),
            quote_count: AtomicUsize::new(0),
            fail_swap: Mutex::new(false),
        }
    }

    pub fn set_spot_price(&self, price: Decimal) {
        *self.spot_price.lock().unwrap() = price;
    }

    /// Force the next quotes to this output amount, regardless of input.
    pub fn set_quote(&self, amount_out: Decimal) {
        *self.quote_override.lock().unwrap() = Some(amount_out);
    }

    pub fn set_gas(&self, gas: Decimal) {
        *self.gas.lock().unwrap() = gas;
    }

    pub fn set_fail_swap(&self, fail: bool) {
        *self.fail_swap.lock().unwrap() = fail;
    }

    pub fn swap_count(&self) -> usize {
        self.swap_count.load(Ordering::SeqCst)
    }

    pub fn quote_count(&self) -> usize {
        self.quote_count.load(Ordering::SeqCst)
    }

    pub fn swaps(&self) -> Vec<RecordedSwap> {
        self.swaps.lock().unwrap().clone()
    }
}

#[async_trait]
impl DexAdapter for MockDex {
    async fn get_pool(&self, _pool: &PoolRef) -> Result<PoolInfo, ClientError> {
        Ok(PoolInfo {
            spot_price: *self.spot_price.lock().unwrap(),
            liquidity: Decimal::from(1_000_000),
        })
    }

    async fn quote_exact_input_single(
        &self,
        _pool: &PoolRef,
        amount_in: Decimal,
    ) -> Result<Decimal, ClientError> {
        self.quote_count.fetch_add(1, Ordering::SeqCst);
        if let Some(amount_out) = *self.quote_override.lock().unwrap() {
            return Ok(amount_out);
        }
        Ok(amount_in * *self.spot_price.lock().unwrap())
    }

    async fn estimate_gas(
        &self,
        _pool: &PoolRef,
        _amount_in: Decimal,
    ) -> Result<Decimal, ClientError> {
        Ok(*self.gas.lock().unwrap())
    }

    async fn exact_input_single(
        &self,
        pool: &PoolRef,
        signer: &str,
        amount_in: Decimal,
        min_amount_out: Decimal,
    ) -> Result<SwapReceipt, ClientError> {
        self.swap_count.fetch_add(1, Ordering::SeqCst);
        if *self.fail_swap.lock().unwrap() {
            return Err(ClientError::Rejected("mock swap revert".to_string()));
        }

        let amount_out = self.quote_exact_input_single(pool, amount_in).await?;
        if amount_out < min_amount_out {
            return Err(ClientError::Rejected(format!(
                "slippage: out {amount_out} below min {min_amount_out}"
            )));
        }

        self.swaps.lock().unwrap().push(RecordedSwap {
            signer: signer.to_string(),
            amount_in,
            min_amount_out,
        });
        Ok(SwapReceipt {
            tx_hash: format!("0x{}", Uuid::new_v4().simple()),
            amount_out,
        })
    }
}
