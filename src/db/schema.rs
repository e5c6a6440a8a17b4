//! Table bootstrap
//!
//! One table per persisted entity: snapshots seen, settlement cursor, payment
//! states, the four strategy-order tables, withdrawals, the durable job
//! queue, strategy history, trading pairs and volume strategies. Everything
//! is `CREATE … IF NOT EXISTS` so startup is idempotent.

use sqlx::PgPool;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_snapshots (
    snapshot_id   UUID PRIMARY KEY,
    trace_id      UUID NOT NULL,
    asset_id      UUID NOT NULL,
    amount        NUMERIC NOT NULL,
    opponent_id   UUID NOT NULL,
    memo          TEXT NOT NULL,
    snapshot_created_at TIMESTAMPTZ NOT NULL,
    seen_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS settlement_cursor (
    source_id        TEXT PRIMARY KEY,
    last_created_at  TIMESTAMPTZ NOT NULL,
    last_snapshot_id UUID,
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS payment_states (
    order_id                  UUID PRIMARY KEY,
    order_type                TEXT NOT NULL,
    symbol                    TEXT NOT NULL,
    base_asset_id             UUID NOT NULL,
    base_asset_amount         NUMERIC NOT NULL,
    base_asset_snapshot_id    UUID NOT NULL,
    quote_asset_id            UUID,
    quote_asset_amount        NUMERIC,
    quote_asset_snapshot_id   UUID,
    base_fee_asset_id         UUID,
    base_fee_amount           NUMERIC,
    quote_fee_asset_id        UUID,
    quote_fee_amount          NUMERIC,
    required_base_withdrawal_fee  NUMERIC NOT NULL DEFAULT 0,
    required_quote_withdrawal_fee NUMERIC NOT NULL DEFAULT 0,
    required_market_making_fee    NUMERIC NOT NULL DEFAULT 0,
    state       TEXT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS arbitrage_orders (
    order_id          UUID PRIMARY KEY,
    user_id           UUID NOT NULL,
    pair_id           UUID NOT NULL,
    symbol            TEXT NOT NULL,
    amount_to_trade   NUMERIC NOT NULL,
    min_profitability NUMERIC NOT NULL,
    exchange_a_name   TEXT NOT NULL,
    exchange_b_name   TEXT NOT NULL,
    balance_a         NUMERIC NOT NULL,
    balance_b         NUMERIC NOT NULL,
    state             TEXT NOT NULL,
    reward_address    TEXT,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS market_making_orders (
    order_id                UUID PRIMARY KEY,
    user_id                 UUID NOT NULL,
    pair_id                 UUID NOT NULL,
    symbol                  TEXT NOT NULL,
    exchange_name           TEXT NOT NULL,
    bid_spread              NUMERIC NOT NULL,
    ask_spread              NUMERIC NOT NULL,
    order_amount            NUMERIC NOT NULL,
    order_refresh_secs      BIGINT NOT NULL,
    number_of_layers        INT NOT NULL,
    price_source_type       TEXT NOT NULL,
    amount_change_per_layer NUMERIC NOT NULL DEFAULT 0,
    amount_change_type      TEXT NOT NULL DEFAULT 'percent',
    ceiling_price           NUMERIC,
    floor_price             NUMERIC,
    balance_a               NUMERIC NOT NULL,
    balance_b               NUMERIC NOT NULL,
    state                   TEXT NOT NULL,
    reward_address          TEXT,
    created_at              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at              TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS simply_grow_orders (
    order_id       UUID PRIMARY KEY,
    user_id        UUID NOT NULL,
    asset_id       UUID NOT NULL,
    amount         NUMERIC NOT NULL,
    state          TEXT NOT NULL,
    reward_address TEXT,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS spot_orders (
    order_id          UUID PRIMARY KEY,
    snapshot_id       UUID NOT NULL UNIQUE,
    user_id           UUID NOT NULL,
    exchange_name     TEXT NOT NULL,
    order_kind        TEXT NOT NULL,
    side              TEXT NOT NULL,
    state             TEXT NOT NULL,
    symbol            TEXT NOT NULL,
    amount            NUMERIC NOT NULL,
    base_asset_id     UUID NOT NULL,
    target_asset_id   UUID NOT NULL,
    api_key_id        UUID,
    limit_price       NUMERIC,
    exchange_order_id TEXT,
    filled_amount     NUMERIC NOT NULL DEFAULT 0,
    avg_price         NUMERIC,
    created_at        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at        TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS withdrawals (
    id              UUID PRIMARY KEY,
    user_id         UUID NOT NULL,
    asset_id        UUID NOT NULL,
    amount          NUMERIC NOT NULL,
    destination     TEXT,
    destination_tag TEXT,
    kind            TEXT NOT NULL,
    memo            TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL,
    retry_count     INT NOT NULL DEFAULT 0,
    ledger_tx_id    TEXT,
    on_chain_tx_id  TEXT,
    error_message   TEXT,
    snapshot_id     UUID UNIQUE,
    last_checked_at TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS jobs (
    id           UUID PRIMARY KEY,
    kind         TEXT NOT NULL,
    payload      JSONB NOT NULL DEFAULT '{}'::jsonb,
    status       TEXT NOT NULL DEFAULT 'queued',
    run_at       TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    attempts     INT NOT NULL DEFAULT 0,
    max_attempts INT NOT NULL DEFAULT 5,
    last_error   TEXT,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs (status, run_at);

CREATE TABLE IF NOT EXISTS strategy_history (
    id           BIGSERIAL PRIMARY KEY,
    strategy_key TEXT NOT NULL,
    user_id      UUID NOT NULL,
    client_id    UUID NOT NULL,
    action       TEXT NOT NULL,
    base_amount  NUMERIC,
    quote_amount NUMERIC,
    price        NUMERIC,
    tx_ref       TEXT,
    detail       TEXT,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_strategy_history_key ON strategy_history (strategy_key, created_at);

CREATE TABLE IF NOT EXISTS trading_pairs (
    pair_id       UUID PRIMARY KEY,
    symbol        TEXT NOT NULL,
    base_asset_id UUID NOT NULL,
    quote_asset_id UUID NOT NULL,
    exchange_ids  TEXT[] NOT NULL DEFAULT '{}',
    enabled       BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS volume_strategies (
    id                   UUID PRIMARY KEY,
    user_id              UUID NOT NULL,
    client_id            UUID NOT NULL,
    state                TEXT NOT NULL,
    base_interval_secs   BIGINT NOT NULL,
    jitter_pct           SMALLINT NOT NULL,
    max_price_impact_pct NUMERIC NOT NULL,
    slippage_bps         INT NOT NULL,
    gas_ceiling          NUMERIC,
    dry_run              BOOLEAN NOT NULL DEFAULT TRUE,
    amount_per_cycle     NUMERIC NOT NULL,
    chain_id             BIGINT NOT NULL,
    token_in             TEXT NOT NULL,
    token_out            TEXT NOT NULL,
    fee_tier             INT NOT NULL,
    signer_a             TEXT NOT NULL,
    signer_b             TEXT NOT NULL,
    created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (user_id, client_id)
);
"#;

/// Run the bootstrap DDL. Safe to call on every startup.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}
