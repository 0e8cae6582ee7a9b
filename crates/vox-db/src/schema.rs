//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Profiles
-- ============================================================

CREATE TABLE IF NOT EXISTS profiles (
    user_id TEXT PRIMARY KEY,
    balance INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    pending_balance INTEGER NOT NULL DEFAULT 0 CHECK (pending_balance >= 0),
    lifetime_earned INTEGER NOT NULL DEFAULT 0,
    trust_score INTEGER NOT NULL DEFAULT 100 CHECK (trust_score BETWEEN 0 AND 200),
    role TEXT NOT NULL DEFAULT 'user',
    referred_by TEXT,
    referral_earnings INTEGER NOT NULL DEFAULT 0,
    languages TEXT NOT NULL DEFAULT '[]',
    daily_validations INTEGER NOT NULL DEFAULT 0,
    total_validations INTEGER NOT NULL DEFAULT 0,
    active_days INTEGER NOT NULL DEFAULT 0,
    last_daily_reset INTEGER NOT NULL DEFAULT 0,
    last_active_day INTEGER,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_profiles_referred_by ON profiles(referred_by);

-- ============================================================
-- Clips & Votes
-- ============================================================

CREATE TABLE IF NOT EXISTS clips (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL REFERENCES profiles(user_id),
    language TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'approved', 'rejected')),
    parent_clip_id TEXT,
    vote_count INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    settled_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_clips_status ON clips(status);
CREATE INDEX IF NOT EXISTS idx_clips_parent ON clips(parent_clip_id);

CREATE TABLE IF NOT EXISTS validations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    clip_id TEXT NOT NULL REFERENCES clips(id),
    validator_id TEXT NOT NULL REFERENCES profiles(user_id),
    is_valid INTEGER NOT NULL,
    feedback TEXT,
    created_at INTEGER NOT NULL,
    UNIQUE (clip_id, validator_id)
);

CREATE TRIGGER IF NOT EXISTS validations_no_update
BEFORE UPDATE ON validations
BEGIN
    SELECT RAISE(ABORT, 'validations are immutable');
END;

-- ============================================================
-- Ledger
-- ============================================================

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL REFERENCES profiles(user_id),
    amount INTEGER NOT NULL,
    locked_delta INTEGER NOT NULL DEFAULT 0,
    tx_type TEXT NOT NULL,
    description TEXT NOT NULL,
    reference_id TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id, id);

CREATE TRIGGER IF NOT EXISTS transactions_no_update
BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transactions_no_delete
BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'ledger entries are append-only');
END;

CREATE TABLE IF NOT EXISTS reward_rates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action_type TEXT NOT NULL,
    amount INTEGER NOT NULL CHECK (amount >= 0),
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_rates_active
    ON reward_rates(action_type) WHERE is_active = 1;

-- ============================================================
-- Withdrawals
-- ============================================================

CREATE TABLE IF NOT EXISTS payout_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    idempotency_key TEXT NOT NULL UNIQUE,
    user_id TEXT NOT NULL REFERENCES profiles(user_id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    locked_amount INTEGER NOT NULL,
    amount_minor INTEGER NOT NULL,
    currency TEXT NOT NULL,
    account_name TEXT NOT NULL,
    bank_code TEXT NOT NULL,
    account_masked TEXT NOT NULL,
    account_encrypted TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'refunded')),
    reference TEXT NOT NULL UNIQUE,
    recipient_code TEXT,
    transfer_code TEXT,
    failure_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_payouts_user_created ON payout_requests(user_id, created_at);

-- Pre-idempotency withdrawal records. Read for daily limits only.
CREATE TABLE IF NOT EXISTS withdrawals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    amount INTEGER NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_withdrawals_user_created ON withdrawals(user_id, created_at);

-- ============================================================
-- Notification outbox
-- ============================================================

CREATE TABLE IF NOT EXISTS notification_outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'delivered', 'failed')),
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    delivered_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON notification_outbox(id) WHERE status = 'pending';
"#;
