use rusqlite::Connection;

/// Initialize the database schema.
///
/// Collaborator tables (channels, accounts, payment_methods, products,
/// orders, order_items, shipments, payouts) are written by the order and
/// catalog subsystems; the engine reads them as its signal store. The
/// engine owns everything from fraud_scores down.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        -- Selling channels (storefronts). Provider secrets live here.
        CREATE TABLE IF NOT EXISTS channels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            provider TEXT NOT NULL CHECK (provider IN ('stripe', 'square')),
            webhook_secret TEXT NOT NULL,
            provider_api_key TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Buyer accounts (identity lives elsewhere; we keep signal fields)
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL,
            email_verified INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS payment_methods (
            id TEXT PRIMARY KEY,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payment_methods_account ON payment_methods(account_id);

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_products_channel ON products(channel_id);

        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            order_number TEXT NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('pending', 'confirmed', 'shipped', 'delivered', 'failed', 'refunded')),
            payment_method_id TEXT REFERENCES payment_methods(id) ON DELETE SET NULL,
            total_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(channel_id, order_number)
        );
        CREATE INDEX IF NOT EXISTS idx_orders_account_time ON orders(account_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_orders_channel ON orders(channel_id);

        CREATE TABLE IF NOT EXISTS order_items (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id) ON DELETE CASCADE,
            quantity INTEGER NOT NULL,
            unit_price_cents INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id);

        CREATE TABLE IF NOT EXISTS shipments (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            carrier TEXT NOT NULL,
            tracking_number TEXT NOT NULL,
            tracking_url TEXT,
            delivered_at INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_shipments_order_time ON shipments(order_id, created_at DESC);

        -- Provider settlement payouts (reconciliation match target)
        CREATE TABLE IF NOT EXISTS payouts (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_payout_id TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            status TEXT NOT NULL,
            arrived_at INTEGER,
            created_at INTEGER NOT NULL,
            UNIQUE(channel_id, provider, provider_payout_id)
        );

        -- Fraud evaluations. Append-only: one row per evaluation, never
        -- updated; prior rows feed the historical-fraud signal.
        CREATE TABLE IF NOT EXISTS fraud_scores (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
            account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
            risk_score INTEGER NOT NULL,
            risk_level TEXT NOT NULL CHECK (risk_level IN ('low', 'medium', 'high', 'critical')),
            flags TEXT NOT NULL DEFAULT '[]',
            reasons TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fraud_scores_account_time ON fraud_scores(account_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_fraud_scores_order ON fraud_scores(order_id);
        CREATE INDEX IF NOT EXISTS idx_fraud_scores_channel ON fraud_scores(channel_id);

        -- Disputes. (provider, provider_case_id) unique: one case, one row.
        CREATE TABLE IF NOT EXISTS disputes (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_case_id TEXT NOT NULL,
            order_id TEXT REFERENCES orders(id) ON DELETE SET NULL,
            status TEXT NOT NULL CHECK (status IN ('open', 'evidence_required', 'evidence_building', 'evidence_ready', 'submitted', 'won', 'lost', 'closed', 'duplicate', 'canceled')),
            reason TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            evidence_pack_id TEXT,
            evidence_deadline INTEGER,
            needs_manual INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            last_provider_update_at INTEGER,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(provider, provider_case_id)
        );
        CREATE INDEX IF NOT EXISTS idx_disputes_channel_status ON disputes(channel_id, status);
        CREATE INDEX IF NOT EXISTS idx_disputes_needs_manual ON disputes(channel_id) WHERE needs_manual = 1;

        -- Append-only audit journal. Never updated or deleted.
        CREATE TABLE IF NOT EXISTS dispute_timeline (
            id TEXT PRIMARY KEY,
            dispute_id TEXT NOT NULL REFERENCES disputes(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('sync', 'evidence_building', 'evidence_submitted', 'needs_manual', 'status_update', 'webhook')),
            message TEXT NOT NULL,
            meta TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dispute_timeline_dispute ON dispute_timeline(dispute_id, created_at);

        -- Evidence packs, 1:1 with disputes
        CREATE TABLE IF NOT EXISTS evidence_packs (
            id TEXT PRIMARY KEY,
            dispute_id TEXT NOT NULL UNIQUE REFERENCES disputes(id) ON DELETE CASCADE,
            status TEXT NOT NULL CHECK (status IN ('building', 'ready', 'submitted')),
            tracking_number TEXT,
            tracking_url TEXT,
            delivery_proof TEXT,
            product_description TEXT,
            customer_communication TEXT NOT NULL DEFAULT '[]',
            refund_policy TEXT NOT NULL,
            terms_of_service TEXT NOT NULL,
            attachments TEXT NOT NULL DEFAULT '[]',
            submitted_at INTEGER,
            submitted_by TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Provider-reported money movements.
        -- (channel_id, provider, provider_txn_id) unique: re-ingestion of
        -- the same external id is a no-op.
        CREATE TABLE IF NOT EXISTS provider_transactions (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_txn_id TEXT NOT NULL,
            txn_type TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            fee_cents INTEGER NOT NULL DEFAULT 0,
            net_cents INTEGER NOT NULL,
            status TEXT NOT NULL,
            provider_data TEXT,
            match_status TEXT NOT NULL CHECK (match_status IN ('unmatched', 'auto_matched', 'manual_matched', 'discrepancy')),
            matched_order_id TEXT REFERENCES orders(id) ON DELETE SET NULL,
            matched_payout_id TEXT REFERENCES payouts(id) ON DELETE SET NULL,
            matched_at INTEGER,
            matched_by TEXT,
            provider_created_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(channel_id, provider, provider_txn_id)
        );
        CREATE INDEX IF NOT EXISTS idx_provider_txns_unmatched ON provider_transactions(channel_id, provider, provider_created_at) WHERE match_status = 'unmatched';
        CREATE INDEX IF NOT EXISTS idx_provider_txns_channel ON provider_transactions(channel_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS recon_discrepancies (
            id TEXT PRIMARY KEY,
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            discrepancy_type TEXT NOT NULL,
            severity TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high', 'critical')),
            description TEXT NOT NULL,
            provider_txn_id TEXT,
            order_id TEXT,
            expected_cents INTEGER NOT NULL,
            actual_cents INTEGER NOT NULL,
            difference_cents INTEGER NOT NULL,
            status TEXT NOT NULL CHECK (status IN ('open', 'investigating', 'resolved', 'accepted')),
            resolved_at INTEGER,
            resolved_by TEXT,
            resolution TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_discrepancies_channel_status ON recon_discrepancies(channel_id, status);

        -- Idempotency ledger: write-once lock plus cached result per
        -- external event. The unique key is the serialization point for
        -- concurrent deliveries of the same event.
        CREATE TABLE IF NOT EXISTS idempotency_records (
            channel_id TEXT NOT NULL REFERENCES channels(id) ON DELETE CASCADE,
            scope TEXT NOT NULL,
            idem_key TEXT NOT NULL,
            request_hash TEXT NOT NULL,
            result TEXT,
            status TEXT NOT NULL CHECK (status IN ('in_progress', 'completed', 'failed')),
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (channel_id, scope, idem_key)
        );
        "#,
    )?;
    Ok(())
}
