use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crosscheck::config::Config;
use crosscheck::db::{create_pool, init_db, queries, AppState};
use crosscheck::handlers;
use crosscheck::models::{CreateAccount, CreateChannel, CreateDiscrepancy, DiscrepancySeverity,
    IngestTransaction, OrderStatus};
use crosscheck::providers::ProviderKind;

#[derive(Parser, Debug)]
#[command(name = "crosscheck")]
#[command(about = "Fraud, dispute and reconciliation engine for multi-channel commerce")]
struct Cli {
    /// Seed the database with dev data (channel, accounts, orders, shipments)
    #[arg(long)]
    seed: bool,

    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

/// Seeds the database with dev data so every engine operation is
/// exercisable locally. Only runs in dev mode and when the database is
/// empty.
fn seed_dev_data(state: &AppState) {
    let conn = state.db.get().expect("Failed to get db connection for seeding");

    let (_, existing) =
        queries::list_channels_paginated(&conn, 1, 0).expect("Failed to count channels");
    if existing > 0 {
        tracing::info!("Database already has data, skipping seed");
        return;
    }

    tracing::info!("============================================");
    tracing::info!("SEEDING DEV DATA");
    tracing::info!("============================================");

    let now = chrono::Utc::now().timestamp();

    // 1. Channel with a known webhook secret for curl-able webhooks
    let channel = queries::create_channel(
        &conn,
        &CreateChannel {
            name: "Dev Channel".to_string(),
            provider: ProviderKind::Stripe,
            webhook_secret: "whsec_dev_secret".to_string(),
            provider_api_key: "sk_test_dev".to_string(),
        },
    )
    .expect("Failed to create dev channel");
    tracing::info!("Channel: {} (id: {})", channel.name, channel.id);
    tracing::info!("Webhook secret: whsec_dev_secret");

    // 2. Accounts: one established and verified, one fresh and unverified
    let veteran = queries::create_account(
        &conn,
        &CreateAccount {
            email: "veteran@dev.local".to_string(),
            email_verified: true,
            created_at: Some(now - 90 * 86400),
        },
    )
    .expect("Failed to create dev account");
    let newcomer = queries::create_account(
        &conn,
        &CreateAccount {
            email: "newcomer@dev.local".to_string(),
            email_verified: false,
            created_at: Some(now - 3600 * 12),
        },
    )
    .expect("Failed to create dev account");

    let veteran_card =
        queries::create_payment_method(&conn, &veteran.id, "card", Some(now - 60 * 86400))
            .expect("Failed to create payment method");
    let newcomer_card =
        queries::create_payment_method(&conn, &newcomer.id, "card", Some(now - 600))
            .expect("Failed to create payment method");

    // 3. Products
    let hoodie = queries::create_product(&conn, &channel.id, "Channel Hoodie", 4_500)
        .expect("Failed to create product");
    let camera = queries::create_product(&conn, &channel.id, "Studio Camera", 89_900)
        .expect("Failed to create product");

    // 4. Orders: a delivered one (evidence-ready) and a burst from the
    // fresh account (velocity + new-account signals)
    let delivered = queries::create_order(
        &conn,
        &queries::CreateOrder {
            channel_id: &channel.id,
            account_id: &veteran.id,
            order_number: "ORD-1001",
            status: OrderStatus::Delivered,
            payment_method_id: Some(&veteran_card.id),
            currency: "usd",
            items: vec![(hoodie.id.clone(), 2, hoodie.price_cents)],
            created_at: Some(now - 14 * 86400),
        },
    )
    .expect("Failed to create dev order");
    queries::create_shipment(
        &conn,
        &delivered.id,
        "UPS",
        "1Z999AA10123456784",
        Some("https://track.dev.local/1Z999AA10123456784"),
        Some(now - 10 * 86400),
    )
    .expect("Failed to create dev shipment");
    tracing::info!("Delivered order: {} ({})", delivered.order_number, delivered.id);

    for n in 0..6 {
        queries::create_order(
            &conn,
            &queries::CreateOrder {
                channel_id: &channel.id,
                account_id: &newcomer.id,
                order_number: &format!("ORD-2{:03}", n),
                status: OrderStatus::Pending,
                payment_method_id: Some(&newcomer_card.id),
                currency: "usd",
                items: vec![(camera.id.clone(), 1, camera.price_cents)],
                created_at: Some(now - n * 600),
            },
        )
        .expect("Failed to create dev order");
    }
    tracing::info!("Burst orders: ORD-2000..ORD-2005 (fraud-check candidates)");

    // 5. A payout and an unmatched provider transaction referencing the
    // delivered order, so auto-match has work to do
    queries::create_payout(
        &conn,
        &channel.id,
        ProviderKind::Stripe,
        "po_dev_1",
        8_420,
        "paid",
        Some(now - 7 * 86400),
    )
    .expect("Failed to create dev payout");
    queries::try_insert_provider_transaction(
        &conn,
        &channel.id,
        ProviderKind::Stripe,
        &IngestTransaction {
            provider_txn_id: "txn_dev_1".to_string(),
            txn_type: "charge".to_string(),
            amount_cents: 9_000,
            fee_cents: 290,
            net_cents: 8_710,
            status: "available".to_string(),
            provider_data: Some(serde_json::json!({ "reference_id": "ORD-1001" })),
            provider_created_at: now - 12 * 86400,
        },
    )
    .expect("Failed to create dev transaction");

    // 6. An open discrepancy for the ops console
    queries::create_discrepancy(
        &conn,
        &channel.id,
        &CreateDiscrepancy {
            discrepancy_type: "amount_mismatch".to_string(),
            severity: DiscrepancySeverity::Medium,
            description: "Provider reported 9000 cents, order total is 9500".to_string(),
            provider_txn_id: None,
            order_id: Some(delivered.id.clone()),
            expected_cents: 9_500,
            actual_cents: 9_000,
        },
    )
    .expect("Failed to create dev discrepancy");

    tracing::info!("============================================");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crosscheck=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let state = AppState {
        db: db_pool,
        base_url: config.base_url.clone(),
    };

    // Purge aged COMPLETED idempotency rows on startup (0 = never purge)
    if config.idempotency_retention_days > 0 {
        let conn = state.db.get().expect("Failed to get connection for purge");
        match queries::purge_old_idempotency_records(&conn, config.idempotency_retention_days) {
            Ok(count) if count > 0 => {
                tracing::info!(
                    "Purged {} idempotency records older than {} days",
                    count,
                    config.idempotency_retention_days
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Failed to purge old idempotency records: {}", e);
            }
        }
    }

    // Seed dev data if --seed flag is passed (only in dev mode)
    if cli.seed {
        if !config.dev_mode {
            tracing::warn!("--seed flag ignored: not in dev mode (set CROSSCHECK_ENV=dev)");
        } else {
            seed_dev_data(&state);
        }
    }

    // Build the application router
    let app = Router::new()
        .merge(handlers::channels::router())
        .merge(handlers::webhooks::router())
        .merge(handlers::disputes::router())
        .merge(handlers::recon::router())
        .merge(handlers::fraud::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    let db_path = config.database_path.clone();
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("Crosscheck server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&db_path) {
            tracing::warn!("Failed to remove {}: {}", db_path, e);
        } else {
            tracing::info!("Removed {}", db_path);
        }
        let _ = std::fs::remove_file(format!("{}-wal", db_path));
        let _ = std::fs::remove_file(format!("{}-shm", db_path));
        tracing::info!("Ephemeral cleanup complete");
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("Shutdown signal received, stopping server...");
}
