use anyhow::{Context, Result};
use kycsheet::{
    history::RunLog,
    job::run_schedule,
    kyc::{HttpKycStore, KycStore, MemoryKycStore},
    server::{self, AppState},
    sheets::SheetsClient,
    Config, ImportJob,
};
use reqwest::Client;
use std::{env, net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(log_level.parse().unwrap_or(Level::INFO.into()))
    });
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) config + logging ─────────────────────────────────────────
    dotenvy::dotenv().ok();
    init_tracing();
    let cfg = Config::from_env().context("loading configuration")?;
    info!(?cfg, "startup");

    // ─── 2) collaborators, built once ────────────────────────────────
    let client = Client::builder()
        .user_agent(concat!("kycsheet/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")?;
    let sheets = SheetsClient::from_service_account(
        client.clone(),
        cfg.spreadsheet_id.clone(),
        &cfg.google_client_secret,
    )?;
    let store: Arc<dyn KycStore> = match &cfg.store_url {
        Some(url) => {
            info!(url = %url, "submitting to remote KYC store");
            Arc::new(HttpKycStore::new(client.clone(), url)?)
        }
        None => {
            warn!("KYC_STORE_URL not set; keeping records in memory");
            Arc::new(MemoryKycStore::new())
        }
    };

    // ─── 3) run history ──────────────────────────────────────────────
    let runs = Arc::new(RunLog::persistent(&cfg.history_dir)?);
    if let Err(e) = runs.vacuum().await {
        warn!(error = ?e, "history vacuum failed");
    }

    // ─── 4) health server ────────────────────────────────────────────
    let (stop_tx, stop_rx) = watch::channel(false);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let routes = server::routes(AppState {
        runs: Arc::clone(&runs),
        store: Arc::clone(&store),
    });
    let mut server_stop = stop_rx.clone();
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = server_stop.changed().await;
        })
        .with_context(|| format!("binding health server on {}", addr))?;
    let server = tokio::spawn(server);
    info!("health check: http://{}/health", bound);

    // ─── 5) schedule ─────────────────────────────────────────────────
    let job = Arc::new(ImportJob::new(Arc::new(sheets), store, runs, cfg.range.clone()));
    let mut schedule_stop = stop_rx;
    let schedule = tokio::spawn(run_schedule(job, cfg.period, async move {
        let _ = schedule_stop.changed().await;
    }));

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("shutdown requested");
    let _ = stop_tx.send(true);

    let stats = schedule.await?;
    server.await?;
    info!(started = stats.started, skipped = stats.skipped, "all done");
    Ok(())
}
