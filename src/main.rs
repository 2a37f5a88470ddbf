use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobboard_session::{AuthStore, SessionConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "session-agent starting");

    let config = SessionConfig::load()?;
    info!(
        api = %config.api.base_url,
        data_dir = %config.storage.data_dir.display(),
        "Loaded configuration"
    );

    let store = AuthStore::connect(&config)?;
    let session = store.restore().await;

    if !session.is_authenticated() {
        match credentials_from_env() {
            Some((email, password, remember_me)) => {
                let user = store.login(&email, &password, remember_me).await?;
                info!(user_id = user.id, email = %user.email, "Logged in from environment credentials");
            }
            None => warn!(
                "No session to restore and JOBBOARD_EMAIL/JOBBOARD_PASSWORD not set; staying anonymous"
            ),
        }
    }

    let mut updates = store.subscribe();
    let watcher = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let session = updates.borrow_and_update().clone();
            match session.user {
                Some(user) => info!(user_id = user.id, "Session active"),
                None => warn!("Session ended"),
            }
        }
    });

    shutdown_signal().await;

    // Keep the tokens so the next start can resume the session
    info!("Stopping background refresh");
    drop(store);
    watcher.abort();

    info!("Shutdown complete");
    Ok(())
}

fn credentials_from_env() -> Option<(String, String, bool)> {
    let email = std::env::var("JOBBOARD_EMAIL").ok()?;
    let password = std::env::var("JOBBOARD_PASSWORD").ok()?;
    let remember_me = std::env::var("JOBBOARD_REMEMBER_ME")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    Some((email, password, remember_me))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
