use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use kok_operator::config::LEASE_NAME;
use kok_operator::controller::Registry;
use kok_operator::health::{HealthState, run_health_server};
use kok_operator::{
    Context, OperatorConfig, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, default_registry,
    run_all_controllers, run_webhook_server,
};

const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_INTERVAL: Duration = Duration::from_secs(5);
/// Time given to running passes after the probes turn unready
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("no rustls crypto provider could be installed".into());
    }
    init_tracing()?;

    let config = OperatorConfig::from_env()?;
    let registry = Arc::new(default_registry());
    info!(
        versions = ?registry.versions().collect::<Vec<_>>(),
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("cluster-wide"),
        requeue_delay = ?config.requeue_delay,
        "Starting kok-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    // Probes and admission answer on every replica, leader or not
    let health_handle = {
        let state = health_state.clone();
        tokio::spawn(async move {
            if let Err(e) = run_health_server(state).await {
                error!(error = %e, "Health server stopped");
            }
        })
    };
    let webhook_handle = spawn_webhook_server(registry.clone());

    let lease = LeaseLockParams {
        holder_id: holder_identity(&config),
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: LEASE_TTL,
    };
    info!(
        holder = %lease.holder_id,
        namespace = %config.pod_namespace,
        lease = LEASE_NAME,
        "Joining leader election"
    );
    let lock = LeaseLock::new(client.clone(), &config.pod_namespace, lease);
    acquire_leadership(&lock).await;
    let renewal_handle = tokio::spawn(keep_leadership(lock));

    let controller_handle = {
        let ctx = Arc::new(Context::new(
            client.clone(),
            registry,
            config.retry_policy(),
            Some(health_state.clone()),
        ));
        let watch_namespace = config.watch_namespace.clone();
        tokio::spawn(async move {
            run_all_controllers(client, ctx, watch_namespace.as_deref()).await;
        })
    };

    let webhook_done = async {
        match webhook_handle {
            Some(handle) => report_exit("webhook server", handle.await),
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = controller_handle => report_exit("controllers", result),
        result = health_handle => report_exit("health server", result),
        result = renewal_handle => report_exit("lease renewal", result),
        _ = webhook_done => {}
        _ = shutdown_signal() => {
            info!(grace = ?SHUTDOWN_GRACE, "Shutdown requested, draining");
            health_state.set_ready(false).await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        }
    }

    info!("Operator stopped");
    Ok(())
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("kok_operator=info".parse()?)
        .add_directive("kube=info".parse()?)
        .add_directive("kube_leader_election=info".parse()?);
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// `POD_NAME`, falling back to the hostname
fn holder_identity(config: &OperatorConfig) -> String {
    config.pod_name.clone().unwrap_or_else(|| {
        warn!("POD_NAME not set, using hostname as lease holder");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    })
}

/// Start the admission server when both TLS files are mounted
fn spawn_webhook_server(registry: Arc<Registry>) -> Option<JoinHandle<()>> {
    if !(Path::new(WEBHOOK_CERT_PATH).exists() && Path::new(WEBHOOK_KEY_PATH).exists()) {
        info!(
            cert = WEBHOOK_CERT_PATH,
            key = WEBHOOK_KEY_PATH,
            "No webhook certificate mounted, admission disabled"
        );
        return None;
    }
    Some(tokio::spawn(async move {
        if let Err(e) = run_webhook_server(registry, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH).await {
            error!(error = %e, "Webhook server stopped");
        }
    }))
}

/// Block until this replica holds the lease
async fn acquire_leadership(lock: &LeaseLock) {
    loop {
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {
                info!("Acquired leadership");
                return;
            }
            Ok(_) => info!("Lease held by another replica"),
            Err(e) => warn!(error = %e, "Lease acquisition failed"),
        }
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
    }
}

/// Renew the lease forever; a lost lease ends the process so the pod
/// restarts and rejoins the election
async fn keep_leadership(lock: LeaseLock) {
    loop {
        tokio::time::sleep(LEASE_RENEW_INTERVAL).await;
        match lock.try_acquire_or_renew().await {
            Ok(result) if result.acquired_lease => {}
            Ok(_) => {
                error!("Leadership lost, exiting");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Lease renewal failed, exiting");
                std::process::exit(1);
            }
        }
    }
}

fn report_exit(task: &str, result: Result<(), tokio::task::JoinError>) {
    match result {
        Ok(()) => warn!(task, "Task exited"),
        Err(e) => error!(task, error = %e, "Task panicked"),
    }
}

/// SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
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
}
