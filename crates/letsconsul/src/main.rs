mod cli;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use letsconsul_domains::{DomainRegistry, RenewalScheduler};
use letsconsul_issuer::{AcmeIssuer, IssuanceProvider};
use letsconsul_presence::LivenessSupervisor;
use letsconsul_store::{ConsulClient, KvStore, ServiceAgent};

use cli::Cli;
use settings::Settings;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => cli.log_level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let env_filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // Hold the non-blocking guards for the lifetime of main so logs flush on exit.
    let _log_guards = init_logging(env_filter, cli.log_file.as_deref())?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!("letsconsul v{} starting", env!("CARGO_PKG_VERSION"));

    let consul = Arc::new(
        ConsulClient::new(&cli.consul, cli.consul_token.clone())
            .context("building Consul client")?,
    );

    let settings = Settings::resolve(consul.as_ref(), &cli.prefix)
        .await
        .context("resolving runtime settings")?;
    startup_diagnostics(&cli, &settings);

    let port = bind_port(&cli.bind)?;
    let issuer: Arc<dyn IssuanceProvider> = Arc::new(AcmeIssuer::new(&cli.acme_directory));

    // Register before the scheduler starts so the instance is discoverable
    // for the whole time it may be mutating shared state.
    let mut supervisor = LivenessSupervisor::new(
        Arc::clone(&consul) as Arc<dyn ServiceAgent>,
        settings.service.clone(),
        port,
    );
    supervisor
        .register()
        .await
        .context("registering service instance")?;

    let cancel = CancellationToken::new();
    let registry = DomainRegistry::new(Arc::clone(&consul) as Arc<dyn KvStore>, cli.prefix.clone());
    let scheduler = RenewalScheduler::new(
        registry,
        issuer,
        settings.renew_interval,
        settings.reload_interval,
        cli.bind.clone(),
    );
    let scheduler_task = tokio::spawn(scheduler.run(cancel.clone()));

    shutdown_signal().await;
    tracing::info!("Termination signal caught, shutting down...");

    // Stop the scheduler before withdrawing the registration: no renewal
    // may run against the store after the instance stops advertising.
    cancel.cancel();
    let _ = scheduler_task.await;

    supervisor
        .deregister()
        .await
        .context("deregistering service instance")?;

    tracing::info!("Exiting");
    Ok(())
}

/// Port component of the challenge bind address, reused for the service
/// registration.
fn bind_port(bind: &str) -> anyhow::Result<u16> {
    let (_, port) = bind
        .rsplit_once(':')
        .with_context(|| format!("bind address '{bind}' must be host:port"))?;
    port.parse()
        .with_context(|| format!("bind address '{bind}' has an invalid port"))
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
    }
}

fn startup_diagnostics(cli: &Cli, settings: &Settings) {
    tracing::info!("Consul agent: {}", cli.consul);
    tracing::info!("KV prefix: {}", cli.prefix);
    tracing::info!("Challenge responder bind: {}", cli.bind);
    tracing::info!("ACME directory: {}", cli.acme_directory);
    tracing::info!(
        service = %settings.service,
        renew_interval_secs = settings.renew_interval.as_secs(),
        reload_interval_secs = settings.reload_interval.as_secs(),
        "Runtime settings resolved"
    );
}

/// Initialize tracing with stderr + optional file output.
/// Returns guards that must be held for the lifetime of the program
/// to ensure the non-blocking writers flush on shutdown.
fn init_logging(
    env_filter: tracing_subscriber::EnvFilter,
    log_file: Option<&std::path::Path>,
) -> anyhow::Result<Vec<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::prelude::*;

    // Non-blocking stderr avoids deadlocks when stderr is a redirected
    // pipe that nobody reads.
    let (nb_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(nb_stderr);

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let (nb_file, file_guard) = tracing_appender::non_blocking(file);
        let file_layer = tracing_subscriber::fmt::layer().with_writer(nb_file);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        Ok(vec![stderr_guard, file_guard])
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();

        Ok(vec![stderr_guard])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_port_extracts_port() {
        assert_eq!(bind_port("0.0.0.0:8080").unwrap(), 8080);
        assert_eq!(bind_port("[::1]:443").unwrap(), 443);
    }

    #[test]
    fn bind_port_rejects_missing_or_bad_port() {
        assert!(bind_port("localhost").is_err());
        assert!(bind_port("localhost:http").is_err());
    }
}
