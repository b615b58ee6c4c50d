use std::sync::Arc;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use utils::logging;
use utils::version;
use validator::config::Cli;
use validator::config::ValidatorConfig;
use validator::probe::ProbeExecutor;
use validator::probe::SystemCommandRunner;
use validator::validators::dispatch;
use validator::validators::ValidationContext;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

/// Terminate on the first termination signal. Validation is not resumable,
/// so nothing is cleaned up.
fn spawn_signal_handler(cancellation_token: CancellationToken) -> Result<()> {
    let mut signals = Vec::new();
    for (kind, name) in [
        (SignalKind::terminate(), "SIGTERM"),
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::hangup(), "SIGHUP"),
        (SignalKind::quit(), "SIGQUIT"),
    ] {
        let stream = signal(kind).with_context(|| format!("failed to listen for {name}"))?;
        signals.push((stream, name));
    }

    tokio::spawn(async move {
        let (received, _, _) = futures::future::select_all(signals.iter_mut().map(
            |(stream, name)| {
                Box::pin(async move {
                    stream.recv().await;
                    *name
                })
            },
        ))
        .await;

        tracing::error!(
            "Exiting due to signal [{received}] notification for pid [{}]",
            std::process::id()
        );
        cancellation_token.cancel();
        std::process::exit(1);
    });
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = logging::init();

    tracing::info!("version: {}", &**version::VERSION);

    let cancellation_token = CancellationToken::new();
    spawn_signal_handler(cancellation_token.clone())?;

    let config = ValidatorConfig::try_from(cli).map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let executor = ProbeExecutor::new(
        Arc::new(SystemCommandRunner),
        config.sleep_interval,
        cancellation_token,
    );
    let ctx = ValidationContext::new(config, executor);

    ctx.ledger
        .prepare(ctx.config.cleanup_all)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    dispatch(&ctx).await.map_err(|e| anyhow::anyhow!("{e:?}"))
}
