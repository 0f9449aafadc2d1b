use anyhow::{Context, Result};
use kube::Client;
use std::sync::Arc;
use tracing::{error, info};

use pod_crash_notifier::{
    build_dispatcher, load_config, pod_events, AlertContext, Controller, ControllerSettings,
    CrashPolicy, KubePodSource, MuteCache, Reconciler, WorkQueue,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cfg = load_config()?;
    if cfg.namespaces.is_empty() {
        info!("watching pods in all namespaces");
    } else {
        info!("namespaces = {:?}", cfg.namespaces);
    }

    // Falls back to the in-cluster service account when no kubeconfig is found.
    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let dispatcher = build_dispatcher(&cfg)?;
    let mute = Arc::new(MuteCache::from_seconds(cfg.mute_seconds)?);
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(KubePodSource::new(client.clone())),
        dispatcher,
        mute,
        CrashPolicy::from_config(&cfg)?,
        AlertContext::from_config(&cfg),
    ));

    let queue = Arc::new(WorkQueue::new());
    let controller = Arc::new(Controller::new(
        queue,
        reconciler,
        ControllerSettings::from_config(&cfg)?,
    ));

    let events = pod_events(client, &cfg.namespaces);
    let runner = tokio::spawn(Arc::clone(&controller).run(events));

    shutdown_signal().await?;
    controller.shutdown();

    match runner.await {
        Ok(result) => result,
        Err(e) => {
            error!("controller task failed: {}", e);
            Err(e.into())
        }
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res.context("Failed to listen for Ctrl-C")?,
            _ = term.recv() => info!("received SIGTERM"),
        }
        Ok(())
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}
