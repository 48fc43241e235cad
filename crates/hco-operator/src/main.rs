//! HyperConverged operator entry point

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tracing::{info, warn};

use hco_common::crd::{HyperConverged, Ssp};
use hco_common::telemetry::{init_telemetry, TelemetryConfig};
use hco_operands::TemplateRegistry;
use hco_operator::config::{
    resolve_operator_namespace, OperatorConfig, SERVICE_ACCOUNT_NAMESPACE_PATH,
};
use hco_operator::controller::{error_policy, parent_of_operand, reconcile, Context};
use hco_operator::owner::{find_operator_csv, KubeOwnerChain};

const WATCH_TIMEOUT_SECS: u32 = 25;

/// HyperConverged operator: reconciles the SSP operand of each HyperConverged
#[derive(Parser, Debug)]
#[command(name = "hco-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", serde_yaml::to_string(&HyperConverged::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&Ssp::crd())?);
        return Ok(());
    }

    let cfg = cli.config;
    init_telemetry(TelemetryConfig {
        json: cfg.json_logs,
        ..Default::default()
    })?;
    info!(version = %cfg.version, run_mode = ?cfg.run_mode(), "starting hco-operator");

    let client = Client::try_default().await?;
    let watch_namespace = cfg.watch_namespace()?.to_string();

    match resolve_operator_namespace(&cfg, Path::new(SERVICE_ACCOUNT_NAMESPACE_PATH))
        .or_else(|_| cfg.operator_namespace_from_env().map(str::to_string))
    {
        Ok(namespace) => {
            let chain = KubeOwnerChain::new(client.clone());
            if let Err(e) = find_operator_csv(&chain, &cfg, &namespace).await {
                warn!(error = %e, "could not resolve operator CSV");
            }
        }
        Err(e) => warn!(error = %e, "operator namespace unknown, skipping CSV lookup"),
    }

    let registry = Arc::new(TemplateRegistry::new());
    match registry.load_from_dir(&cfg.templates_dir) {
        Ok(count) => info!(
            count,
            dir = %cfg.templates_dir.display(),
            "loaded default data import cron templates"
        ),
        Err(e) => warn!(error = %e, "failed to load default data import cron templates"),
    }

    let ctx = Arc::new(Context::from_client(client.clone(), registry, &cfg));
    let parents: Api<HyperConverged> = Api::namespaced(client.clone(), &watch_namespace);
    let operands: Api<Ssp> = Api::namespaced(client, &watch_namespace);

    info!(namespace = %watch_namespace, "starting HyperConverged controller");
    Controller::new(parents, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .watches(
            operands,
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
            |ssp| parent_of_operand(&ssp),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| {
            match result {
                Ok(action) => tracing::debug!(?action, "reconciliation completed"),
                Err(e) => tracing::error!(error = ?e, "reconciliation error"),
            }
            std::future::ready(())
        })
        .await;

    info!("hco-operator stopped");
    Ok(())
}
