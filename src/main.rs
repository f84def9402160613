//! WebApp Operator - converges WebApp resources into Deployments, Services and Ingresses

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webapp_operator::config::ControllerConfig;
use webapp_operator::controller::{error_policy, reconcile, Context};
use webapp_operator::crd::WebApp;

/// WebApp Operator - CRD-driven application deployment
#[derive(Parser, Debug)]
#[command(name = "webapp-operator", version, about, long_about = None)]
struct Cli {
    /// Print the WebApp CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: ControllerConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&WebApp::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run_controller(cli.config).await
}

/// Build namespaced or cluster-wide APIs depending on the watch scope
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the WebApp controller until a shutdown signal arrives
async fn run_controller(config: ControllerConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let namespace = config.watch_namespace.clone();
    let webapps: Api<WebApp> = scoped_api(&client, namespace.as_deref());
    let deployments: Api<Deployment> = scoped_api(&client, namespace.as_deref());
    let services: Api<Service> = scoped_api(&client, namespace.as_deref());
    let ingresses: Api<Ingress> = scoped_api(&client, namespace.as_deref());

    // In-flight passes observe this token; the controller itself drains on the same signal
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received, cancelling in-flight reconciliations");
            signal_token.cancel();
        }
    });

    let ctx = Arc::new(Context::new(client, config, shutdown));

    tracing::info!(namespace = ?namespace, "Starting WebApp controller...");

    Controller::new(webapps, WatcherConfig::default())
        .owns(deployments, WatcherConfig::default())
        .owns(services, WatcherConfig::default())
        .owns(ingresses, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(webapp = %obj.name, ?action, "WebApp reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "WebApp reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("WebApp controller shutting down");
    Ok(())
}
