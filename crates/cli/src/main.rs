//! System bus entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Read configuration** from the environment ([`config::Config`]).
//! 2. **Wire observability**: a JSON (or pretty) `tracing` subscriber plus an
//!    optional OTLP span exporter ([`observability`]).
//! 3. **Construct infrastructure**: provider registry, message store over the
//!    in-process log, event-intake client, and, when `AGENT_STAGE_COMMAND` is
//!    set, an in-process agent-loop dispatcher.
//! 4. **Run**: the HTTP ingress ([`server`]) and the background workers
//!    ([`workers`]) until ctrl-c.
//!
//! `system-bus resolve <service>` skips all of that, probes the service's
//! health endpoints, and prints the resolution as JSON.

mod config;
mod observability;
mod server;
mod workers;

use std::sync::Arc;

use agent_loop::{CommandStageRunner, LocalDispatcher};
use anyhow::{bail, Context};
use bus::{Clock, EventSink, SystemClock};
use resolver::{
    build_service_health_candidates, discover_colima_vm_ip, resolve_endpoint, CandidateOptions,
    DiscoveryOptions, EndpointResolution, ProcessCommandRunner, ReqwestProbeClient,
    ResolveOptions, VmIpCache,
};
use store::{InMemoryLog, MessageStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use webhooks::{
    EventIntakeClient, GitHubProvider, PeerProvider, Provider, ProviderRegistry, VercelProvider,
};

use crate::config::{Config, DEFAULT_INTAKE_URL};
use crate::server::AppState;
use crate::workers::Outlet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("reading configuration")?;
    let _telemetry = observability::init(config.log_format, config.otlp_endpoint.as_deref())?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => serve(config).await,
        [command, service] if command == "resolve" => {
            let resolution = resolve_service(service).await;
            println!("{}", serde_json::to_string_pretty(&resolution)?);
            Ok(())
        }
        _ => bail!("usage: system-bus [resolve <service>]"),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let registry = ProviderRegistry::new()
        .with(Provider::GitHub(GitHubProvider::new(config.github_secret.clone())))
        .with(Provider::Vercel(VercelProvider::new(config.vercel_secret.clone())))
        .with(Provider::Peer(PeerProvider::new(config.peer_secret.clone())));
    for id in registry.ids() {
        info!(provider = id, "Webhook provider registered");
    }

    let intake_url = match &config.intake_url {
        Some(url) => url.clone(),
        None => discover_intake_url().await,
    };
    info!(intake_url = %intake_url, "Event intake configured");
    let intake: Arc<dyn EventSink> =
        Arc::new(EventIntakeClient::new(intake_url, config.intake_key.clone())?);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store =
        MessageStore::new(Arc::new(InMemoryLog::new()), clock.clone(), config.store.clone());

    let local = match config.stage_command.as_deref() {
        Some(line) => {
            let runner = CommandStageRunner::from_command_line(line)
                .context("AGENT_STAGE_COMMAND is not a command line")?;
            info!(command = line, "Running agent loop stages in-process");
            Some(Arc::new(LocalDispatcher::new(Arc::new(runner))))
        }
        None => None,
    };

    let shutdown = CancellationToken::new();
    let mut handles = vec![
        tokio::spawn(workers::run_drain(
            store.clone(),
            Outlet {
                intake: intake.clone(),
                local: local.clone(),
            },
            config.drain_interval,
            config.drain_limit,
            shutdown.clone(),
        )),
        tokio::spawn(workers::run_trim(
            store.clone(),
            config.trim_max_age_ms,
            shutdown.clone(),
        )),
    ];
    if let Some(local) = local {
        handles.push(tokio::spawn(workers::run_local_loops(local, shutdown.clone())));
    }
    if let Some(interval) = config.heartbeat_interval {
        handles.push(tokio::spawn(workers::run_heartbeat(
            store.clone(),
            clock,
            interval,
            shutdown.clone(),
        )));
    }

    let router = server::build_router(AppState {
        registry: Arc::new(registry),
        store,
        relay: intake,
    });
    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "System bus listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for ctrl-c");
            }
            info!("Shutting down");
        })
        .await
        .context("serving HTTP")?;

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Worker ended abnormally");
        }
    }
    Ok(())
}

async fn resolve_service(service: &str) -> EndpointResolution {
    let vm_ip = discover_colima_vm_ip(
        &DiscoveryOptions::from_lookup(|key| std::env::var(key).ok()),
        &ProcessCommandRunner::default(),
        &VmIpCache::new(),
    )
    .await;
    let candidates = build_service_health_candidates(
        service,
        &CandidateOptions {
            vm_ip: Some(vm_ip),
            ..CandidateOptions::default()
        },
    );
    resolve_endpoint(&candidates, &ResolveOptions::default(), &ReqwestProbeClient::new()).await
}

/// Finds a reachable intake by probing its health routes; falls back to the
/// localhost default when nothing answers.
async fn discover_intake_url() -> String {
    match resolve_service("inngest").await {
        EndpointResolution::Resolved {
            endpoint_class,
            probe_url,
            ..
        } => {
            info!(endpoint_class = %endpoint_class, "Event intake discovered");
            origin(&probe_url).to_string()
        }
        EndpointResolution::Unresolved { reason, .. } => {
            warn!(reason = %reason, fallback = DEFAULT_INTAKE_URL, "Event intake not reachable");
            DEFAULT_INTAKE_URL.to_string()
        }
    }
}

/// `http://host:port/health` -> `http://host:port`.
fn origin(url: &str) -> &str {
    let start = url.find("://").map_or(0, |i| i + 3);
    match url[start..].find('/') {
        Some(i) => &url[..start + i],
        None => url,
    }
}
