use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use transit_graph_engine::loader::load_topology_file;
use transit_graph_engine::{
    EventSink, GroupKey, ReportOutcome, ServiceConfig, SinkClosed, TelemetryReport, TransitEngine,
};

/// Writes operator events to the log.
struct LogSink;

impl EventSink for LogSink {
    fn deliver(&mut self, payload: Arc<str>) -> Result<(), SinkClosed> {
        log::info!("event: {}", payload);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServiceConfig::from_env()?;
    let engine = Arc::new(TransitEngine::new(config.engine.clone()));

    // 1. Initial topology. A missing or broken file leaves the graph empty
    //    until the reload loop picks up a good one.
    if let Err(e) = reload_topology(&engine, &config.topology_path) {
        log::warn!("initial topology load failed: {:#}. Reload loop will retry.", e);
    }

    // 2. Topology reload loop
    let reload_engine = engine.clone();
    let reload_path = config.topology_path.clone();
    let reload_every = Duration::from_secs(config.topology_reload_secs.max(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(reload_every).await;
            if let Err(e) = reload_topology(&reload_engine, &reload_path) {
                log::warn!("topology reload failed: {:#}", e);
            }
        }
    });

    // 3. Staleness sweeper
    let sweep_engine = engine.clone();
    let sweep_every = Duration::from_secs(config.engine.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            sweep_engine.sweep(Utc::now());
        }
    });

    // 4. Operator event log
    let _operators = engine.subscribe(GroupKey::Operators).forward_to(LogSink);

    // 5. Telemetry ingress
    let listener = TcpListener::bind(("0.0.0.0", config.telemetry_port))
        .await
        .with_context(|| format!("binding telemetry port {}", config.telemetry_port))?;
    log::info!("accepting telemetry on port {}", config.telemetry_port);

    loop {
        let (socket, peer) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            match read_reports(socket, &engine).await {
                Ok(n) => log::info!("telemetry connection {} closed after {} report(s)", peer, n),
                Err(e) => log::warn!("telemetry connection {} failed: {}", peer, e),
            }
        });
    }
}

fn reload_topology(engine: &TransitEngine, path: &str) -> Result<()> {
    let input = load_topology_file(path)?;
    let graph = engine.load_topology(input)?;
    log::info!(
        "topology generation {} active: {} stops, {} routes",
        graph.generation(),
        graph.stop_count(),
        graph.route_count()
    );
    Ok(())
}

/// One JSON `TelemetryReport` per line. Bad lines are logged and skipped.
async fn read_reports(socket: TcpStream, engine: &TransitEngine) -> Result<u64> {
    let mut lines = BufReader::new(socket).lines();
    let mut accepted = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let report: TelemetryReport = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping malformed telemetry line: {} ({})", line, e);
                continue;
            }
        };
        if engine.report_position(&report) == ReportOutcome::Accepted {
            accepted += 1;
        }
    }
    Ok(accepted)
}
