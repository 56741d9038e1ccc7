use anyhow::{Context, Result};
use procmon_daemon::{
    config::DaemonConfig,
    monitor::{Monitor, StartStatus, StopStatus},
    notifier::BroadcastSink,
    protocol::{ProcessData, Request, Response, StatusData},
    socket::{handle_client, RequestHandler, SocketServer},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

struct DaemonState {
    monitor: Arc<Monitor>,
}

impl DaemonState {
    async fn stop_monitor(&self) -> Response {
        let monitor = Arc::clone(&self.monitor);
        match tokio::task::spawn_blocking(move || monitor.stop()).await {
            Ok(StopStatus::Stopped) => Response::success(),
            Ok(StopStatus::AlreadyStopped) => Response::data(serde_json::json!({
                "success": true,
                "status": "already_stopped",
            })),
            Err(e) => Response::error(e),
        }
    }

    fn start_monitor(&self) -> Response {
        match self.monitor.start() {
            Ok(StartStatus::Started) => Response::success(),
            Ok(StartStatus::AlreadyRunning) => Response::data(serde_json::json!({
                "success": true,
                "status": "already_running",
            })),
            Err(e) => Response::error(e),
        }
    }

    fn edit_whitelist(&self, name: String, add: bool) -> Response {
        let mut config = (*self.monitor.config()).clone();
        let changed = if add {
            config.whitelist.insert(name)
        } else {
            config.whitelist.remove(&name)
        };
        if !changed {
            return Response::data(serde_json::json!({ "success": true, "changed": false }));
        }
        match self.monitor.update_config(config) {
            Ok(()) => Response::data(serde_json::json!({ "success": true, "changed": true })),
            Err(e) => Response::error(e),
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonState {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::ListProcesses => {
                let data: Vec<ProcessData> =
                    self.monitor.snapshot().iter().map(ProcessData::from).collect();
                Response::data(serde_json::json!(data))
            }

            Request::GetStatistics => Response::Status {
                data: StatusData::from(self.monitor.statistics()),
            },

            Request::GetConfig => match serde_json::to_value(self.monitor.config().as_ref()) {
                Ok(data) => Response::data(data),
                Err(e) => Response::error(e),
            },

            Request::SetInterval { params } => match self.monitor.set_interval(params.seconds) {
                Ok(()) => Response::success(),
                Err(e) => Response::error(e),
            },

            Request::AddWhitelist { params } => self.edit_whitelist(params.name, true),

            Request::RemoveWhitelist { params } => self.edit_whitelist(params.name, false),

            Request::PauseMonitoring => self.stop_monitor().await,

            Request::ResumeMonitoring => self.start_monitor(),
        }
    }
}

async fn status_loop(monitor: Arc<Monitor>, broadcast_tx: broadcast::Sender<String>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let status = Response::Status {
            data: StatusData::from(monitor.statistics()),
        };
        if let Ok(json) = serde_json::to_string(&status) {
            let _ = broadcast_tx.send(json);
        }
    }
}

async fn serve(server: &SocketServer, state: Arc<DaemonState>) {
    loop {
        match server.accept().await {
            Ok(stream) => {
                let state = Arc::clone(&state);
                let broadcast_rx = server.broadcast_sender().subscribe();
                tokio::spawn(async move {
                    handle_client(stream, broadcast_rx, state).await;
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    info!("procmon daemon starting...");

    let config_path = DaemonConfig::config_path();
    let config = if config_path.exists() {
        DaemonConfig::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            DaemonConfig::default()
        })
    } else {
        info!("No config file found, using defaults");
        DaemonConfig::default()
    };

    let socket_path = config
        .general
        .socket_path
        .clone()
        .unwrap_or_else(SocketServer::default_path);
    let server = SocketServer::bind(&socket_path)
        .await
        .with_context(|| format!("binding {}", socket_path.display()))?;
    let broadcast_tx = server.broadcast_sender();

    let monitor = Arc::new(Monitor::with_procfs(config.monitor.clone())?);
    monitor.set_event_sink(Arc::new(BroadcastSink::new(broadcast_tx.clone())));
    if config.general.autostart {
        monitor.start()?;
    }

    tokio::spawn(status_loop(
        Arc::clone(&monitor),
        broadcast_tx,
        Duration::from_secs(config.general.status_interval_seconds.max(1)),
    ));

    let state = Arc::new(DaemonState { monitor: Arc::clone(&monitor) });
    info!("Daemon ready, listening for connections...");

    tokio::select! {
        _ = serve(&server, state) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
        }
    }

    tokio::task::spawn_blocking(move || monitor.stop()).await?;
    Ok(())
}
