//! Speech hosts running as child processes

use std::net::{Ipv4Addr, SocketAddr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::tcp::TcpEndpoint;
use super::{EndpointLauncher, SpeechEndpoint, TransportError};
use crate::duration_millis;
use crate::pool::config::{parse, ConfigError};

/// How to start a speech host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostCommandConfig {
    /// Executable to run
    pub program: String,

    /// Arguments placed before the port flag
    #[serde(default)]
    pub args: Vec<String>,

    /// Flag that precedes the port number
    pub port_flag: String,

    /// How long the host may take to accept its first connection
    #[serde(with = "duration_millis")]
    pub startup_timeout: Duration,

    /// Delay between connection attempts during startup
    #[serde(with = "duration_millis")]
    pub connect_interval: Duration,
}

impl HostCommandConfig {
    /// Create a configuration for `program` with default timings
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            port_flag: "--port".to_string(),
            startup_timeout: Duration::from_secs(10),
            connect_interval: Duration::from_millis(100),
        }
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `SPEECH_HOST_COMMAND`: Executable to run
    /// - `SPEECH_HOST_ARGS`: Whitespace-separated arguments
    /// - `SPEECH_HOST_PORT_FLAG`: Flag preceding the port (default: `--port`)
    /// - `SPEECH_HOST_STARTUP_TIMEOUT_MS`: Startup deadline (default: 10000)
    /// - `SPEECH_HOST_CONNECT_INTERVAL_MS`: Connect polling interval (default: 100)
    ///
    /// Returns `Ok(None)` if no command is configured.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any name → value source
    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(program) = lookup("SPEECH_HOST_COMMAND").filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };

        let mut config = Self::new(program.trim());

        if let Some(args) = lookup("SPEECH_HOST_ARGS") {
            config.args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(flag) = lookup("SPEECH_HOST_PORT_FLAG") {
            config.port_flag = flag;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "SPEECH_HOST_STARTUP_TIMEOUT_MS")? {
            config.startup_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse::<u64, _>(&lookup, "SPEECH_HOST_CONNECT_INTERVAL_MS")? {
            config.connect_interval = Duration::from_millis(ms);
        }

        Ok(Some(config))
    }

    /// Append an argument
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set the port flag
    pub fn with_port_flag(mut self, flag: impl Into<String>) -> Self {
        self.port_flag = flag.into();
        self
    }

    /// Set the startup timeout
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Set the connect polling interval
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Full argument list for a host bound to `port`
    pub fn command_args(&self, port: u16) -> Vec<String> {
        let mut args = self.args.clone();
        args.push(self.port_flag.clone());
        args.push(port.to_string());
        args
    }
}

/// Launches one host process per worker
pub struct ProcessLauncher {
    config: HostCommandConfig,
}

impl ProcessLauncher {
    /// Create a launcher for the given command
    pub fn new(config: HostCommandConfig) -> Self {
        Self { config }
    }

    /// The command configuration
    pub fn config(&self) -> &HostCommandConfig {
        &self.config
    }

    async fn connect_during_startup(
        &self,
        child: &mut Child,
        port: u16,
    ) -> Result<TcpEndpoint, TransportError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            if let Some(status) = child.try_wait()? {
                return Err(TransportError::Spawn(format!(
                    "speech host exited during startup ({})",
                    status
                )));
            }

            match TcpEndpoint::connect(addr).await {
                Ok(endpoint) => return Ok(endpoint),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => tokio::time::sleep(self.config.connect_interval).await,
            }
        }
    }
}

#[async_trait]
impl EndpointLauncher for ProcessLauncher {
    #[instrument(skip(self), fields(program = %self.config.program))]
    async fn launch(&self, port: u16) -> Result<Arc<dyn SpeechEndpoint>, TransportError> {
        let mut child = Command::new(&self.config.program)
            .args(self.config.command_args(port))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::Spawn(format!("{}: {}", self.config.program, e)))?;

        let pid = child.id();
        debug!(?pid, port, "Speech host spawned");

        match self.connect_during_startup(&mut child, port).await {
            Ok(endpoint) => {
                info!(?pid, port, "Connected to speech host");
                Ok(Arc::new(HostProcess::new(endpoint, child)))
            }
            Err(e) => {
                warn!(?pid, port, error = %e, "Speech host did not come up");
                if let Err(kill_err) = child.kill().await {
                    debug!(?pid, error = %kill_err, "Failed to kill speech host");
                }
                Err(e)
            }
        }
    }
}

/// A connected host process
///
/// Shutting down closes the connection and then kills and reaps the child,
/// so a disposed worker never leaves a process behind.
pub struct HostProcess {
    endpoint: TcpEndpoint,
    pid: Option<u32>,
    child: Mutex<Option<Child>>,
}

impl HostProcess {
    /// Pair a connection with the process serving it
    pub fn new(endpoint: TcpEndpoint, child: Child) -> Self {
        Self {
            endpoint,
            pid: child.id(),
            child: Mutex::new(Some(child)),
        }
    }

    /// OS process id, if the process was running when attached
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the child has been torn down
    pub async fn is_terminated(&self) -> bool {
        self.child.lock().await.is_none()
    }
}

#[async_trait]
impl SpeechEndpoint for HostProcess {
    async fn hello(&self) -> Result<String, TransportError> {
        self.endpoint.hello().await
    }

    async fn speak_ssml(&self, markup: &str) -> Result<Vec<u8>, TransportError> {
        self.endpoint.speak_ssml(markup).await
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.endpoint.shutdown().await?;

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
            debug!(pid = ?self.pid, "Speech host terminated");
        }
        Ok(())
    }
}
