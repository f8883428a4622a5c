//! `ClientConfig`/`ClientConfigBuilder` (§6): the external interface's
//! configuration surface, plus `tracing`-backed log plumbing rather than a
//! bespoke logger (§0, §5 "drop-oldest + one aggregate warning" policy is
//! `tracing-subscriber`'s non-blocking writer's own backpressure behavior).

use std::path::PathBuf;
use std::time::Duration;

use pof::PofContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDestination {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub remote_address: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub worker_threads: usize,
    pub pof_context: PofContext,
    pub identity_token: Option<Vec<u8>>,
    pub log_destination: LogDestination,
    pub log_level: String,
    pub log_format: LogFormat,
    /// Truncates a single logged value's debug representation; payload
    /// contents are never logged in full regardless (§0).
    pub log_character_limit: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_address: "127.0.0.1:9000".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(10),
            worker_threads: 0,
            pof_context: PofContext::default(),
            identity_token: None,
            log_destination: LogDestination::Stderr,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_character_limit: 256,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remote_address(mut self, addr: impl Into<String>) -> Self {
        self.config.remote_address = addr.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn worker_threads(mut self, n: usize) -> Self {
        self.config.worker_threads = n;
        self
    }

    pub fn pof_context(mut self, context: PofContext) -> Self {
        self.config.pof_context = context;
        self
    }

    pub fn identity_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.config.identity_token = Some(token.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log_format = format;
        self
    }

    pub fn log_character_limit(mut self, limit: usize) -> Self {
        self.config.log_character_limit = limit;
        self
    }

    /// Logs to this file instead of `log_destination`. Opened in append
    /// mode, created if missing.
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.log_file = Some(path.into());
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}

/// Installs a process-wide `tracing` subscriber honoring `log_level`/
/// `log_format` (§0, §5). `log_destination` picks the writer; safe to call
/// more than once per process, later calls are no-ops.
pub fn init_tracing(config: &ClientConfig) {
    use std::sync::Mutex;
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let writer = match &config.log_file {
        Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(err) => {
                eprintln!("failed to open log file {}: {err}, falling back to stderr", path.display());
                BoxMakeWriter::new(std::io::stderr)
            }
        },
        None if config.log_destination == LogDestination::Stdout => BoxMakeWriter::new(std::io::stdout),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let result = if config.log_format == LogFormat::Json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(writer)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}
