//! The shared config for tracesearch
use std::path::{Path, PathBuf};

/// Helps serde default the number of jobs to run at once to 50
fn default_concurrent_jobs() -> usize {
    50
}

/// Helps serde default the number of traces to return to 20
fn default_limit() -> usize {
    20
}

/// Helps serde default the query timeout to 30 seconds
fn default_query_timeout() -> u64 {
    30
}

/// Helps serde default the bytes each job should search to 100 MiB
fn default_target_bytes_per_job() -> u64 {
    100 * 1024 * 1024
}

/// Helps serde default the number of traces in a single block page to 1000
fn default_page_size() -> usize {
    1000
}

/// Helps serde default the streaming buffer to 64 snapshots
fn default_stream_buffer() -> usize {
    64
}

/// How search progress should be tracked for a request
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum ProgressMode {
    /// Only return a final snapshot when the search completes
    #[default]
    #[serde(alias = "batch")]
    Batch,
    /// Also push a snapshot to a channel after every update
    #[serde(alias = "streaming")]
    Streaming {
        /// The number of snapshots to buffer before dropping updates
        #[serde(default = "default_stream_buffer")]
        buffer: usize,
    },
}

/// The settings for sharded searches
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchConf {
    /// The max number of jobs to run at once for a single search
    #[serde(default = "default_concurrent_jobs")]
    pub concurrent_jobs: usize,
    /// The limit to use when a request does not set one
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    /// The largest limit a request can ask for (0 is unlimited)
    #[serde(default)]
    pub max_limit: usize,
    /// How long a search can run in seconds before it is cancelled (0 never times out)
    #[serde(default = "default_query_timeout")]
    pub query_timeout: u64,
    /// The number of block bytes each job should try to search
    #[serde(default = "default_target_bytes_per_job")]
    pub target_bytes_per_job: u64,
    /// The number of traces to write into each block page
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Whether to truncate results down to exactly the requested limit
    #[serde(default)]
    pub exact_limit: bool,
    /// How progress should be tracked for each search
    #[serde(default)]
    pub progress: ProgressMode,
}

impl Default for SearchConf {
    /// Create a default search config
    fn default() -> Self {
        SearchConf {
            concurrent_jobs: default_concurrent_jobs(),
            default_limit: default_limit(),
            max_limit: 0,
            query_timeout: default_query_timeout(),
            target_bytes_per_job: default_target_bytes_per_job(),
            page_size: default_page_size(),
            exact_limit: false,
            progress: ProgressMode::default(),
        }
    }
}

impl SearchConf {
    /// Get our query timeout if one is set
    #[must_use]
    pub fn timeout(&self) -> Option<std::time::Duration> {
        (self.query_timeout > 0).then(|| std::time::Duration::from_secs(self.query_timeout))
    }
}

/// The backend to store blocks in
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum BackendConf {
    /// Keep blocks in memory
    #[default]
    #[serde(alias = "memory")]
    Memory,
    /// Store blocks on a local filesystem
    #[serde(alias = "local")]
    Local {
        /// The directory to store blocks in
        path: PathBuf,
    },
}

/// The settings for sending traces to stdout/stderr
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TracingLocal {
    /// The log level to use for stdout/stderr
    #[serde(default)]
    pub level: LogLevel,
}

/// The tracing settings to use
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Tracing {
    /// The settings for sending traces to stdout/stderr
    #[serde(default)]
    pub local: TracingLocal,
}

/// The log level to set
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Copy, Default)]
pub enum LogLevel {
    /// Do not log any info
    Off,
    /// Log at the error level
    Error,
    /// Log at the warning level
    Warn,
    /// Log at the info level
    #[default]
    Info,
    /// Log at the debug level
    Debug,
    /// Log at the tracing level
    Trace,
}

impl LogLevel {
    #[cfg(feature = "trace")]
    /// Cast this log level to a tracing filter
    #[must_use]
    pub fn to_filter(&self) -> tracing_subscriber::filter::LevelFilter {
        match self {
            LogLevel::Off => tracing_subscriber::filter::LevelFilter::OFF,
            LogLevel::Error => tracing_subscriber::filter::LevelFilter::ERROR,
            LogLevel::Warn => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
        }
    }
}

impl std::fmt::Display for LogLevel {
    /// Allow the log level to be displayed
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LogLevel::Off => write!(f, "Off"),
            LogLevel::Error => write!(f, "Error"),
            LogLevel::Warn => write!(f, "Warn"),
            LogLevel::Info => write!(f, "Info"),
            LogLevel::Debug => write!(f, "Debug"),
            LogLevel::Trace => write!(f, "Trace"),
        }
    }
}

/// The config for tracesearch
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Conf {
    /// Sharded search settings
    #[serde(default)]
    pub search: SearchConf,
    /// Block storage settings
    #[serde(default)]
    pub backend: BackendConf,
    /// Tracing settings
    #[serde(default)]
    pub tracing: Tracing,
}

impl Conf {
    /// Creates a new [Conf] object
    ///
    /// # Arguments
    ///
    /// * `path` - The path to use when reading the config file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            // load from a file first if one exists
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            // then overlay any environment args ontop
            .add_source(
                config::Environment::with_prefix("tracesearch")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// Load a config from a yaml string
    ///
    /// # Arguments
    ///
    /// * `raw` - The raw yaml to load
    pub fn from_yaml(raw: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()
    }
}
