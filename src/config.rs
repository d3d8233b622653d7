use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use crate::engine::profile::LanguageProfile;

#[derive(Parser)]
#[command(name = "coderun", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Address to bind, overrides the configuration file
    #[arg(long = "bind")]
    pub bind_address: Option<String>,

    /// Port to bind, overrides the configuration file
    #[arg(long = "port", short = 'p')]
    pub bind_port: Option<u16>,

    /// Probe every configured language, print its availability and exit
    #[arg(long = "list-languages", default_value_t = false)]
    pub list_languages: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file, or the defaults if none was given
    pub fn to_config(&self) -> std::io::Result<Config> {
        let mut config = match &self.config_path {
            Some(path) => {
                let file = std::fs::File::open(path)?;
                let reader = std::io::BufReader::new(file);
                serde_json::from_reader(reader)?
            }
            None => Config::default(),
        };

        if let Some(address) = &self.bind_address {
            config.server.bind_address = address.clone();
        }
        if let Some(port) = self.bind_port {
            config.server.bind_port = port;
        }

        Ok(config)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    /// Replaces the built-in language table when present
    pub languages: Option<Vec<LanguageProfile>>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
    /// Largest accepted JSON body
    pub max_body_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 5000,
            max_body_bytes: ByteSize(1 << 20),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EngineConfig {
    /// Budget of one in-process sandboxed evaluation
    pub sandbox_time_limit: MicroSecond,
    pub compile_time_limit: MicroSecond,
    pub run_time_limit: MicroSecond,
    pub probe_time_limit: MicroSecond,
    /// How long a probe result is trusted; zero disables caching
    pub probe_cache_ttl: Second,
    /// Cap on combined stdout + stderr of one child process
    pub max_output: ByteSize,
    /// Cap on the diagnostic text echoed back as `consoleOutput`
    pub max_diagnostic: ByteSize,
    pub sandbox_heap_limit: ByteSize,
    /// Largest file a child process may write
    pub max_file_size: ByteSize,
    pub workspace_root: Option<PathBuf>,
    pub max_concurrency: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sandbox_time_limit: MicroSecond(1_000_000),
            compile_time_limit: MicroSecond(10_000_000),
            run_time_limit: MicroSecond(5_000_000),
            probe_time_limit: MicroSecond(2_000_000),
            probe_cache_ttl: Second(60),
            max_output: ByteSize(1 << 20),
            max_diagnostic: ByteSize(64 << 10),
            sandbox_heap_limit: ByteSize(128 << 20),
            max_file_size: ByteSize(64 << 20),
            workspace_root: None,
            max_concurrency: None,
        }
    }
}

impl EngineConfig {
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("coderun"))
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
            .filter(|&n| n > 0)
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(4)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MicroSecond(pub u64);

impl From<MicroSecond> for Duration {
    fn from(value: MicroSecond) -> Self {
        Duration::from_micros(value.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Second(pub u64);

impl From<Second> for Duration {
    fn from(value: Second) -> Self {
        Duration::from_secs(value.0)
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl ByteSize {
    pub fn as_usize(self) -> usize {
        usize::try_from(self.0).unwrap_or(usize::MAX)
    }
}
