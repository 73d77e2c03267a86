use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap_serde_derive::{
    ClapSerde,
    clap::{self, Parser},
};
use serde::{Deserialize, Serialize};
use tracing::Level;

#[cfg(test)]
pub const CONFIG_PATH_ENV: &'static str = "TEST_CONFIG_PATH";

#[cfg(not(test))]
pub const CONFIG_PATH_ENV: &'static str = "KODAMA_CONFIG_PATH";

/// Configuration for the app.
#[derive(Parser, Deserialize, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct AppConfigArgs {
    /// stding input (unused)
    pub input: Option<Vec<String>>,

    /// Path pointing to config.yaml
    #[clap(long = "config", default_value = "config.yaml")]
    pub config_path: std::path::PathBuf,

    #[command(flatten)]
    pub config: <AppConfig as ClapSerde>::Opt,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, derive_more::FromStr, PartialEq)]
#[from_str(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

#[derive(ClapSerde, Clone, Deserialize)]
pub struct AppConfig {
    /// `production` serves over TLS, `development` over plain HTTP
    #[clap(short = 'e', long = "environment")]
    pub environment: Environment,

    /// TLS private key in PEM or DER format
    #[clap(short = 'k', long = "key", requires = "cert")]
    pub key: PathBuf,
    /// TLS certificate in PEM or DER format
    #[clap(short = 'c', long = "cert", requires = "key")]
    pub cert: PathBuf,

    /// Address to listen on
    #[clap(long = "listen")]
    #[default(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080)))]
    pub listen: SocketAddr,

    /// Maximum number of concurrent voice WebSocket sessions
    #[clap(long = "connection-limit")]
    pub connection_limit: usize,

    /// Frames buffered per session before the peer is considered unresponsive
    #[clap(long = "session-queue")]
    #[default(256)]
    pub session_queue: usize,

    #[clap(short, long)]
    pub log_level: String,

    /// Expose task data to tokio-console
    #[clap(long = "tokio-console")]
    #[serde(default)]
    pub tokio_console: bool,

    /// HS256 secret used to validate access tokens
    #[clap(long = "jwt-secret", env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// YAML file describing servers, their members and channels
    #[clap(long = "directory")]
    pub directory: PathBuf,

    /// Browser origins allowed by CORS. Empty allows any origin.
    #[clap(long = "cors-origin")]
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("environment", &self.environment)
            .field("key", &self.key)
            .field("cert", &self.cert)
            .field("listen", &self.listen)
            .field("connection_limit", &self.connection_limit)
            .field("session_queue", &self.session_queue)
            .field("log_level", &self.log_level)
            .field("tokio_console", &self.tokio_console)
            .field("jwt_secret", &"<redacted>")
            .field("directory", &self.directory)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

impl std::fmt::Debug for ClapSerdeOptionalAppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClapSerdeOptionalConfig")
            .field("environment", &self.environment)
            .field("key", &self.key)
            .field("cert", &self.cert)
            .field("listen", &self.listen)
            .field("connection_limit", &self.connection_limit)
            .field("session_queue", &self.session_queue)
            .field("log_level", &self.log_level)
            .field("tokio_console", &self.tokio_console)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("directory", &self.directory)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}
/// Greeaaaaat...derive doesn't work due to macro shenanigans
impl Clone for ClapSerdeOptionalAppConfig {
    fn clone(&self) -> Self {
        Self {
            environment: self.environment.clone(),
            key: self.key.clone(),
            cert: self.cert.clone(),
            listen: self.listen.clone(),
            connection_limit: self.connection_limit.clone(),
            session_queue: self.session_queue.clone(),
            log_level: self.log_level.clone(),
            tokio_console: self.tokio_console.clone(),
            jwt_secret: self.jwt_secret.clone(),
            directory: self.directory.clone(),
            cors_origins: self.cors_origins.clone(),
        }
    }
}

impl AppConfig {
    /// Config takes priority from:
    /// 1. CLI commands (eg. --connection-limit 10) will always be 10 despite config.yaml saying otherwise
    /// 2. YAML config from ENV KODAMA_CONFIG_PATH
    /// 3. YAML config from CLI if no env is provided (--config)
    /// 4. Default config YAML file - ./config.yaml
    pub fn new() -> anyhow::Result<Self> {
        // Parse from real CLI args + env
        let mut args = AppConfigArgs::try_parse()?;
        Self::from_args(&mut args)
    }
    /// Testable constructor: accepts a pre-built AppConfigArgs so tests
    /// can bypass real CLI parsing.
    pub fn from_args(args: &mut AppConfigArgs) -> anyhow::Result<Self> {
        // Environment variable overrides the --config flag
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            args.config_path = path.into();
        }
        let file = File::open(&args.config_path)?;
        let file_config = serde_yaml::from_reader::<_, AppConfig>(BufReader::new(file))?;
        Ok(file_config.merge(&mut args.config))
    }
    pub fn get_log_level(&self) -> Level {
        match self.log_level.as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
    pub fn tls_enabled(&self) -> bool {
        self.environment == Environment::Production
    }
}
