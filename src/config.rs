use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;

use crate::auth::{BackoffPolicy, RemoteApiConfig, UpdaterSettings};

/// Enphase local API proxy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Interface to listen on
    #[arg(short, long, env = "ENPHASE_BIND", default_value = "127.0.0.1")]
    pub bind: String,

    /// Port number to listen on
    #[arg(short, long, env = "ENPHASE_PORT", default_value = "8080")]
    pub port: u16,

    /// Send verbose output to the console
    #[arg(short, long, env = "ENPHASE_VERBOSE")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enphase cloud base URL
    #[arg(
        long,
        env = "ENPHASE_REMOTE_API_URL",
        default_value = "https://enlighten.enphaseenergy.com"
    )]
    pub remote_api_url: String,

    /// Enphase cloud account email
    #[arg(long, env = "ENPHASE_REMOTE_API_USERNAME")]
    pub remote_api_username: Option<String>,

    /// Enphase cloud account password
    #[arg(long, env = "ENPHASE_REMOTE_API_PASSWORD", hide_env_values = true)]
    pub remote_api_password: Option<String>,

    /// Serial number of the gateway the token is issued for
    #[arg(long, env = "ENPHASE_REMOTE_API_SERIALNO")]
    pub remote_api_serialno: Option<String>,

    /// Base URL of the gateway's local API
    #[arg(long, env = "ENPHASE_LOCAL_API_URL")]
    pub local_api_url: Option<String>,

    /// Static token for the local API; disables fetching
    #[arg(long, env = "ENPHASE_LOCAL_API_JWT", hide_env_values = true)]
    pub local_api_jwt: Option<String>,

    /// Seconds between credential refresh checks
    #[arg(long, env = "ENPHASE_REFRESH_INTERVAL", default_value = "300")]
    pub refresh_interval: u64,

    /// Give up a refresh after this many attempts (default: retry until shutdown)
    #[arg(long, env = "ENPHASE_REFRESH_MAX_ATTEMPTS")]
    pub refresh_max_attempts: Option<u32>,

    /// Seconds to wait for the updater to stop before aborting it
    #[arg(long, env = "ENPHASE_SHUTDOWN_GRACE", default_value = "60")]
    pub shutdown_grace: u64,

    /// HTTP request timeout in seconds
    #[arg(long, env = "ENPHASE_HTTP_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Server settings
    pub server_host: String,
    pub server_port: u16,

    // Enphase cloud
    pub remote_api_url: String,
    pub remote_api_username: Option<String>,
    pub remote_api_password: Option<String>,
    pub remote_api_serialno: Option<String>,

    // Local API
    pub local_api_url: String,
    pub local_api_jwt: Option<String>,

    // Updater
    pub refresh_interval: u64,
    pub refresh_max_attempts: Option<u32>,
    pub shutdown_grace: u64,

    // HTTP client
    pub http_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > .env > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let log_level = if args.verbose {
            "debug".to_string()
        } else {
            args.log_level
        };

        Ok(Config {
            server_host: args.bind,
            server_port: args.port,

            remote_api_url: args.remote_api_url,
            remote_api_username: non_empty(args.remote_api_username),
            remote_api_password: non_empty(args.remote_api_password),
            remote_api_serialno: non_empty(args.remote_api_serialno),

            local_api_url: non_empty(args.local_api_url).context(
                "ENPHASE_LOCAL_API_URL is required (use --local-api-url or set ENPHASE_LOCAL_API_URL env var)",
            )?,
            local_api_jwt: non_empty(args.local_api_jwt),

            refresh_interval: args.refresh_interval,
            refresh_max_attempts: args.refresh_max_attempts,
            shutdown_grace: args.shutdown_grace,

            http_timeout: args.http_timeout,

            log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        validate_url("ENPHASE_LOCAL_API_URL", &self.local_api_url)?;

        if self.refresh_interval == 0 {
            anyhow::bail!("ENPHASE_REFRESH_INTERVAL must be greater than zero");
        }

        if self.refresh_max_attempts == Some(0) {
            anyhow::bail!("ENPHASE_REFRESH_MAX_ATTEMPTS must be greater than zero");
        }

        // A static token means the cloud is never contacted
        if self.local_api_jwt.is_some() {
            return Ok(());
        }

        validate_url("ENPHASE_REMOTE_API_URL", &self.remote_api_url)?;

        let missing: Vec<&str> = [
            ("ENPHASE_REMOTE_API_USERNAME", &self.remote_api_username),
            ("ENPHASE_REMOTE_API_PASSWORD", &self.remote_api_password),
            ("ENPHASE_REMOTE_API_SERIALNO", &self.remote_api_serialno),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_none())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "{} required unless ENPHASE_LOCAL_API_JWT is set",
                missing.join(", ")
            );
        }

        Ok(())
    }

    /// Settings for the credentials manager
    pub fn remote_api(&self) -> RemoteApiConfig {
        RemoteApiConfig {
            url: self.remote_api_url.clone(),
            username: self.remote_api_username.clone(),
            password: self.remote_api_password.clone(),
            serialno: self.remote_api_serialno.clone(),
            jwt: self.local_api_jwt.clone(),
            timeout: self.http_timeout,
        }
    }

    /// Settings for the credentials updater
    pub fn updater_settings(&self) -> UpdaterSettings {
        UpdaterSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval),
            backoff: BackoffPolicy {
                max_attempts: self.refresh_max_attempts,
                ..BackoffPolicy::default()
            },
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
        }
    }
}

/// Treat empty values (e.g. `VAR=` in .env) as unset
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn validate_url(name: &str, url: &str) -> Result<()> {
    let parsed = reqwest::Url::parse(url).with_context(|| format!("{} is not a valid URL: {}", name, url))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => anyhow::bail!("{} must use http or https, got {}", name, scheme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["enphase-proxy"];
        argv.extend_from_slice(args);
        Config::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    const REMOTE: [&str; 8] = [
        "--local-api-url",
        "https://envoy.local",
        "--remote-api-username",
        "u",
        "--remote-api-password",
        "p",
        "--remote-api-serialno",
        "123",
    ];

    #[test]
    fn test_defaults() {
        let config = parse(&["--local-api-url", "https://envoy.local"]);
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.remote_api_url, "https://enlighten.enphaseenergy.com");
        assert_eq!(config.refresh_interval, 300);
        assert_eq!(config.refresh_max_attempts, None);
        assert_eq!(config.shutdown_grace, 60);
    }

    #[test]
    fn test_bind_port_and_verbose() {
        let config = parse(&[
            "--local-api-url",
            "https://envoy.local",
            "--verbose",
            "--port",
            "8000",
            "--bind",
            "0.0.0.0",
        ]);
        assert_eq!(config.server_host, "0.0.0.0");
        assert_eq!(config.server_port, 8000);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_missing_local_api_url() {
        let args = CliArgs::try_parse_from(["enphase-proxy"]).unwrap();
        let err = Config::from_args(args).unwrap_err();
        assert!(err.to_string().contains("ENPHASE_LOCAL_API_URL"));
    }

    #[test]
    fn test_validate_full_remote_config() {
        assert!(parse(&REMOTE).validate().is_ok());
    }

    #[test]
    fn test_validate_static_token_needs_no_remote_credentials() {
        let config = parse(&["--local-api-url", "https://envoy.local", "--local-api-jwt", "jwt"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.remote_api().jwt.as_deref(), Some("jwt"));
    }

    #[test]
    fn test_validate_reports_missing_remote_credentials() {
        let config = parse(&["--local-api-url", "https://envoy.local", "--remote-api-username", "u"]);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ENPHASE_REMOTE_API_PASSWORD"));
        assert!(err.contains("ENPHASE_REMOTE_API_SERIALNO"));
        assert!(!err.contains("ENPHASE_REMOTE_API_USERNAME"));
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = parse(&["--local-api-url", "https://envoy.local", "--local-api-jwt", ""]);
        assert_eq!(config.local_api_jwt, None);
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = parse(&REMOTE);
        config.local_api_url = "ftp://envoy.local".to_string();
        assert!(config.validate().is_err());

        let mut config = parse(&REMOTE);
        config.remote_api_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = parse(&REMOTE);
        config.refresh_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_updater_settings() {
        let mut args = REMOTE.to_vec();
        args.extend(["--refresh-interval", "120", "--refresh-max-attempts", "4"]);
        let settings = parse(&args).updater_settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(120));
        assert_eq!(settings.backoff.max_attempts, Some(4));
        assert_eq!(settings.backoff.min_delay, Duration::from_secs(60));
        assert_eq!(settings.shutdown_grace, Duration::from_secs(60));
    }
}
