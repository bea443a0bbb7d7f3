//! Configuration loading.
//!
//! Settings come from, in increasing precedence:
//! 1. Built-in defaults
//! 2. A RON file (`MAILRUN_CONFIG`, `./mailrun.config.ron` or
//!    `/etc/mailrun/mailrun.config.ron`)
//! 3. `MAILRUN_*` environment variables, including any loaded from `.env`
//! 4. Command-line flags, applied by the binary
//!
//! A missing configuration file is not an error; defaults apply.

use std::{
    fmt::Display,
    net::{IpAddr, SocketAddr},
    path::{Path, PathBuf},
    str::FromStr,
};

use mailrun_dispatch::{DispatchConfig, TemplateConfig, TransportConfig};
use mailrun_validation::{
    DEFAULT_PAGE_SIZE, DomainPolicy, ProbeConfig, ValidationMode, reputation::ReputationConfig,
};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "MAILRUN_CONFIG";

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./mailrun.config.ron", "/etc/mailrun/mailrun.config.ron"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{CONFIG_ENV} points to non-existent file: {0}")]
    MissingFile(PathBuf),

    #[error("Failed to read config from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("Invalid value '{value}' for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the suppression list is read from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuppressionConfig {
    /// Paginated HTTP endpoint.
    #[serde(default)]
    pub url: Option<String>,

    /// Local newline-delimited list, used when no URL is configured.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Default: 1000
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

const fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            page_size: default_page_size(),
        }
    }
}

/// Settings for `mailrun validate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidationConfig {
    /// Default: `Full`
    #[serde(default)]
    pub mode: ValidationMode,

    #[serde(default)]
    pub suppression: SuppressionConfig,

    /// Default: `validated`
    #[serde(default = "default_validated_dir")]
    pub output_dir: PathBuf,
}

fn default_validated_dir() -> PathBuf {
    PathBuf::from("validated")
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            suppression: SuppressionConfig::default(),
            output_dir: default_validated_dir(),
        }
    }
}

/// Settings for the file tools.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListsConfig {
    /// Default: `cleaned`
    #[serde(default = "default_cleaned_dir")]
    pub cleaned_dir: PathBuf,

    /// Directory for split files, canary samples and reputation results.
    ///
    /// Default: `filtered`
    #[serde(default = "default_filtered_dir")]
    pub filtered_dir: PathBuf,

    /// Strip hyphens from addresses while cleaning.
    ///
    /// Default: `false`
    #[serde(default)]
    pub remove_hyphens: bool,

    /// Default: 5000
    #[serde(default = "default_max_per_file")]
    pub max_per_file: usize,

    /// Default: 50
    #[serde(default = "default_canary_per_domain")]
    pub canary_per_domain: usize,
}

fn default_cleaned_dir() -> PathBuf {
    PathBuf::from("cleaned")
}

fn default_filtered_dir() -> PathBuf {
    PathBuf::from("filtered")
}

const fn default_max_per_file() -> usize {
    5000
}

const fn default_canary_per_domain() -> usize {
    50
}

impl Default for ListsConfig {
    fn default() -> Self {
        Self {
            cleaned_dir: default_cleaned_dir(),
            filtered_dir: default_filtered_dir(),
            remove_hyphens: false,
            max_per_file: default_max_per_file(),
            canary_per_domain: default_canary_per_domain(),
        }
    }
}

/// Credentials; only ever read from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secrets {
    pub transport_api_key: Option<String>,
    pub suppression_api_key: Option<String>,
    pub reputation_api_key: Option<String>,
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Mailrun {
    #[serde(default, alias = "dns")]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub validation: ValidationConfig,

    #[serde(default)]
    pub reputation: ReputationConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub template: TemplateConfig,

    #[serde(default)]
    pub lists: ListsConfig,

    /// Default: `reports`
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(skip)]
    pub secrets: Secrets,
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

impl Default for Mailrun {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            validation: ValidationConfig::default(),
            reputation: ReputationConfig::default(),
            dispatch: DispatchConfig::default(),
            transport: TransportConfig::default(),
            template: TemplateConfig::default(),
            lists: ListsConfig::default(),
            report_dir: default_report_dir(),
            secrets: Secrets::default(),
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. `MAILRUN_CONFIG` environment variable
/// 2. ./mailrun.config.ron (current working directory)
/// 3. /etc/mailrun/mailrun.config.ron (system-wide config)
///
/// # Errors
///
/// Fails only when `MAILRUN_CONFIG` names a file that does not exist.
pub fn find_config_file(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<PathBuf>, ConfigError> {
    if let Some(env_path) = lookup(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::MissingFile(path));
    }

    Ok(DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists()))
}

/// Parse a nameserver given as `ip` or `ip:port`; the port defaults to 53.
///
/// # Errors
///
/// Returns a description of the problem when `raw` is neither form.
pub fn parse_nameserver(raw: &str) -> Result<SocketAddr, String> {
    let raw = raw.trim();
    raw.parse::<SocketAddr>()
        .or_else(|_| raw.parse::<IpAddr>().map(|ip| SocketAddr::new(ip, 53)))
        .map_err(|_| format!("'{raw}' is not an IP address or IP:port"))
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn env_value<T, E>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Result<Option<T>, ConfigError>
where
    E: Display,
{
    lookup(var)
        .map(|value| {
            parse(&value).map_err(|e| ConfigError::InvalidEnv {
                var,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn env_parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    env_value(lookup, var, |raw| raw.trim().parse::<T>())
}

fn secret(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl Mailrun {
    /// Load `.env`, then the configuration file (`path`, or the first one
    /// [`find_config_file`] turns up) with environment overrides applied.
    ///
    /// The result is not validated; callers apply their own overrides first
    /// and then call [`Mailrun::validate`].
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an unreadable or malformed file or an
    /// invalid override.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let lookup = |var: &str| std::env::var(var).ok();

        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => find_config_file(lookup)?,
        };

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env(lookup)?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_ron(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// # Errors
    ///
    /// Returns the RON error for malformed input.
    pub fn from_ron(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)
    }

    /// Apply `MAILRUN_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] for a value that does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env_parsed(&lookup, "MAILRUN_BATCH_SIZE")? {
            self.dispatch.batch_size = v;
        }
        if let Some(v) = env_parsed(&lookup, "MAILRUN_RATE_PER_SECOND")? {
            self.dispatch.rate_per_second = v;
        }
        if let Some(v) = env_parsed::<DomainPolicy>(&lookup, "MAILRUN_DOMAIN_POLICY")? {
            self.probe.policy = v;
        }
        if let Some(v) = env_parsed(&lookup, "MAILRUN_DNS_TIMEOUT_MS")? {
            self.probe.timeout_ms = v;
        }
        if let Some(v) = env_parsed(&lookup, "MAILRUN_DNS_RETRIES")? {
            self.probe.retries = v;
        }
        if let Some(v) = env_value(&lookup, "MAILRUN_ACCEPT_RISKY", parse_bool)? {
            self.reputation.accept_risky = v;
        }
        if let Some(v) = env_value(&lookup, "MAILRUN_DRY_RUN", parse_bool)? {
            self.dispatch.dry_run = v;
        }
        if let Some(v) = env_value(&lookup, "MAILRUN_NAMESERVERS", |raw| {
            raw.split(',')
                .filter(|s| !s.trim().is_empty())
                .map(parse_nameserver)
                .collect::<Result<Vec<_>, _>>()
        })? {
            self.probe.nameservers = v;
        }

        self.secrets = Secrets {
            transport_api_key: secret(&lookup, "MAILRUN_TRANSPORT_API_KEY"),
            suppression_api_key: secret(&lookup, "MAILRUN_SUPPRESSION_API_KEY"),
            reputation_api_key: secret(&lookup, "MAILRUN_REPUTATION_API_KEY"),
        };

        Ok(())
    }

    /// Reject settings that would make a run meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.dispatch.batch_size == 0, "batch size must be at least 1"),
            (self.dispatch.rate_per_second == 0, "rate per second must be at least 1"),
            (self.probe.timeout_ms == 0, "DNS timeout must be at least 1ms"),
            (self.reputation.concurrency == 0, "reputation concurrency must be at least 1"),
            (self.lists.max_per_file == 0, "max per file must be at least 1"),
            (self.validation.suppression.page_size == 0, "suppression page size must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(ConfigError::Invalid((*reason).to_string())),
            None => Ok(()),
        }
    }

    /// Name used for contacts without one.
    #[must_use]
    pub fn placeholder_name(&self) -> &str {
        &self.dispatch.placeholder_name
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use ahash::AHashMap;
    use pretty_assertions::assert_eq;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: AHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Mailrun::default();

        assert_eq!(config.dispatch.batch_size, 50);
        assert_eq!(config.dispatch.rate_per_second, 20);
        assert_eq!(config.dispatch.failure_backoff_ms, 3000);
        assert!(!config.dispatch.dry_run);
        assert_eq!(config.probe.policy, DomainPolicy::Strict);
        assert_eq!(config.probe.timeout_ms, 4000);
        assert_eq!(config.probe.retries, 2);
        assert!(!config.reputation.accept_risky);
        assert_eq!(config.reputation.concurrency, 5);
        assert_eq!(config.lists.max_per_file, 5000);
        assert_eq!(config.lists.canary_per_domain, 50);
        assert_eq!(config.placeholder_name(), "customer");
        assert_eq!(config.report_dir, PathBuf::from("reports"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_ron_is_default() {
        assert_eq!(Mailrun::from_ron("()").unwrap(), Mailrun::default());
    }

    #[test]
    fn test_parse_ron() {
        let config = Mailrun::from_ron(
            r#"(
                probe: (policy: Lenient, timeout_ms: 1500, nameservers: ["1.1.1.1:53"]),
                dispatch: (
                    batch_size: 25,
                    sender_name: "Security Team",
                    sender_address: "security@example.com",
                    configuration_set: "tracking",
                    template_data: { "site_link": "https://example.com" },
                ),
                transport: (endpoint: "https://mail-gateway.example.com"),
                validation: (mode: DnsOnly, suppression: (file: "suppressed.txt")),
            )"#,
        )
        .unwrap();

        assert_eq!(config.probe.policy, DomainPolicy::Lenient);
        assert_eq!(config.probe.timeout_ms, 1500);
        assert_eq!(config.probe.retries, 2);
        assert_eq!(config.probe.nameservers, vec!["1.1.1.1:53".parse().unwrap()]);
        assert_eq!(config.dispatch.batch_size, 25);
        assert_eq!(config.dispatch.rate_per_second, 20);
        assert_eq!(config.dispatch.configuration_set.as_deref(), Some("tracking"));
        assert_eq!(config.dispatch.template_data["site_link"], "https://example.com");
        assert_eq!(
            config.transport.endpoint.as_deref(),
            Some("https://mail-gateway.example.com")
        );
        assert_eq!(config.validation.mode, ValidationMode::DnsOnly);
        assert_eq!(
            config.validation.suppression.file,
            Some(PathBuf::from("suppressed.txt"))
        );
    }

    #[test]
    fn test_example_config_parses() {
        let config = Mailrun::from_ron(include_str!("../../mailrun.config.example.ron")).unwrap();

        assert_eq!(config.dispatch.sender(), "Security Team <security@example.com>");
        assert_eq!(config.probe.nameservers.len(), 2);
        assert!(config.validation.suppression.url.is_some());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Mailrun::default();
        config
            .apply_env(env(&[
                ("MAILRUN_BATCH_SIZE", "10"),
                ("MAILRUN_RATE_PER_SECOND", " 5 "),
                ("MAILRUN_DOMAIN_POLICY", "lenient"),
                ("MAILRUN_DNS_RETRIES", "0"),
                ("MAILRUN_DRY_RUN", "yes"),
                ("MAILRUN_ACCEPT_RISKY", "1"),
                ("MAILRUN_NAMESERVERS", "8.8.8.8, 9.9.9.9:5353"),
                ("MAILRUN_TRANSPORT_API_KEY", "secret"),
                ("MAILRUN_REPUTATION_API_KEY", "  "),
            ]))
            .unwrap();

        assert_eq!(config.dispatch.batch_size, 10);
        assert_eq!(config.dispatch.rate_per_second, 5);
        assert_eq!(config.probe.policy, DomainPolicy::Lenient);
        assert_eq!(config.probe.retries, 0);
        assert!(config.dispatch.dry_run);
        assert!(config.reputation.accept_risky);
        assert_eq!(
            config.probe.nameservers,
            vec![
                "8.8.8.8:53".parse::<SocketAddr>().unwrap(),
                "9.9.9.9:5353".parse::<SocketAddr>().unwrap(),
            ]
        );
        assert_eq!(config.secrets.transport_api_key.as_deref(), Some("secret"));
        assert_eq!(config.secrets.reputation_api_key, None);
    }

    #[test]
    fn test_invalid_env() {
        let mut config = Mailrun::default();
        let err = config
            .apply_env(env(&[("MAILRUN_NAMESERVERS", "dns.google")]))
            .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidEnv { var: "MAILRUN_NAMESERVERS", .. }));

        let err = config
            .apply_env(env(&[("MAILRUN_DOMAIN_POLICY", "loose")]))
            .unwrap_err();
        assert!(err.to_string().contains("MAILRUN_DOMAIN_POLICY"));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Mailrun::default();
        config.dispatch.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Mailrun::default();
        config.dispatch.rate_per_second = 0;
        assert!(config.validate().unwrap_err().to_string().contains("rate"));
    }

    #[test]
    fn test_config_env_must_exist() {
        let result = find_config_file(env(&[(CONFIG_ENV, "/nonexistent/mailrun.config.ron")]));
        assert!(matches!(result, Err(ConfigError::MissingFile(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailrun.config.ron");
        std::fs::write(&path, "(dispatch: (dry_run: true))").unwrap();

        let found = find_config_file(env(&[(CONFIG_ENV, path.to_str().unwrap())]))
            .unwrap()
            .unwrap();
        let config = Mailrun::from_file(&found).unwrap();
        assert!(config.dispatch.dry_run);

        std::fs::write(&path, "(dispatch: (batch_size: \"many\"))").unwrap();
        assert!(matches!(
            Mailrun::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_parse_nameserver() {
        assert_eq!(
            parse_nameserver("1.1.1.1").unwrap(),
            "1.1.1.1:53".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_nameserver("[2606:4700::1111]:53").unwrap(),
            "[2606:4700::1111]:53".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_nameserver("localhost").is_err());
    }
}
