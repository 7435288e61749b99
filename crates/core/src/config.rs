use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub tenant_api: TenantApiConfig,
    pub llm: LlmConfig,
    pub server: ServerConfig,
    pub sweep: SweepConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TenantApiConfig {
    pub base_url: String,
    /// Shared secret attached to every tenant API call. Supplied
    /// out-of-band, never logged.
    pub shared_secret: SecretString,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub purge_horizon_hours: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub tenant_api_base_url: Option<String>,
    pub tenant_api_shared_secret: Option<String>,
    pub log_level: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://loanline.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            tenant_api: TenantApiConfig {
                base_url: "http://localhost:9400".to_string(),
                shared_secret: String::new().into(),
                timeout_secs: 30,
            },
            llm: LlmConfig {
                base_url: Some("http://localhost:11434".to_string()),
                api_key: None,
                model: "llama3.1".to_string(),
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            sweep: SweepConfig { interval_secs: 3600, purge_horizon_hours: 24 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    tenant_api: Option<TenantApiPatch>,
    llm: Option<LlmPatch>,
    server: Option<ServerPatch>,
    sweep: Option<SweepPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TenantApiPatch {
    base_url: Option<String>,
    shared_secret: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SweepPatch {
    interval_secs: Option<u64>,
    purge_horizon_hours: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("loanline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(tenant_api) = patch.tenant_api {
            if let Some(base_url) = tenant_api.base_url {
                self.tenant_api.base_url = base_url;
            }
            if let Some(shared_secret) = tenant_api.shared_secret {
                self.tenant_api.shared_secret = shared_secret.into();
            }
            if let Some(timeout_secs) = tenant_api.timeout_secs {
                self.tenant_api.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(api_key.into());
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(sweep) = patch.sweep {
            if let Some(interval_secs) = sweep.interval_secs {
                self.sweep.interval_secs = interval_secs;
            }
            if let Some(purge_horizon_hours) = sweep.purge_horizon_hours {
                self.sweep.purge_horizon_hours = purge_horizon_hours;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LOANLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LOANLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LOANLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LOANLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LOANLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LOANLINE_TENANT_API_BASE_URL") {
            self.tenant_api.base_url = value;
        }
        if let Some(value) = read_env("LOANLINE_TENANT_API_SHARED_SECRET") {
            self.tenant_api.shared_secret = value.into();
        }
        if let Some(value) = read_env("LOANLINE_TENANT_API_TIMEOUT_SECS") {
            self.tenant_api.timeout_secs = parse_u64("LOANLINE_TENANT_API_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LOANLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LOANLINE_LLM_API_KEY") {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("LOANLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LOANLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LOANLINE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LOANLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LOANLINE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("LOANLINE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        if let Some(value) = read_env("LOANLINE_SWEEP_INTERVAL_SECS") {
            self.sweep.interval_secs = parse_u64("LOANLINE_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LOANLINE_SWEEP_PURGE_HORIZON_HOURS") {
            self.sweep.purge_horizon_hours =
                parse_u64("LOANLINE_SWEEP_PURGE_HORIZON_HOURS", &value)?;
        }

        if let Some(value) = read_env("LOANLINE_LOGGING_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("LOANLINE_LOGGING_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(base_url) = overrides.tenant_api_base_url {
            self.tenant_api.base_url = base_url;
        }
        if let Some(shared_secret) = overrides.tenant_api_shared_secret {
            self.tenant_api.shared_secret = shared_secret.into();
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if !self.tenant_api.base_url.starts_with("http://")
            && !self.tenant_api.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(
                "tenant_api.base_url must be an http(s) URL".to_string(),
            ));
        }
        if self.tenant_api.shared_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation(
                "tenant_api.shared_secret must be supplied (file, env, or override)".to_string(),
            ));
        }
        if self.sweep.interval_secs < 60 {
            return Err(ConfigError::Validation(
                "sweep.interval_secs must be at least 60".to_string(),
            ));
        }
        match self.logging.level.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            _ => Err(ConfigError::Validation(
                "logging.level must be one of trace|debug|info|warn|error".to_string(),
            )),
        }
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("loanline.toml"), PathBuf::from("config/loanline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};

    fn options_with_secret() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                tenant_api_shared_secret: Some("test-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[test]
    fn defaults_fail_validation_without_a_shared_secret() {
        let result = AppConfig::load(LoadOptions::default());
        let message = result.err().expect("missing secret should fail").to_string();
        assert!(message.contains("shared_secret"));
    }

    #[test]
    fn overrides_satisfy_validation() {
        let config = AppConfig::load(options_with_secret()).expect("load");
        assert_eq!(config.tenant_api.shared_secret.expose_secret(), "test-secret");
        assert_eq!(config.sweep.purge_horizon_hours, 24);
        assert_eq!(config.logging.format, LogFormat::Compact);
    }

    #[test]
    fn file_patch_layers_under_overrides() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[database]\nurl = \"sqlite::memory:\"\n\n[tenant_api]\nbase_url = \"https://api.coop.example\"\nshared_secret = \"file-secret\"\n\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n"
        )
        .expect("write");

        let config = AppConfig::load(LoadOptions {
            config_path: Some(file.path().to_path_buf()),
            require_file: true,
            overrides: ConfigOverrides {
                database_url: Some("sqlite://override.db".to_string()),
                ..ConfigOverrides::default()
            },
        })
        .expect("load");

        // Programmatic override wins over the file.
        assert_eq!(config.database.url, "sqlite://override.db");
        assert_eq!(config.tenant_api.base_url, "https://api.coop.example");
        assert_eq!(config.tenant_api.shared_secret.expose_secret(), "file-secret");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_required_file_is_an_error() {
        let result = AppConfig::load(LoadOptions {
            config_path: Some("does/not/exist.toml".into()),
            require_file: true,
            overrides: ConfigOverrides::default(),
        });
        assert!(result.is_err());
    }

    #[test]
    fn invalid_tenant_api_url_fails_validation() {
        let mut options = options_with_secret();
        options.overrides.tenant_api_base_url = Some("ftp://nope".to_string());
        let message = AppConfig::load(options).err().expect("invalid url").to_string();
        assert!(message.contains("http(s)"));
    }

    #[test]
    fn debug_output_does_not_leak_the_shared_secret() {
        let config = AppConfig::load(options_with_secret()).expect("load");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("test-secret"));
    }
}
