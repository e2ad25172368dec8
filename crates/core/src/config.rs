use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_API_BASE_URL: &str = "https://lawn-peak-api.onrender.com";
pub const DEFAULT_PLACES_BASE_URL: &str = "https://maps.googleapis.com/maps/api/place";
pub const REFERRAL_FEATURE_FLAG: &str = "ENABLE_REFERRAL_SYSTEM";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub address_lookup: AddressLookupConfig,
    pub booking: BookingConfig,
    pub pricing: PricingConfig,
    pub referral: ReferralConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AddressLookupConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub country: String,
}

#[derive(Clone, Debug)]
pub struct BookingConfig {
    /// Booking page the payment processor returns to.
    pub return_url: String,
    pub snapshot_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct PricingConfig {
    /// Minor units; final prices are rounded to a multiple of this.
    pub rounding_unit: u64,
}

#[derive(Clone, Debug)]
pub struct ReferralConfig {
    pub enabled: bool,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub api_base_url: Option<String>,
    pub log_level: Option<String>,
    pub address_lookup_api_key: Option<String>,
    pub referral_enabled: Option<bool>,
    pub snapshot_dir: Option<PathBuf>,
    pub return_url: Option<String>,
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
            api: ApiConfig { base_url: DEFAULT_API_BASE_URL.to_string(), timeout_secs: 30 },
            address_lookup: AddressLookupConfig {
                enabled: false,
                base_url: DEFAULT_PLACES_BASE_URL.to_string(),
                api_key: None,
                country: "us".to_string(),
            },
            booking: BookingConfig {
                return_url: "https://lawnpeak.com/book".to_string(),
                snapshot_dir: PathBuf::from(".lawnpeak"),
            },
            pricing: PricingConfig { rounding_unit: 500 },
            referral: ReferralConfig { enabled: false },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("lawnpeak.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Address lookup is usable only when enabled and given a key.
    pub fn address_lookup_ready(&self) -> bool {
        self.address_lookup.enabled
            && self
                .address_lookup
                .api_key
                .as_ref()
                .is_some_and(|key| !key.expose_secret().trim().is_empty())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(api) = patch.api {
            if let Some(base_url) = api.base_url {
                self.api.base_url = base_url;
            }
            if let Some(timeout_secs) = api.timeout_secs {
                self.api.timeout_secs = timeout_secs;
            }
        }

        if let Some(lookup) = patch.address_lookup {
            if let Some(enabled) = lookup.enabled {
                self.address_lookup.enabled = enabled;
            }
            if let Some(base_url) = lookup.base_url {
                self.address_lookup.base_url = base_url;
            }
            if let Some(api_key) = lookup.api_key {
                self.address_lookup.api_key = Some(secret_value(api_key));
            }
            if let Some(country) = lookup.country {
                self.address_lookup.country = country;
            }
        }

        if let Some(booking) = patch.booking {
            if let Some(return_url) = booking.return_url {
                self.booking.return_url = return_url;
            }
            if let Some(snapshot_dir) = booking.snapshot_dir {
                self.booking.snapshot_dir = snapshot_dir;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(rounding_unit) = pricing.rounding_unit {
                self.pricing.rounding_unit = rounding_unit;
            }
        }

        if let Some(referral) = patch.referral {
            if let Some(enabled) = referral.enabled {
                self.referral.enabled = enabled;
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
        if let Some(value) = read_env("LAWNPEAK_API_BASE_URL") {
            self.api.base_url = value;
        }
        if let Some(value) = read_env("LAWNPEAK_API_TIMEOUT_SECS") {
            self.api.timeout_secs = parse_u64("LAWNPEAK_API_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LAWNPEAK_ADDRESS_LOOKUP_ENABLED") {
            self.address_lookup.enabled = parse_bool("LAWNPEAK_ADDRESS_LOOKUP_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LAWNPEAK_ADDRESS_LOOKUP_BASE_URL") {
            self.address_lookup.base_url = value;
        }
        if let Some(value) = read_env("LAWNPEAK_ADDRESS_LOOKUP_API_KEY") {
            self.address_lookup.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LAWNPEAK_ADDRESS_LOOKUP_COUNTRY") {
            self.address_lookup.country = value;
        }

        if let Some(value) = read_env("LAWNPEAK_BOOKING_RETURN_URL") {
            self.booking.return_url = value;
        }
        if let Some(value) = read_env("LAWNPEAK_BOOKING_SNAPSHOT_DIR") {
            self.booking.snapshot_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("LAWNPEAK_PRICING_ROUNDING_UNIT") {
            self.pricing.rounding_unit = parse_u64("LAWNPEAK_PRICING_ROUNDING_UNIT", &value)?;
        }

        // The deployment-wide flag is honoured; the prefixed variable wins.
        if let Some(value) = read_env(REFERRAL_FEATURE_FLAG) {
            self.referral.enabled = value.trim().eq_ignore_ascii_case("true");
        }
        if let Some(value) = read_env("LAWNPEAK_REFERRAL_ENABLED") {
            self.referral.enabled = parse_bool("LAWNPEAK_REFERRAL_ENABLED", &value)?;
        }

        let log_level =
            read_env("LAWNPEAK_LOGGING_LEVEL").or_else(|| read_env("LAWNPEAK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LAWNPEAK_LOGGING_FORMAT").or_else(|| read_env("LAWNPEAK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(api_base_url) = overrides.api_base_url {
            self.api.base_url = api_base_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(api_key) = overrides.address_lookup_api_key {
            self.address_lookup.api_key = Some(secret_value(api_key));
            self.address_lookup.enabled = true;
        }
        if let Some(enabled) = overrides.referral_enabled {
            self.referral.enabled = enabled;
        }
        if let Some(snapshot_dir) = overrides.snapshot_dir {
            self.booking.snapshot_dir = snapshot_dir;
        }
        if let Some(return_url) = overrides.return_url {
            self.booking.return_url = return_url;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api(&self.api)?;
        validate_address_lookup(&self.address_lookup)?;
        validate_booking(&self.booking)?;
        validate_pricing(&self.pricing)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("lawnpeak.toml"), PathBuf::from("config/lawnpeak.toml")]
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn validate_api(api: &ApiConfig) -> Result<(), ConfigError> {
    if !is_http_url(api.base_url.trim()) {
        return Err(ConfigError::Validation(
            "api.base_url must start with http:// or https://".to_string(),
        ));
    }

    if api.timeout_secs == 0 || api.timeout_secs > 300 {
        return Err(ConfigError::Validation("api.timeout_secs must be in range 1..=300".to_string()));
    }

    Ok(())
}

fn validate_address_lookup(lookup: &AddressLookupConfig) -> Result<(), ConfigError> {
    if !lookup.enabled {
        return Ok(());
    }

    let missing = lookup
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(
            "address_lookup.api_key is required when address_lookup.enabled is true".to_string(),
        ));
    }

    if !is_http_url(lookup.base_url.trim()) {
        return Err(ConfigError::Validation(
            "address_lookup.base_url must start with http:// or https://".to_string(),
        ));
    }

    let country = lookup.country.trim();
    if country.len() != 2 || !country.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ConfigError::Validation(
            "address_lookup.country must be a two-letter country code".to_string(),
        ));
    }

    Ok(())
}

fn validate_booking(booking: &BookingConfig) -> Result<(), ConfigError> {
    if !is_http_url(booking.return_url.trim()) {
        return Err(ConfigError::Validation(
            "booking.return_url must start with http:// or https://".to_string(),
        ));
    }

    if booking.snapshot_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("booking.snapshot_dir must not be empty".to_string()));
    }

    Ok(())
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.rounding_unit == 0 {
        return Err(ConfigError::Validation(
            "pricing.rounding_unit must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| {
        ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    api: Option<ApiPatch>,
    address_lookup: Option<AddressLookupPatch>,
    booking: Option<BookingPatch>,
    pricing: Option<PricingPatch>,
    referral: Option<ReferralPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiPatch {
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressLookupPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    api_key: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct BookingPatch {
    return_url: Option<String>,
    snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    rounding_unit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ReferralPatch {
    enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_point_at_production_backend() -> Result<(), String> {
        let config = AppConfig::default();
        ensure(
            config.api.base_url == "https://lawn-peak-api.onrender.com",
            "default api base url should be the booking backend",
        )?;
        ensure(config.pricing.rounding_unit == 500, "prices round to five dollars by default")?;
        ensure(!config.referral.enabled, "referrals are off unless the flag is set")?;
        ensure(!config.address_lookup_ready(), "address lookup needs a key")?;
        config.validate().map_err(|err| err.to_string())
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_PLACES_KEY", "places-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("lawnpeak.toml");
            fs::write(
                &path,
                r#"
[address_lookup]
enabled = true
api_key = "${TEST_PLACES_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config
                    .address_lookup
                    .api_key
                    .as_ref()
                    .is_some_and(|key| key.expose_secret() == "places-from-env"),
                "places key should be loaded from environment",
            )?;
            ensure(config.address_lookup_ready(), "lookup should be ready with a key")?;
            Ok(())
        })();

        clear_vars(&["TEST_PLACES_KEY"]);
        result
    }

    #[test]
    fn referral_feature_flag_alias_is_honoured() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("ENABLE_REFERRAL_SYSTEM", "True");
        env::set_var("LAWNPEAK_LOG_LEVEL", "warn");
        env::set_var("LAWNPEAK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.referral.enabled, "legacy referral flag should enable referrals")?;
            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;

            env::set_var("LAWNPEAK_REFERRAL_ENABLED", "false");
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(!config.referral.enabled, "prefixed variable should win over legacy flag")?;
            Ok(())
        })();

        clear_vars(&[
            "ENABLE_REFERRAL_SYSTEM",
            "LAWNPEAK_REFERRAL_ENABLED",
            "LAWNPEAK_LOG_LEVEL",
            "LAWNPEAK_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAWNPEAK_API_BASE_URL", "https://from-env.example");
        env::set_var("LAWNPEAK_BOOKING_SNAPSHOT_DIR", "/tmp/from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("lawnpeak.toml");
            fs::write(
                &path,
                r#"
[api]
base_url = "https://from-file.example"
timeout_secs = 10

[booking]
return_url = "https://from-file.example/book"

[pricing]
rounding_unit = 100

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    api_base_url: Some("https://from-override.example".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.api.base_url == "https://from-override.example",
                "override api url should win",
            )?;
            ensure(config.api.timeout_secs == 10, "file timeout should replace default")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.booking.snapshot_dir == PathBuf::from("/tmp/from-env"),
                "env snapshot dir should win over defaults",
            )?;
            ensure(
                config.booking.return_url == "https://from-file.example/book",
                "file return url should replace default",
            )?;
            ensure(config.pricing.rounding_unit == 100, "file rounding unit should apply")?;
            Ok(())
        })();

        clear_vars(&["LAWNPEAK_API_BASE_URL", "LAWNPEAK_BOOKING_SNAPSHOT_DIR"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAWNPEAK_ADDRESS_LOOKUP_ENABLED", "true");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("address_lookup.api_key")),
                "missing places key should be reported",
            )?;
            Ok(())
        })();

        clear_vars(&["LAWNPEAK_ADDRESS_LOOKUP_ENABLED"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LAWNPEAK_PRICING_ROUNDING_UNIT", "five");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "LAWNPEAK_PRICING_ROUNDING_UNIT"),
                "invalid rounding unit should name the variable",
            )?;
            Ok(())
        })();

        clear_vars(&["LAWNPEAK_PRICING_ROUNDING_UNIT"]);
        result
    }

    #[test]
    fn missing_required_file_is_reported() {
        let error = AppConfig::load(LoadOptions {
            config_path: Some(PathBuf::from("/nonexistent/lawnpeak.toml")),
            require_file: true,
            ..LoadOptions::default()
        });
        assert!(matches!(error, Err(ConfigError::MissingConfigFile(_))));
    }
}
