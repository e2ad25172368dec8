use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use lawnpeak_core::config::{AppConfig, LoadOptions, REFERRAL_FEATURE_FLAG};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let api_key = match config.address_lookup.api_key.as_ref() {
        Some(key) => redact_key(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    let fields: Vec<(&str, String, &[&str])> = vec![
        ("api.base_url", config.api.base_url.clone(), &["LAWNPEAK_API_BASE_URL"]),
        ("api.timeout_secs", config.api.timeout_secs.to_string(), &["LAWNPEAK_API_TIMEOUT_SECS"]),
        (
            "address_lookup.enabled",
            config.address_lookup.enabled.to_string(),
            &["LAWNPEAK_ADDRESS_LOOKUP_ENABLED"],
        ),
        (
            "address_lookup.base_url",
            config.address_lookup.base_url.clone(),
            &["LAWNPEAK_ADDRESS_LOOKUP_BASE_URL"],
        ),
        ("address_lookup.api_key", api_key, &["LAWNPEAK_ADDRESS_LOOKUP_API_KEY"]),
        (
            "address_lookup.country",
            config.address_lookup.country.clone(),
            &["LAWNPEAK_ADDRESS_LOOKUP_COUNTRY"],
        ),
        ("booking.return_url", config.booking.return_url.clone(), &["LAWNPEAK_BOOKING_RETURN_URL"]),
        (
            "booking.snapshot_dir",
            config.booking.snapshot_dir.display().to_string(),
            &["LAWNPEAK_BOOKING_SNAPSHOT_DIR"],
        ),
        (
            "pricing.rounding_unit",
            config.pricing.rounding_unit.to_string(),
            &["LAWNPEAK_PRICING_ROUNDING_UNIT"],
        ),
        (
            "referral.enabled",
            config.referral.enabled.to_string(),
            &["LAWNPEAK_REFERRAL_ENABLED", REFERRAL_FEATURE_FLAG],
        ),
        (
            "logging.level",
            config.logging.level.clone(),
            &["LAWNPEAK_LOGGING_LEVEL", "LAWNPEAK_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LAWNPEAK_LOGGING_FORMAT", "LAWNPEAK_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(fields.into_iter().map(|(key, value, env_keys)| {
        let source = field_source(
            key,
            env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        render_line(key, &value, source)
    }));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("lawnpeak.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/lawnpeak.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters of a provider key; short keys are hidden entirely.
fn redact_key(key: &str) -> String {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    match trimmed.get(..4) {
        Some(prefix) if trimmed.len() > 8 => format!("{prefix}***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_key};

    #[test]
    fn redaction_never_prints_the_full_key() {
        assert_eq!(redact_key("AIzaSyExampleKey123"), "AIza***");
        assert_eq!(redact_key("short"), "<redacted>");
        assert_eq!(redact_key("  "), "<empty>");
    }

    #[test]
    fn nested_key_lookup_walks_tables() {
        let doc: toml::Value =
            "[pricing]\nrounding_unit = 100\n".parse().expect("valid toml document");
        assert!(contains_path(&doc, "pricing.rounding_unit"));
        assert!(!contains_path(&doc, "pricing.rounding"));
        assert!(!contains_path(&doc, "api.base_url"));
    }
}
