use std::collections::HashMap;

use anyhow::Result;

use crate::artifacts::CompatPolicy;

/// Process-wide immutable configuration, loaded once at startup and passed
/// down as an `Arc<Config>`. Never re-read from the environment inside a loop.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub web_bind: String,
    pub web_port: u16,
    pub storage_root: String,

    pub claim_lease_seconds: i64,
    pub heartbeat_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,

    pub artifact_contract_version: String,
    pub artifact_compat_policy: CompatPolicy,

    pub telegram_webhook_secret: String,
}

fn parse_dotenv() -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(".env") else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    map
}

fn get(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key).ok().or_else(|| dotenv.get(key).cloned())
}

fn get_str(key: &str, dotenv: &HashMap<String, String>, default: &str) -> String {
    get(key, dotenv).unwrap_or_else(|| default.to_string())
}

fn get_i64(key: &str, dotenv: &HashMap<String, String>, default: i64) -> i64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u64(key: &str, dotenv: &HashMap<String, String>, default: u64) -> u64 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_u16(key: &str, dotenv: &HashMap<String, String>, default: u16) -> u16 {
    get(key, dotenv).and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let dotenv = parse_dotenv();

        let policy_str = get_str("ARTIFACT_COMPAT_POLICY", &dotenv, "strict");
        let artifact_compat_policy = CompatPolicy::parse(&policy_str)
            .map_err(|e| anyhow::anyhow!("invalid ARTIFACT_COMPAT_POLICY: {e}"))?;

        Ok(Config {
            database_url: get_str(
                "DATABASE_URL",
                &dotenv,
                "postgres://localhost/pipeline",
            ),
            web_bind: get_str("WEB_BIND", &dotenv, "127.0.0.1"),
            web_port: get_u16("WEB_PORT", &dotenv, 8080),
            storage_root: get_str("STORAGE_ROOT", &dotenv, "store"),
            claim_lease_seconds: get_i64("CLAIM_LEASE_SECONDS", &dotenv, 30),
            heartbeat_interval_ms: get_u64("HEARTBEAT_INTERVAL_MS", &dotenv, 10_000),
            poll_interval_ms: get_u64("POLL_INTERVAL_MS", &dotenv, 200),
            idle_backoff_ms: get_u64("IDLE_BACKOFF_MS", &dotenv, 1_000),
            error_backoff_ms: get_u64("ERROR_BACKOFF_MS", &dotenv, 2_000),
            artifact_contract_version: get_str("ARTIFACT_CONTRACT_VERSION", &dotenv, "v1"),
            artifact_compat_policy,
            telegram_webhook_secret: get_str("TELEGRAM_WEBHOOK_SECRET", &dotenv, ""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotenv_parsing_skips_comments_and_blank_lines() {
        let contents = "# comment\n\nFOO=bar\nBAZ=qux\n";
        let mut map = HashMap::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((k, v)) = line.split_once('=') {
                map.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        assert_eq!(map.get("FOO"), Some(&"bar".to_string()));
        assert_eq!(map.get("BAZ"), Some(&"qux".to_string()));
    }
}
