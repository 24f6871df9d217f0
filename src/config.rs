use crate::model::RelaySettings;

pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

pub fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Which attachment sources exist in this process. Resolved once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_local_file_access: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub db_path: String,
    pub capabilities: Capabilities,
    pub default_delay_ms: u64,
    pub accept_invalid_certs: bool,
    pub max_upload_mb: usize,
    pub seed_relay: RelaySettings,
}

impl Config {
    pub fn load() -> Self {
        Self {
            server_host: env_or("MAILMERGE_SERVER_HOST", "127.0.0.1"),
            server_port: env_parse("MAILMERGE_SERVER_PORT", 8080),
            db_path: env_or("MAILMERGE_DB_PATH", "mailmerge.db"),
            capabilities: Capabilities {
                has_local_file_access: env_parse("MAILMERGE_LOCAL_FILES", true),
            },
            default_delay_ms: env_parse("MAILMERGE_DEFAULT_DELAY_MS", 1000),
            accept_invalid_certs: env_parse("MAILMERGE_ACCEPT_INVALID_CERTS", false),
            max_upload_mb: env_parse("MAILMERGE_MAX_UPLOAD_MB", 25),
            seed_relay: RelaySettings {
                host: env_or("MAILMERGE_SMTP_HOST", ""),
                port: env_parse("MAILMERGE_SMTP_PORT", 587),
                user: env_or("MAILMERGE_SMTP_USER", ""),
                pass: env_or("MAILMERGE_SMTP_PASS", ""),
                from_name: env_or("MAILMERGE_SMTP_FROM_NAME", ""),
                from_email: env_or("MAILMERGE_SMTP_FROM_EMAIL", ""),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_helpers() {
        assert_eq!(env_or("MAILMERGE_TEST_NONEXISTENT_KEY", "fallback"), "fallback");
        assert_eq!(env_parse::<u16>("MAILMERGE_TEST_NONEXISTENT_KEY", 42), 42);
        assert!(env_parse::<bool>("MAILMERGE_TEST_NONEXISTENT_KEY", true));
    }

    #[test]
    fn test_load_defaults() {
        for key in [
            "MAILMERGE_SERVER_HOST",
            "MAILMERGE_SERVER_PORT",
            "MAILMERGE_DB_PATH",
            "MAILMERGE_LOCAL_FILES",
            "MAILMERGE_DEFAULT_DELAY_MS",
            "MAILMERGE_ACCEPT_INVALID_CERTS",
            "MAILMERGE_MAX_UPLOAD_MB",
            "MAILMERGE_SMTP_HOST",
            "MAILMERGE_SMTP_PORT",
        ] {
            assert!(std::env::var(key).is_err(), "{key} is set in the test environment");
        }

        let config = Config::load();
        assert_eq!(config.server_host, "127.0.0.1");
        assert_eq!(config.server_port, 8080);
        assert_eq!(config.db_path, "mailmerge.db");
        assert!(config.capabilities.has_local_file_access);
        assert_eq!(config.default_delay_ms, 1000);
        assert!(!config.accept_invalid_certs);
        assert_eq!(config.max_upload_mb, 25);
        assert_eq!(config.seed_relay, RelaySettings::default());
    }
}
