use tracing::info;

// ---------------------------------------------------------------------------
// Configuration — loaded from environment variables (§6.3)
// ---------------------------------------------------------------------------

/// Complete server configuration loaded at startup.
///
/// Every field can be set via an environment variable prefixed with
/// `SIGNALHUB_`. Per §6.3 this is deliberately small: the hub has no media
/// plane, no auth, and no persistence to configure — unlike its teacher's
/// `Config` (TLS/TURN/JWT/UDP-port-range knobs), none of that applies here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the HTTP listener to.
    pub bind_addr: String,
    /// CORS allow-list, comma-separated, or `"*"` for permissive (default).
    pub allowed_origins: String,
    /// Log level passed to `tracing_subscriber::EnvFilter` as a fallback.
    pub log_level: String,
    /// Default/implicit page size for chat-history tails (§4.5, §6.1).
    pub chat_history_page_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Best-effort `.env` loading via `dotenvy`, exactly as the teacher's
    /// `Config::from_env` does.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let port = env_or("SIGNALHUB_PORT", "3000");
        let bind_addr = env_or("SIGNALHUB_BIND_ADDR", &format!("0.0.0.0:{port}"));
        let allowed_origins = env_or("SIGNALHUB_ALLOWED_ORIGINS", "*");
        let log_level = env_or("SIGNALHUB_LOG_LEVEL", "info");
        let chat_history_page_size = env_or("SIGNALHUB_CHAT_HISTORY_PAGE_SIZE", "50")
            .parse::<usize>()
            .unwrap_or(50);

        let config = Config {
            bind_addr,
            allowed_origins,
            log_level,
            chat_history_page_size,
        };
        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!("──── signalhub configuration ────");
        info!("  bind_addr            : {}", self.bind_addr);
        info!(
            "  cors_origins         : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("  log_level            : {}", self.log_level);
        info!("  chat_history_page    : {}", self.chat_history_page_size);
        info!("──────────────────────────────────");
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// `Config::from_env()` reads process-global env vars, and `cargo test`
    /// runs `#[test]` fns in parallel threads within one binary — without
    /// this guard, the two tests below race on `SIGNALHUB_PORT` et al. and
    /// can observe each other's mutations mid-`from_env()`.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_GUARD.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[test]
    fn defaults_without_env() {
        let _guard = lock_env();
        std::env::remove_var("SIGNALHUB_PORT");
        std::env::remove_var("SIGNALHUB_BIND_ADDR");
        std::env::remove_var("SIGNALHUB_ALLOWED_ORIGINS");
        std::env::remove_var("SIGNALHUB_CHAT_HISTORY_PAGE_SIZE");

        let cfg = Config::from_env();
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.allowed_origins, "*");
        assert_eq!(cfg.chat_history_page_size, 50);
    }

    #[test]
    fn port_env_var_overrides_bind_addr() {
        let _guard = lock_env();
        std::env::set_var("SIGNALHUB_PORT", "4001");
        std::env::remove_var("SIGNALHUB_BIND_ADDR");
        let cfg = Config::from_env();
        assert_eq!(cfg.bind_addr, "0.0.0.0:4001");
        std::env::remove_var("SIGNALHUB_PORT");
    }
}
