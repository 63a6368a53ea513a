use std::time::Duration;

use uuid::Uuid;

pub const DEFAULT_FIRST_REPLY_WINDOW: Duration = Duration::from_millis(1500);

// read once per session, never written by the tunnel core
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub user_id: Uuid,
    pub fallback_proxy: Option<String>,
    pub decoy_site: Option<String>,
    // how long the direct attempt may stay silent before the fallback runs
    pub first_reply_window: Duration,
    // skip the SOCKS5 CONNECT exchange; the upstream must know the target
    pub socks5_passthrough: bool,
}

impl SessionConfig {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            fallback_proxy: None,
            decoy_site: None,
            first_reply_window: DEFAULT_FIRST_REPLY_WINDOW,
            socks5_passthrough: false,
        }
    }
}

#[cfg(target_arch = "wasm32")]
mod wasm {
    use super::*;
    use worker::Env;

    impl SessionConfig {
        pub fn from_env(env: &Env) -> worker::Result<Self> {
            let raw_id = env.var("USER_ID")?.to_string();
            let user_id = Uuid::parse_str(raw_id.trim())
                .map_err(|e| worker::Error::RustError(format!("invalid USER_ID: {e}")))?;

            let first_reply_window = var(env, "FIRST_REPLY_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_FIRST_REPLY_WINDOW);

            let socks5_passthrough = var(env, "SOCKS5_PASSTHROUGH")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);

            Ok(Self {
                user_id,
                fallback_proxy: var(env, "FALLBACK_PROXY"),
                decoy_site: var(env, "DECOY_SITE"),
                first_reply_window,
                socks5_passthrough,
            })
        }
    }

    fn var(env: &Env, name: &str) -> Option<String> {
        env.var(name)
            .ok()
            .map(|v| v.to_string())
            .filter(|v| !v.trim().is_empty())
    }
}
