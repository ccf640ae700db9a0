use std::{env, path::PathBuf, time::Duration};

use crate::models::session::Portal;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base of every API path, e.g. `http://localhost:8000/api/v1`.
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub session_file: PathBuf,
    pub portal: Portal,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api/v1".into(),
            request_timeout: Duration::from_secs(30),
            session_file: PathBuf::from(".townhall-session.json"),
            portal: Portal::Citizen,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_base_url: env::var("TOWNHALL_API_URL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.api_base_url),
            request_timeout: Duration::from_secs(
                env::var("TOWNHALL_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "30".into())
                    .parse()?,
            ),
            session_file: env::var("TOWNHALL_SESSION_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.session_file),
            portal: env::var("TOWNHALL_PORTAL")
                .unwrap_or_else(|_| "citizen".into())
                .parse()?,
        })
    }

    pub fn with_base_url(mut self, api_base_url: impl Into<String>) -> Self {
        self.api_base_url = api_base_url.into();
        self
    }
}
