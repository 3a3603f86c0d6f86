use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

/// Process configuration, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub service_token: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = match var("EDUFLOW_PORT") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("EDUFLOW_PORT is not a port number: {}", raw))?,
            None => 8001,
        };

        Ok(Self {
            jwt_secret: var("EDUFLOW_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            db_path: PathBuf::from(var("EDUFLOW_DB_PATH").unwrap_or_else(|| "eduflow-realtime.db".into())),
            host: var("EDUFLOW_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            service_token: var("EDUFLOW_SERVICE_TOKEN").filter(|t| !t.is_empty()),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
