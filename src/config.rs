use anyhow::Context;
use chrono::{Datelike, Utc};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub renderer_url: Option<String>,
    pub max_connections: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to the school Postgres instance")?;

        let renderer_url = lookup("BOLETA_RENDERER_URL").filter(|value| !value.trim().is_empty());

        let max_connections = match lookup("BOLETA_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse()
                .with_context(|| format!("BOLETA_MAX_CONNECTIONS is not a number: {value}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            renderer_url,
            max_connections,
        })
    }
}

/// School cycles are labelled by calendar year.
pub fn current_cycle() -> String {
    Utc::now().year().to_string()
}
