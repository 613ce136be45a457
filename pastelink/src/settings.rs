use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs::read_to_string;

pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Settings {
    pub ice_servers: Vec<String>,
    pub log_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ice_servers: vec![DEFAULT_ICE_SERVER.to_owned()],
            log_dir: "./".to_owned(),
        }
    }
}

impl Settings {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

pub async fn load(path: &str) -> Result<Settings> {
    let text = read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path))?;
    Settings::parse(&text).with_context(|| format!("failed to parse {}", path))
}
