use std::path::Path;

use anyhow::Context;

use super::types::ClientConfig;

pub const DEFAULT_CONFIG_FILE: &str = "toolrun.toml";

pub fn load_default() -> anyhow::Result<ClientConfig> {
    let cfg = if Path::new(DEFAULT_CONFIG_FILE).exists() {
        read_file(Path::new(DEFAULT_CONFIG_FILE))?
    } else {
        ClientConfig::default()
    };
    Ok(apply_env(cfg))
}

pub fn load_from(path: impl AsRef<Path>) -> anyhow::Result<ClientConfig> {
    let cfg = read_file(path.as_ref())?;
    Ok(apply_env(cfg))
}

fn read_file(path: &Path) -> anyhow::Result<ClientConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str::<ClientConfig>(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn apply_env(mut cfg: ClientConfig) -> ClientConfig {
    if let Ok(v) = std::env::var("TOOLRUN_ENGINE_URL") {
        if !v.trim().is_empty() {
            cfg.engine.base_url = v;
        }
    }
    if let Ok(v) = std::env::var("TOOLRUN_LOG") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    cfg
}
