use std::sync::Arc;

use anyhow::Result;

use toolrun_core::api::{ClientConfig, Engine};

use crate::http::HttpEngine;

pub fn build_engine(cfg: &ClientConfig) -> Result<Arc<dyn Engine>> {
    tracing::debug!(target: "toolrun.http", base_url = %cfg.engine.base_url, "building http engine");
    Ok(Arc::new(HttpEngine::new(&cfg.engine)?))
}
