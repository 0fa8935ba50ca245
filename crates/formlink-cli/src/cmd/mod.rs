pub mod check;
pub mod run;

use anyhow::Context;
use formlink_core::EngineConfig;
use std::path::Path;

/// Engine configuration from `path`, or defaults when none is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p)
            .with_context(|| format!("failed to load config {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}
