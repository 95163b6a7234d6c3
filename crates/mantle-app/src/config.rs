// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::Path;
use std::time::Duration;

use mantle_present::PresentConfig;
use serde::Deserialize;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "mantle.toml";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    /// `Wait` control flow when true, `Poll` when false.
    pub vsync: bool,
    pub unfocused: UnfocusedPolicy,
    pub unfocused_fps: u32,
    /// Bound on every fence wait and acquire; 0 waits forever.
    pub fence_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnfocusedPolicy {
    None,
    #[default]
    Throttle,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync: true,
            unfocused: UnfocusedPolicy::Throttle,
            unfocused_fps: 30,
            fence_timeout_ms: 0,
        }
    }
}

impl RenderCfg {
    pub fn present_config(&self) -> PresentConfig {
        let timeout = (self.fence_timeout_ms > 0).then(|| Duration::from_millis(self.fence_timeout_ms));
        PresentConfig::with_timeout(timeout)
    }
}

/// Missing or malformed files fall back to defaults.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => match toml::from_str::<AppCfg>(&s) {
            Ok(cfg) => {
                info!("config loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("ignoring malformed {}: {e}", path.display());
                AppCfg::default()
            }
        },
        Err(_) => AppCfg::default(),
    }
}
