//! Frame loop settings.
use crate::vk;
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

/// Settings that can be changed e.g. from a configuration file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Forces v-sync for the swapchain (FIFO presentation).
    pub vsync: bool,
    /// Submits the scene's overlay command buffer, if it provides one.
    pub overlay: bool,
    /// Maximum time to wait on a fence before the device is considered stalled.
    /// `0` means no timeout.
    pub fence_timeout_ms: u64,
    /// Maximum time to wait for a swapchain image. `0` means no timeout.
    pub acquire_timeout_ms: u64,
    pub clear_color: [f32; 4],
    pub clear_depth: f32,
    pub clear_stencil: u32,
    /// Initial extent of the output surface.
    pub extent: [u32; 2],
    /// Multiplier for speeding up (or slowing down) the animation timer.
    pub timer_speed: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            vsync: false,
            overlay: true,
            fence_timeout_ms: 0,
            acquire_timeout_ms: 0,
            clear_color: [0.025, 0.025, 0.025, 1.0],
            clear_depth: 1.0,
            clear_stencil: 0,
            extent: [1280, 720],
            timer_speed: 0.25,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

fn timeout_ns(ms: u64) -> u64 {
    if ms == 0 {
        u64::MAX
    } else {
        u64::try_from(Duration::from_millis(ms).as_nanos()).unwrap_or(u64::MAX)
    }
}

impl Settings {
    /// Parses settings from a TOML document. Missing keys take their default value.
    pub fn from_toml_str(source: &str) -> Result<Settings, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Loads settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn fence_timeout_ns(&self) -> u64 {
        timeout_ns(self.fence_timeout_ms)
    }

    pub fn acquire_timeout_ns(&self) -> u64 {
        timeout_ns(self.acquire_timeout_ms)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent[0],
            height: self.extent[1],
        }
    }

    /// Clear values for a render pass with one color and one depth-stencil attachment.
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        vec![
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: self.clear_depth,
                    stencil: self.clear_stencil,
                },
            },
        ]
    }
}
