// Frame engine - Vulkan device bring-up and per-frame lifecycle
//
// backend/   - GPU objects behind the InstanceApi/DeviceApi seam
// renderer   - owns the whole stack, drives acquire -> record -> submit -> present
// config     - config.toml loading and hot reload
// error      - error taxonomy

pub mod backend;
pub mod config;
pub mod error;
pub mod renderer;

pub use config::{Config, ConfigWatcher};
pub use error::{FrameError, InitError, RecordingError};
pub use renderer::{Renderer, RendererSettings};
