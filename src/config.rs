// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// This module handles loading and parsing configuration from config.toml.
// Provides sensible defaults if config file is missing or has errors.
// ConfigWatcher picks up edits to the file while the app is running.

use anyhow::{Context, Result};
use glam::Vec3;
use log::LevelFilter;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use crate::renderer::RendererSettings;

pub const DEFAULT_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// RGB, alpha is always 1.0
    pub clear_color: [f32; 3],
    /// Absent means acquire waits forever
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [1.0, 0.0, 0.0],
            acquire_timeout_ms: None,
        }
    }
}

/// Debug settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path(DEFAULT_PATH).unwrap_or_else(|e| {
            log::warn!("Failed to load {}: {:#}. Using defaults.", DEFAULT_PATH, e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn clear_color(&self) -> Vec3 {
        Vec3::from_array(self.graphics.clear_color)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.graphics.acquire_timeout_ms.map(Duration::from_millis)
    }

    /// Get log level as a `log` filter
    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.debug.log_level).unwrap_or_else(|_| {
            log::warn!(
                "Unknown log level '{}', defaulting to info",
                self.debug.log_level
            );
            LevelFilter::Info
        })
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        RendererSettings {
            app_name: self.window.title.clone(),
            enable_validation: self.debug.validation_layers,
            acquire_timeout: self.acquire_timeout(),
        }
    }
}

// =============================================================================
// HOT RELOAD
// =============================================================================

/// Watches the config file and hands out a fresh `Config` after each edit.
///
/// The parent directory is watched rather than the file itself so editors
/// that save by rename are still picked up.
pub struct ConfigWatcher {
    path: PathBuf,
    events: Receiver<notify::Result<Event>>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, events) = mpsc::channel();
        let mut watcher =
            notify::recommended_watcher(tx).context("Failed to create file watcher")?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;

        log::debug!("Watching {:?} for config changes", path);
        Ok(Self {
            path,
            events,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drain pending file events; reload if any of them touched the config.
    ///
    /// Returns `None` when nothing changed or the new file does not parse
    /// (the previous config stays in effect).
    pub fn poll(&self) -> Option<Config> {
        let mut changed = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                Ok(event) => changed |= self.is_relevant(&event),
                Err(e) => log::warn!("Config watcher error: {}", e),
            }
        }

        if !changed || !self.path.exists() {
            return None;
        }

        match Config::load_from_path(&self.path) {
            Ok(config) => {
                log::info!("Reloaded configuration from {:?}", self.path);
                Some(config)
            }
            Err(e) => {
                log::warn!("Ignoring config change: {:#}", e);
                None
            }
        }
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        let name = self.path.file_name();
        event.paths.iter().any(|p| p.file_name() == name)
    }
}
