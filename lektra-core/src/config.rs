use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use tracing::debug;

use crate::types::{Color, FitMode, LayoutMode};

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_URL_REGEX: &str = r#"(https?://|www\.)[^\s<>()"']+"#;

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "lektra", "lektra")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub rendering: RenderingConfig,
    pub layout: LayoutConfig,
    pub zoom: ZoomConfig,
    pub behavior: BehaviorConfig,
    pub links: LinksConfig,
    pub markers: MarkersConfig,
    pub colors: ColorsConfig,
}

impl EngineConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("failed to parse config file {:?}", path))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    pub dpi: f32,
    pub dpr: f32,
    pub cache_pages: usize,
    pub text_cache_pages: usize,
    pub pdfium_library: Option<PathBuf>,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            dpi: 72.0,
            dpr: 1.0,
            cache_pages: 10,
            text_cache_pages: 32,
            pdfium_library: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub mode: LayoutMode,
    pub spacing: f32,
    pub initial_fit: FitMode,
    pub margin: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            mode: LayoutMode::Vertical,
            spacing: 10.0,
            initial_fit: FitMode::Width,
            margin: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub level: f32,
    pub factor: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            level: 1.0,
            factor: 1.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    pub undo_limit: usize,
    pub preload_pages: usize,
    pub invert_mode: bool,
    pub auto_reload: bool,
    pub recent_files: bool,
    pub num_recent_files: usize,
    pub page_history_limit: usize,
    pub scroll_debounce_ms: u64,
    pub hq_render_delay_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            undo_limit: 25,
            preload_pages: 2,
            invert_mode: false,
            auto_reload: true,
            recent_files: true,
            num_recent_files: 10,
            page_history_limit: 100,
            scroll_debounce_ms: 40,
            hq_render_delay_ms: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinksConfig {
    pub detect_urls: bool,
    pub url_regex: String,
}

impl Default for LinksConfig {
    fn default() -> Self {
        Self {
            detect_urls: false,
            url_regex: DEFAULT_URL_REGEX.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkersConfig {
    pub jump_marker: bool,
    pub jump_marker_timeout_ms: u64,
}

impl Default for MarkersConfig {
    fn default() -> Self {
        Self {
            jump_marker: true,
            jump_marker_timeout_ms: 1000,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorsConfig {
    #[serde_as(as = "DisplayFromStr")]
    pub highlight: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub selection: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub annot_rect: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub annot_popup: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub search_match: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub search_index: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub jump_marker: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub link_hint_bg: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub link_hint_fg: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub page_background: Color,
    #[serde_as(as = "DisplayFromStr")]
    pub page_foreground: Color,
}

impl Default for ColorsConfig {
    fn default() -> Self {
        Self {
            highlight: Color::rgba(1.0, 1.0, 0.0, 0.5),
            selection: Color::rgba(0.0, 0.0, 1.0, 0.3),
            annot_rect: Color::rgba(1.0, 0.0, 0.0, 0.5),
            annot_popup: Color::rgba(1.0, 1.0, 0.8, 0.8),
            search_match: Color::from_rgba8(0x55, 0x50, 0x00, 0x33),
            search_index: Color::from_rgba8(0x55, 0xFF, 0x00, 0x55),
            jump_marker: Color::from_rgba8(0xFF, 0x00, 0x00, 0xFF),
            link_hint_bg: Color::BLACK,
            link_hint_fg: Color::from_rgba8(0xEA, 0x3E, 0xE9, 0xFF),
            page_background: Color::WHITE,
            page_foreground: Color::BLACK,
        }
    }
}

impl ColorsConfig {
    /// Foreground/background tint pair, `None` when it is the identity.
    pub fn tint(&self) -> Option<(Color, Color)> {
        let identity = self.page_background.to_rgba8()[..3] == [255, 255, 255]
            && self.page_foreground.to_rgba8()[..3] == [0, 0, 0];
        if identity {
            None
        } else {
            Some((self.page_foreground, self.page_background))
        }
    }
}
