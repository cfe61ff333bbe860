//! Saved sessions: the open tabs, their split layout, and per-view state.
//!
//! A session file is a JSON array with one element per tab. Current files
//! store a split tree under `"splits"`; older files stored a flat view per
//! tab and are still read.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::types::FitMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl TryFrom<u8> for Orientation {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Orientation::Horizontal),
            2 => Ok(Orientation::Vertical),
            other => Err(format!("unknown split orientation {other}")),
        }
    }
}

impl From<Orientation> for u8 {
    fn from(value: Orientation) -> Self {
        match value {
            Orientation::Horizontal => 1,
            Orientation::Vertical => 2,
        }
    }
}

/// State restored into one view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub file_path: PathBuf,
    /// One-based, as written to disk.
    #[serde(default = "first_page")]
    pub current_page: usize,
    #[serde(default = "unit_zoom")]
    pub zoom: f32,
    #[serde(default, with = "fit_index")]
    pub fit_mode: FitMode,
    #[serde(default)]
    pub invert_color: bool,
    #[serde(default)]
    pub rotation: i32,
}

fn first_page() -> usize {
    1
}

fn unit_zoom() -> f32 {
    1.0
}

impl ViewState {
    pub fn new(file_path: impl Into<PathBuf>, page: usize, zoom: f32, fit_mode: FitMode) -> Self {
        Self {
            file_path: file_path.into(),
            current_page: page + 1,
            zoom,
            fit_mode,
            invert_color: false,
            rotation: 0,
        }
    }

    /// Zero-based page index.
    pub fn page(&self) -> usize {
        self.current_page.saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SplitNode {
    Splitter {
        orientation: Orientation,
        #[serde(default)]
        sizes: Vec<i32>,
        children: Vec<SplitNode>,
    },
    View(ViewState),
}

impl SplitNode {
    fn collect<'a>(&'a self, out: &mut Vec<&'a ViewState>) {
        match self {
            SplitNode::View(view) => out.push(view),
            SplitNode::Splitter { children, .. } => {
                for child in children {
                    child.collect(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionTab {
    Splits { splits: SplitNode },
    Legacy(ViewState),
}

impl SessionTab {
    pub fn single(view: ViewState) -> Self {
        SessionTab::Splits {
            splits: SplitNode::View(view),
        }
    }

    /// Every view in the tab, in tree order. A legacy tab is one view.
    pub fn views(&self) -> Vec<&ViewState> {
        match self {
            SessionTab::Legacy(view) => vec![view],
            SessionTab::Splits { splits } => {
                let mut out = Vec::new();
                splits.collect(&mut out);
                out
            }
        }
    }

    /// The tab's layout, with legacy tabs lifted into a single view.
    pub fn into_split_tree(self) -> SplitNode {
        match self {
            SessionTab::Splits { splits } => splits,
            SessionTab::Legacy(view) => SplitNode::View(view),
        }
    }
}

/// `<dir>/<name>.json`. Names may not contain path separators.
pub fn session_path(dir: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        bail!("invalid session name {name:?}");
    }
    Ok(dir.join(format!("{name}.json")))
}

/// Names of the sessions saved in `dir`, sorted.
pub fn list_sessions(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("failed to list sessions in {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| Some(path.file_stem()?.to_str()?.to_owned()))
        .collect();
    names.sort();
    Ok(names)
}

#[instrument]
pub fn load_session(path: &Path) -> Result<Vec<SessionTab>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read session {:?}", path))?;
    let tabs: Vec<SessionTab> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to decode session {:?}", path))?;
    debug!(tabs = tabs.len(), "loaded session");
    Ok(tabs)
}

pub fn save_session(path: &Path, tabs: &[SessionTab]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create session directory {:?}", parent))?;
    }
    let tmp = path.with_extension("json.tmp");
    let payload = serde_json::to_string_pretty(tabs)?;
    let mut file =
        File::create(&tmp).with_context(|| format!("failed to open temp session {:?}", tmp))?;
    file.write_all(payload.as_bytes())?;
    file.flush()?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace session {:?}", path))?;
    Ok(())
}

/// Fit modes are stored by index: 0 none, 1 width, 2 height, 3 window.
mod fit_index {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::FitMode;

    pub fn serialize<S: Serializer>(fit: &FitMode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(fit.as_index())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FitMode, D::Error> {
        Ok(FitMode::from_index(i64::deserialize(deserializer)?))
    }
}
