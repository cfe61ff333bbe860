//! The seam between the engine and a native document library.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::geometry::{Quad, Rect, Rotation};
use crate::text::StructuredText;
use crate::types::{Color, DocumentInfo, RenderImage};

/// Stable identity of an annotation inside the document, preserved across
/// save, reload and undo/redo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectNumber(pub u32);

/// A recorded, zoom independent drawing program for one page.
///
/// Handles are shared through `Arc`; the cache holds one reference and every
/// in-flight render holds another, so eviction never frees a list a worker
/// is still replaying.
pub trait DisplayList: Send + Sync {
    fn bounds(&self) -> Rect;

    /// Replays the page into an RGBA pixmap of exactly `width` x `height`
    /// device pixels at `scale` (device pixels per point) and `rotation`.
    fn replay(&self, scale: f32, rotation: Rotation, width: u32, height: u32)
        -> Result<RenderImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestinationKind {
    Xyz,
    Fit,
    FitH,
    FitV,
    FitR,
    Named,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkDestination {
    pub page: usize,
    pub kind: DestinationKind,
    /// Unspecified components are NaN.
    pub x: f32,
    pub y: f32,
    pub zoom: Option<f32>,
}

/// Link as enumerated by the backend, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLink {
    pub rect: Rect,
    pub uri: String,
    pub external: bool,
    pub destination: Option<LinkDestination>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnotationKind {
    Highlight,
    Square,
    Text,
    Popup,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawAnnotation {
    pub id: ObjectNumber,
    pub kind: AnnotationKind,
    pub rect: Rect,
    /// Stroke colour (`/C`).
    pub color: Option<Color>,
    /// Interior colour (`/IC`).
    pub interior: Option<Color>,
    pub opacity: f32,
    pub contents: Option<String>,
    pub quads: Vec<Quad>,
}

/// Everything recorded when a page is loaded for the page cache.
pub struct LoadedPage {
    pub bounds: Rect,
    pub display_list: Arc<dyn DisplayList>,
    pub links: Vec<RawLink>,
    pub annotations: Vec<RawAnnotation>,
}

/// Description of an annotation to create. `id` re-uses a previous identity
/// when an undone creation is redone.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnnotation {
    pub kind: AnnotationKind,
    pub rect: Rect,
    pub quads: Vec<Quad>,
    pub stroke: Option<Color>,
    pub interior: Option<Color>,
    pub opacity: f32,
    pub contents: Option<String>,
    pub id: Option<ObjectNumber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionChange {
    #[default]
    Keep,
    Remove,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub incremental: bool,
    pub encryption: EncryptionChange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineItem {
    pub title: String,
    pub page: usize,
    pub depth: usize,
}

/// AES-256 encryption request; the user password doubles as owner password
/// when none is given.
#[derive(Debug, Clone)]
pub struct EncryptInfo {
    pub user_password: String,
    pub owner_password: Option<String>,
}

pub trait DocumentBackend: Send + Sync {
    fn info(&self) -> &DocumentInfo;

    fn page_bounds(&self, page: usize) -> Result<Rect>;

    fn load_page(&self, page: usize) -> Result<LoadedPage>;

    fn text_page(&self, page: usize) -> Result<StructuredText>;

    fn outline(&self) -> Result<Vec<OutlineItem>>;

    fn add_annotation(&self, page: usize, annotation: &NewAnnotation) -> Result<ObjectNumber>;

    fn remove_annotations(&self, page: usize, ids: &[ObjectNumber]) -> Result<()>;

    /// Current state of one annotation, used to make deletions reversible.
    fn annotation(&self, page: usize, id: ObjectNumber) -> Result<RawAnnotation>;

    fn set_annotation_contents(&self, page: usize, id: ObjectNumber, text: &str) -> Result<()>;

    /// Stroke for highlights, interior for squares and notes; alpha becomes
    /// the annotation opacity.
    fn set_annotation_color(&self, page: usize, id: ObjectNumber, color: Color) -> Result<()>;

    fn save(&self, path: &Path, options: &WriteOptions) -> Result<()>;

    fn encrypt(&self, path: &Path, info: &EncryptInfo) -> Result<()>;
}

/// A document whose open is parked until a password is supplied.
pub trait PendingDocument: Send {
    fn path(&self) -> &Path;

    fn authenticate(self: Box<Self>, password: &str) -> Result<AuthOutcome>;
}

pub enum AuthOutcome {
    Ready(Arc<dyn DocumentBackend>),
    Rejected(Box<dyn PendingDocument>),
}

pub enum OpenOutcome {
    Ready(Arc<dyn DocumentBackend>),
    NeedsPassword(Box<dyn PendingDocument>),
}

#[async_trait]
pub trait DocumentProvider: Send + Sync {
    async fn open(&self, path: &Path) -> Result<OpenOutcome>;
}
