//! Per-document engine of the Lektra viewer: page and text caches, the
//! single-flight render pipeline, the document model with its annotation
//! commands and search, and the viewport that lays pages out and maps input
//! onto them. Format backends plug in through [`backend`].

use std::path::Path;

use uuid::Uuid;

pub mod backend;
pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod history;
pub mod layout;
pub mod links;
pub mod page_cache;
pub mod recent;
pub mod render;
pub mod search;
pub mod selection;
pub mod session;
pub mod text;
pub mod text_cache;
pub mod types;
pub mod viewport;

#[cfg(test)]
mod test_support;

pub use backend::{DocumentBackend, DocumentProvider, ObjectNumber, PendingDocument};
pub use config::EngineConfig;
pub use document::{DocumentModel, ModelEvent, RenderSettings};
pub use error::{EngineError, EngineResult};
pub use geometry::{Matrix, Point, Quad, Rect, Rotation};
pub use types::{Color, DocumentInfo, FileKind, FitMode, LayoutMode, PageLocation, RenderImage};
pub use viewport::{Frame, Viewport, ViewEvent};

/// Identity of an opened file, stable across runs for the same path.
pub type DocumentId = Uuid;

const DOCUMENT_NAMESPACE: Uuid = Uuid::from_u128(0x7b2c58f1_99c6_5a5c_a6ea_50f9e7f1cc20);

pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    let rendered = resolved.to_string_lossy();
    Uuid::new_v5(&DOCUMENT_NAMESPACE, rendered.as_bytes())
}
