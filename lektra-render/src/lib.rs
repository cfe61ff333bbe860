//! PDF backend for the Lektra engine.
//!
//! Pages are rasterised, and text, outline and metadata extracted, through
//! pdfium. The object graph used for annotation edits, link resolution,
//! saving and encryption is held separately through `lopdf`, and the
//! rasteriser is reloaded from it after every edit.

pub mod objects;

#[cfg(feature = "pdf")]
mod pdfium;

pub use objects::{PageFrame, PdfObjects};
#[cfg(feature = "pdf")]
pub use pdfium::{PdfiumDocument, PdfiumProvider};
