use std::fs;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use image::imageops::{self, FilterType};
use lektra_core::backend::{
    AuthOutcome, DisplayList, DocumentBackend, DocumentProvider, EncryptInfo, LoadedPage,
    NewAnnotation, ObjectNumber, OpenOutcome, OutlineItem, PendingDocument, RawAnnotation,
    WriteOptions,
};
use lektra_core::geometry::{Quad, Rect, Rotation};
use lektra_core::text::{StructuredText, TextPageBuilder};
use lektra_core::types::{Color, DocumentInfo, DocumentMetadata, FileKind, RenderImage};
use lektra_core::document_id_for_path;
use parking_lot::{Mutex, RwLock};
use pdfium_render::prelude::*;
use tracing::{debug, instrument, warn};

use crate::objects::{PageFrame, PdfObjects};

/// Opens PDFs through a shared pdfium binding.
pub struct PdfiumProvider {
    pdfium: Arc<Pdfium>,
}

impl PdfiumProvider {
    /// Binds pdfium from `library` when given, else from the usual places.
    pub fn new(library: Option<&Path>) -> Result<Self> {
        let pdfium = match library {
            Some(path) => bind_pdfium_at(path)?,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

#[async_trait]
impl DocumentProvider for PdfiumProvider {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn open(&self, path: &Path) -> Result<OpenOutcome> {
        let absolute = path
            .canonicalize()
            .with_context(|| format!("failed to resolve path for {:?}", path))?;
        let bytes = fs::read(&absolute).with_context(|| format!("failed to read {:?}", absolute))?;
        match Rasterizer::load(Arc::clone(&self.pdfium), bytes.clone(), None) {
            Ok(raster) => {
                let document = PdfiumDocument::new(
                    Arc::clone(&self.pdfium),
                    absolute,
                    &bytes,
                    raster,
                    None,
                )?;
                Ok(OpenOutcome::Ready(Arc::new(document)))
            }
            Err(err) if is_password_error(&err) => {
                debug!("document is password protected");
                Ok(OpenOutcome::NeedsPassword(Box::new(PendingPdf {
                    pdfium: Arc::clone(&self.pdfium),
                    path: absolute,
                    bytes,
                })))
            }
            Err(err) => Err(anyhow!("failed to open {:?}: {err}", absolute)),
        }
    }
}

struct PendingPdf {
    pdfium: Arc<Pdfium>,
    path: PathBuf,
    bytes: Vec<u8>,
}

impl PendingDocument for PendingPdf {
    fn path(&self) -> &Path {
        &self.path
    }

    fn authenticate(self: Box<Self>, password: &str) -> Result<AuthOutcome> {
        match Rasterizer::load(Arc::clone(&self.pdfium), self.bytes.clone(), Some(password)) {
            Ok(raster) => {
                let document = PdfiumDocument::new(
                    Arc::clone(&self.pdfium),
                    self.path.clone(),
                    &self.bytes,
                    raster,
                    Some(password.to_owned()),
                )?;
                Ok(AuthOutcome::Ready(Arc::new(document)))
            }
            Err(err) if is_password_error(&err) => Ok(AuthOutcome::Rejected(self)),
            Err(err) => Err(anyhow!("failed to open {:?}: {err}", self.path)),
        }
    }
}

fn is_password_error(err: &PdfiumError) -> bool {
    matches!(
        err,
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError)
    )
}

/// One loaded pdfium document. Edits replace the whole rasteriser; display
/// lists keep the one they were recorded against alive.
struct Rasterizer {
    document: Mutex<PdfDocument<'static>>,
    _pdfium: Arc<Pdfium>,
}

impl Rasterizer {
    fn load(
        pdfium: Arc<Pdfium>,
        bytes: Vec<u8>,
        password: Option<&str>,
    ) -> std::result::Result<Self, PdfiumError> {
        let document = pdfium.load_pdf_from_byte_vec(bytes, password)?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. The
        // Arc is stored next to it in `_pdfium`, and fields drop in
        // declaration order, so the document is dropped while the bindings
        // are still alive.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        Ok(Self {
            document: Mutex::new(document),
            _pdfium: pdfium,
        })
    }

    fn with_page<R>(&self, page: usize, f: impl FnOnce(&PdfPage<'_>) -> Result<R>) -> Result<R> {
        let index: PdfPageIndex = page
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", page))?;
        let document = self.document.lock();
        let pdf_page = document
            .pages()
            .get(index)
            .with_context(|| format!("page {} out of range", page))?;
        f(&pdf_page)
    }

    fn page_frame(&self, page: usize) -> Result<PageFrame> {
        self.with_page(page, |p| {
            Ok(PageFrame::from_box([0.0, 0.0, p.width().value, p.height().value]))
        })
    }
}

struct PageRaster {
    raster: Arc<Rasterizer>,
    page: usize,
    bounds: Rect,
}

impl DisplayList for PageRaster {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    #[instrument(skip(self), fields(page = self.page))]
    fn replay(&self, scale: f32, rotation: Rotation, width: u32, height: u32) -> Result<RenderImage> {
        if width == 0 || height == 0 {
            bail!("empty render target {width}x{height} at scale {scale}");
        }
        let (upright_w, upright_h) = if rotation.is_sideways() {
            (height, width)
        } else {
            (width, height)
        };
        let mut image = self.raster.with_page(self.page, |page| {
            let config = PdfRenderConfig::new()
                .set_target_width(upright_w as i32)
                .set_target_height(upright_h as i32);
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", self.page))?;
            Ok(bitmap.as_image().to_rgba8())
        })?;
        if image.width() != upright_w || image.height() != upright_h {
            image = imageops::resize(&image, upright_w, upright_h, FilterType::Triangle);
        }
        let image = match rotation {
            Rotation::R0 => image,
            Rotation::R90 => imageops::rotate90(&image),
            Rotation::R180 => imageops::rotate180(&image),
            Rotation::R270 => imageops::rotate270(&image),
        };
        Ok(RenderImage::new(width, height, image.into_raw()))
    }
}

/// A PDF opened through pdfium, with its object graph kept in `lopdf` for
/// edits. Files `lopdf` cannot parse open read-only.
pub struct PdfiumDocument {
    info: DocumentInfo,
    password: Option<String>,
    raster: RwLock<Arc<Rasterizer>>,
    objects: Mutex<Option<PdfObjects>>,
    outline_cache: Mutex<Option<Vec<OutlineItem>>>,
    pdfium: Arc<Pdfium>,
}

impl PdfiumDocument {
    fn new(
        pdfium: Arc<Pdfium>,
        path: PathBuf,
        bytes: &[u8],
        raster: Rasterizer,
        password: Option<String>,
    ) -> Result<Self> {
        let objects = match PdfObjects::load(bytes, password.as_deref()) {
            Ok(objects) => Some(objects),
            Err(err) => {
                warn!(?err, path = %path.display(), "object graph unavailable, opening read-only");
                None
            }
        };
        let info = build_document_info(&raster, &path, objects.as_ref(), password.is_some())?;
        Ok(Self {
            info,
            password,
            raster: RwLock::new(Arc::new(raster)),
            objects: Mutex::new(objects),
            outline_cache: Mutex::new(None),
            pdfium,
        })
    }

    fn current(&self) -> Arc<Rasterizer> {
        Arc::clone(&self.raster.read())
    }

    fn frame(&self, page: usize) -> Result<PageFrame> {
        if let Some(objects) = self.objects.lock().as_ref() {
            return objects.frame(page);
        }
        self.current().page_frame(page)
    }

    /// Applies `edit` to the object graph, then reloads the rasteriser so
    /// the next page load shows it.
    fn edit<R>(&self, edit: impl FnOnce(&mut PdfObjects) -> Result<R>) -> Result<R> {
        let mut guard = self.objects.lock();
        let objects = guard
            .as_mut()
            .ok_or_else(|| anyhow!("{} cannot be edited", self.info.path.display()))?;
        let out = edit(objects)?;
        let bytes = objects.to_bytes()?;
        let raster = Rasterizer::load(Arc::clone(&self.pdfium), bytes, self.password.as_deref())
            .map_err(|err| anyhow!("failed to reload edited document: {err}"))?;
        *self.raster.write() = Arc::new(raster);
        Ok(out)
    }

    fn read_objects<R>(&self, f: impl FnOnce(&PdfObjects) -> Result<R>) -> Result<R> {
        let guard = self.objects.lock();
        let objects = guard
            .as_ref()
            .ok_or_else(|| anyhow!("{} has no editable object graph", self.info.path.display()))?;
        f(objects)
    }
}

impl DocumentBackend for PdfiumDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_bounds(&self, page: usize) -> Result<Rect> {
        Ok(self.frame(page)?.bounds())
    }

    #[instrument(skip(self))]
    fn load_page(&self, page: usize) -> Result<LoadedPage> {
        let raster = self.current();
        let (bounds, links, annotations) = match self.objects.lock().as_ref() {
            Some(objects) => (
                objects.frame(page)?.bounds(),
                objects.links(page).unwrap_or_else(|err| {
                    warn!(?err, page, "failed to read links");
                    Vec::new()
                }),
                objects.annotations(page).unwrap_or_else(|err| {
                    warn!(?err, page, "failed to read annotations");
                    Vec::new()
                }),
            ),
            None => (raster.page_frame(page)?.bounds(), Vec::new(), Vec::new()),
        };
        Ok(LoadedPage {
            bounds,
            display_list: Arc::new(PageRaster {
                raster,
                page,
                bounds,
            }),
            links,
            annotations,
        })
    }

    #[instrument(skip(self))]
    fn text_page(&self, page: usize) -> Result<StructuredText> {
        let frame = self.frame(page)?;
        self.current().with_page(page, |pdf_page| {
            let text = pdf_page
                .text()
                .with_context(|| format!("failed to extract text for page {}", page))?;
            let mut builder = TextPageBuilder::new();
            for ch in text.chars().iter() {
                let Some(c) = ch.unicode_char() else {
                    continue;
                };
                match c {
                    '\n' => {
                        builder.end_line();
                        continue;
                    }
                    '\r' => continue,
                    _ => {}
                }
                let Ok(bounds) = ch.loose_bounds() else {
                    continue;
                };
                let rect = frame.rect_to_page([
                    bounds.left().value,
                    bounds.bottom().value,
                    bounds.right().value,
                    bounds.top().value,
                ]);
                builder.push(c, Quad::from_rect(&rect));
            }
            Ok(builder.finish())
        })
    }

    fn outline(&self) -> Result<Vec<OutlineItem>> {
        {
            let cache = self.outline_cache.lock();
            if let Some(cached) = cache.as_ref() {
                return Ok(cached.clone());
            }
        }

        let raster = self.current();
        let outline = {
            let document = raster.document.lock();
            let mut outline = Vec::new();
            if let Some(root) = document.bookmarks().root() {
                collect_outline(root, 0, &mut outline);
            }
            outline
        };

        *self.outline_cache.lock() = Some(outline.clone());
        Ok(outline)
    }

    fn add_annotation(&self, page: usize, annotation: &NewAnnotation) -> Result<ObjectNumber> {
        self.edit(|objects| objects.add_annotation(page, annotation))
    }

    fn remove_annotations(&self, page: usize, ids: &[ObjectNumber]) -> Result<()> {
        self.edit(|objects| objects.remove_annotations(page, ids))
    }

    fn annotation(&self, page: usize, id: ObjectNumber) -> Result<RawAnnotation> {
        self.read_objects(|objects| objects.annotation(page, id))
    }

    fn set_annotation_contents(&self, page: usize, id: ObjectNumber, text: &str) -> Result<()> {
        self.edit(|objects| objects.set_contents(page, id, text))
    }

    fn set_annotation_color(&self, page: usize, id: ObjectNumber, color: Color) -> Result<()> {
        self.edit(|objects| objects.set_color(page, id, color))
    }

    fn save(&self, path: &Path, options: &WriteOptions) -> Result<()> {
        self.read_objects(|objects| objects.save(path, options))
    }

    fn encrypt(&self, path: &Path, info: &EncryptInfo) -> Result<()> {
        self.read_objects(|objects| objects.encrypt_to(path, info))
    }
}

fn collect_outline(mut bookmark: PdfBookmark<'_>, depth: usize, out: &mut Vec<OutlineItem>) {
    loop {
        if let Some(title) = bookmark.title() {
            if let Some(destination) = bookmark.destination() {
                if let Ok(page_index) = destination.page_index() {
                    out.push(OutlineItem {
                        title,
                        page: page_index as usize,
                        depth,
                    });
                }
            }
        }

        if let Some(child) = bookmark.first_child() {
            collect_outline(child, depth + 1, out);
        }

        match bookmark.next_sibling() {
            Some(next) => bookmark = next,
            None => break,
        }
    }
}

fn build_document_info(
    raster: &Rasterizer,
    path: &Path,
    objects: Option<&PdfObjects>,
    password_given: bool,
) -> Result<DocumentInfo> {
    let document = raster.document.lock();
    let page_count = usize::try_from(document.pages().len()).unwrap_or_default();
    let metadata = document.metadata();
    let tag = |kind: PdfDocumentMetadataTagType| {
        metadata
            .get(kind)
            .map(|t| t.value().to_owned())
            .filter(|v| !v.is_empty())
    };

    Ok(DocumentInfo {
        id: document_id_for_path(path),
        path: path.to_path_buf(),
        kind: FileKind::from_path(path),
        page_count,
        encrypted: password_given || objects.is_some_and(PdfObjects::is_encrypted),
        pdf_version: objects.map(|o| o.version().to_owned()),
        metadata: DocumentMetadata {
            title: tag(PdfDocumentMetadataTagType::Title),
            author: tag(PdfDocumentMetadataTagType::Author),
            subject: tag(PdfDocumentMetadataTagType::Subject),
            keywords: tag(PdfDocumentMetadataTagType::Keywords)
                .map(|k| k.split(',').map(|s| s.trim().to_owned()).collect())
                .unwrap_or_default(),
            creator: tag(PdfDocumentMetadataTagType::Creator),
            producer: tag(PdfDocumentMetadataTagType::Producer),
            creation_date: tag(PdfDocumentMetadataTagType::CreationDate),
            modification_date: tag(PdfDocumentMetadataTagType::ModificationDate),
        },
    })
}

fn bind_pdfium_at(path: &Path) -> Result<Pdfium> {
    let library = if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    };
    Pdfium::bind_to_library(&library)
        .map(Pdfium::new)
        .map_err(|err| anyhow!("failed to load pdfium from {}: {err}", library.display()))
}

/// Executable directory, then the working directory, then the system
/// library path.
fn bind_pdfium_default() -> Result<Pdfium> {
    let mut errors = Vec::new();

    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf));
    let candidates = exe_dir
        .into_iter()
        .chain([PathBuf::from("./")])
        .map(|dir| Pdfium::pdfium_platform_library_name_at_path(&dir));

    for candidate in candidates {
        match Pdfium::bind_to_library(&candidate) {
            Ok(bindings) => return Ok(Pdfium::new(bindings)),
            Err(err) => errors.push(format!("{}: {}", candidate.display(), err)),
        }
    }

    match Pdfium::bind_to_system_library() {
        Ok(bindings) => Ok(Pdfium::new(bindings)),
        Err(err) => {
            errors.push(format!("system: {err}"));
            Err(anyhow!(
                "failed to bind to a pdfium library; ensure it is installed ({})",
                errors.join(", ")
            ))
        }
    }
}
