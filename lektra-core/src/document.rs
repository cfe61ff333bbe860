//! The per-document model: open/close/reload, caches, render hand-off,
//! coordinate mapping, annotation edits with undo, and search.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument, warn};

use crate::backend::{
    AnnotationKind, AuthOutcome, DocumentBackend, DocumentProvider, EncryptInfo, EncryptionChange,
    ObjectNumber, OpenOutcome, OutlineItem, PendingDocument, WriteOptions,
};
use crate::commands::{Command, UndoStack};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::geometry::{page_to_device, Matrix, Point, Quad, Rect, Rotation};
use crate::links::UrlDetector;
use crate::page_cache::{build_entry, CachedAnnotation, CachedLink, PageCache, PageCacheEntry};
use crate::render::{execute, RenderJob, RenderOutcome, RenderQueue};
use crate::search::{search_stream, SearchHit, SearchQuery, SearchResults};
use crate::selection::{self, SnapMode, TextSelection};
use crate::text::StructuredText;
use crate::text_cache::{TextCache, TextCacheEntry};
use crate::types::{Color, DocumentInfo, FileKind};

pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 50.0;

/// Everything the model reports back to the host's UI loop.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    PasswordRequired { path: PathBuf },
    PasswordRejected { path: PathBuf },
    OpenFinished { page_count: usize },
    OpenFailed(EngineError),
    Reloaded { page_count: usize },
    /// Page `page` changed; its image and overlays are stale.
    ReloadRequested { page: usize },
    RenderFinished(Box<RenderOutcome>),
    RenderFailed {
        page: usize,
        generation: u64,
        error: EngineError,
    },
    /// Links found in page text, in page space.
    UrlLinksDetected {
        page: usize,
        generation: u64,
        /// Page revision the text was read at.
        revision: u64,
        links: Vec<CachedLink>,
    },
    SearchResultsReady { generation: u64, results: SearchResults },
}

enum OpenState {
    Closed,
    Opening,
    AwaitingPassword(Box<dyn PendingDocument>),
    Authenticating,
    Open,
}

impl OpenState {
    fn name(&self) -> &'static str {
        match self {
            OpenState::Closed => "closed",
            OpenState::Opening => "opening",
            OpenState::AwaitingPassword(_) => "awaiting a password",
            OpenState::Authenticating => "authenticating",
            OpenState::Open => "open",
        }
    }
}

/// Parameters every render and coordinate mapping is computed from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderSettings {
    pub zoom: f32,
    pub dpi: f32,
    pub dpr: f32,
    pub rotation: Rotation,
    pub invert: bool,
    pub tint: Option<(Color, Color)>,
    pub detect_urls: bool,
}

impl RenderSettings {
    pub fn logical_scale(&self) -> f32 {
        self.zoom * self.dpi / 72.0
    }
}

/// A text selection with its quads already mapped to page-local logical
/// pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSelection {
    pub selection: TextSelection,
    pub quads: Vec<Quad>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HighlightText {
    pub page: usize,
    pub id: ObjectNumber,
    pub text: String,
    pub quad: Quad,
}

#[derive(Default)]
struct PageDims {
    default: Option<Rect>,
    known: Vec<Option<Rect>>,
}

pub struct DocumentModel {
    provider: Arc<dyn DocumentProvider>,
    config: EngineConfig,
    runtime: Handle,
    events: UnboundedSender<ModelEvent>,
    state: Mutex<OpenState>,
    path: RwLock<Option<PathBuf>>,
    password: Mutex<Option<String>>,
    doc: RwLock<Option<Arc<dyn DocumentBackend>>>,
    page_cache: Mutex<PageCache>,
    text_cache: Mutex<TextCache>,
    dims: RwLock<PageDims>,
    revisions: Mutex<HashMap<usize, u64>>,
    queue: Mutex<RenderQueue>,
    render_gate: Mutex<()>,
    undo: Mutex<UndoStack>,
    settings: RwLock<RenderSettings>,
    outline: Mutex<Option<Vec<OutlineItem>>>,
    selection_text: Mutex<Option<(usize, u64, Arc<StructuredText>)>>,
    url_detector: Option<UrlDetector>,
    generation: AtomicU64,
    search_generation: AtomicU64,
    modified: AtomicBool,
}

impl DocumentModel {
    /// Must be called from within a tokio runtime; background work is
    /// spawned onto it.
    pub fn new(
        provider: Arc<dyn DocumentProvider>,
        config: EngineConfig,
    ) -> EngineResult<(Arc<Self>, UnboundedReceiver<ModelEvent>)> {
        let runtime =
            Handle::try_current().map_err(|_| EngineError::InvalidState("outside a tokio runtime"))?;
        let (tx, rx) = unbounded_channel();
        let url_detector = match UrlDetector::new(&config.links.url_regex) {
            Ok(detector) => Some(detector),
            Err(err) => {
                warn!(?err, "invalid url regex, url detection disabled");
                None
            }
        };
        let settings = RenderSettings {
            zoom: config.zoom.level.clamp(MIN_ZOOM, MAX_ZOOM),
            dpi: config.rendering.dpi,
            dpr: config.rendering.dpr,
            rotation: Rotation::R0,
            invert: config.behavior.invert_mode,
            tint: config.colors.tint(),
            detect_urls: config.links.detect_urls,
        };
        let model = Arc::new(Self {
            provider,
            runtime,
            events: tx,
            state: Mutex::new(OpenState::Closed),
            path: RwLock::new(None),
            password: Mutex::new(None),
            doc: RwLock::new(None),
            page_cache: Mutex::new(PageCache::new(config.rendering.cache_pages)),
            text_cache: Mutex::new(TextCache::new(config.rendering.text_cache_pages)),
            dims: RwLock::new(PageDims::default()),
            revisions: Mutex::new(HashMap::new()),
            queue: Mutex::new(RenderQueue::new()),
            render_gate: Mutex::new(()),
            undo: Mutex::new(UndoStack::new(config.behavior.undo_limit)),
            settings: RwLock::new(settings),
            outline: Mutex::new(None),
            selection_text: Mutex::new(None),
            url_detector,
            generation: AtomicU64::new(0),
            search_generation: AtomicU64::new(0),
            modified: AtomicBool::new(false),
            config,
        });
        Ok((model, rx))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn emit(&self, event: ModelEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }

    fn backend(&self) -> EngineResult<Arc<dyn DocumentBackend>> {
        self.doc.read().clone().ok_or(EngineError::NoDocument)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), OpenState::Open)
    }

    pub fn is_awaiting_password(&self) -> bool {
        matches!(*self.state.lock(), OpenState::AwaitingPassword(_))
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    pub fn info(&self) -> Option<DocumentInfo> {
        self.doc.read().as_ref().map(|d| d.info().clone())
    }

    pub fn page_count(&self) -> usize {
        self.doc.read().as_ref().map_or(0, |d| d.info().page_count)
    }

    pub fn file_kind(&self) -> Option<FileKind> {
        self.doc.read().as_ref().map(|d| d.info().kind)
    }

    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::SeqCst)
    }

    // ---- open / close / reload -------------------------------------------

    /// Opens `path` in the background. With `password` set, a protected
    /// document is authenticated immediately instead of parking.
    pub fn open_async(self: &Arc<Self>, path: impl Into<PathBuf>, password: Option<String>) {
        let path = path.into();
        let path = path.canonicalize().unwrap_or(path);
        self.close();
        *self.state.lock() = OpenState::Opening;
        *self.path.write() = Some(path.clone());

        let model = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = model.provider.open(&path).await;
            model.handle_open_outcome(&path, outcome, password);
        });
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    fn handle_open_outcome(
        self: &Arc<Self>,
        path: &Path,
        outcome: anyhow::Result<OpenOutcome>,
        password: Option<String>,
    ) {
        let current = matches!(*self.state.lock(), OpenState::Opening)
            && self.path().as_deref() == Some(path);
        if !current {
            debug!("open superseded");
            return;
        }
        match outcome {
            Err(err) => self.fail_open(EngineError::open_failed(path, &err)),
            Ok(OpenOutcome::Ready(backend)) => self.finish_open(backend),
            Ok(OpenOutcome::NeedsPassword(pending)) => match password {
                Some(password) => {
                    *self.state.lock() = OpenState::Authenticating;
                    self.authenticate(pending, password);
                }
                None => self.park(pending, false),
            },
        }
    }

    fn park(&self, pending: Box<dyn PendingDocument>, rejected: bool) {
        let path = pending.path().to_owned();
        *self.state.lock() = OpenState::AwaitingPassword(pending);
        if rejected {
            info!(path = %path.display(), "password rejected");
            self.emit(ModelEvent::PasswordRejected { path });
        } else {
            info!(path = %path.display(), "document needs a password");
            self.emit(ModelEvent::PasswordRequired { path });
        }
    }

    /// Retries a parked open with `password`.
    pub fn submit_password(self: &Arc<Self>, password: impl Into<String>) -> EngineResult<()> {
        let pending = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, OpenState::Authenticating) {
                OpenState::AwaitingPassword(pending) => pending,
                other => {
                    let name = other.name();
                    *state = other;
                    return Err(EngineError::InvalidState(name));
                }
            }
        };
        self.authenticate(pending, password.into());
        Ok(())
    }

    fn authenticate(self: &Arc<Self>, pending: Box<dyn PendingDocument>, password: String) {
        let model = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            let path = pending.path().to_owned();
            match pending.authenticate(&password) {
                Ok(AuthOutcome::Ready(backend)) => {
                    *model.password.lock() = Some(password);
                    model.finish_open(backend);
                }
                Ok(AuthOutcome::Rejected(pending)) => model.park(pending, true),
                Err(err) => model.fail_open(EngineError::open_failed(path, &err)),
            }
        });
    }

    /// Drops a parked open.
    pub fn cancel_open(&self) {
        let mut state = self.state.lock();
        if let OpenState::AwaitingPassword(pending) = &*state {
            let path = pending.path().to_owned();
            *state = OpenState::Closed;
            drop(state);
            *self.path.write() = None;
            self.emit(ModelEvent::OpenFailed(EngineError::OpenFailed {
                path,
                reason: "password entry cancelled".into(),
            }));
        }
    }

    fn fail_open(&self, error: EngineError) {
        warn!(%error, "open failed");
        *self.state.lock() = OpenState::Closed;
        self.emit(ModelEvent::OpenFailed(error));
    }

    /// Installs a usable backend; the host hears about it only once the
    /// page count is known and the first page's bounds are cached.
    fn finish_open(&self, backend: Arc<dyn DocumentBackend>) {
        let page_count = backend.info().page_count;
        let first = if page_count > 0 {
            match backend.page_bounds(0) {
                Ok(bounds) => Some(bounds),
                Err(err) => {
                    let path = backend.info().path.clone();
                    return self.fail_open(EngineError::open_failed(path, &err));
                }
            }
        } else {
            None
        };

        self.install(backend, first);
        *self.state.lock() = OpenState::Open;
        info!(page_count, "document open");
        self.emit(ModelEvent::OpenFinished { page_count });
    }

    fn install(&self, backend: Arc<dyn DocumentBackend>, first: Option<Rect>) {
        let _gate = self.render_gate.lock();
        let page_count = backend.info().page_count;
        let mut doc = self.doc.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.queue.lock() = RenderQueue::new();
        self.page_cache.lock().clear();
        self.text_cache.lock().clear();
        *self.outline.lock() = None;
        *self.selection_text.lock() = None;
        self.revisions.lock().clear();
        {
            let mut dims = self.dims.write();
            dims.default = first;
            dims.known = vec![None; page_count];
            if let (Some(slot), Some(bounds)) = (dims.known.first_mut(), first) {
                *slot = Some(bounds);
            }
        }
        *doc = Some(backend);
    }

    /// Waits for the in-flight render, then drops the document and every
    /// cache derived from it.
    pub fn close(&self) {
        self.queue.lock().clear();
        let _gate = self.render_gate.lock();
        let mut doc = self.doc.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.search_generation.fetch_add(1, Ordering::SeqCst);
        *self.queue.lock() = RenderQueue::new();
        self.page_cache.lock().clear();
        self.text_cache.lock().clear();
        *self.dims.write() = PageDims::default();
        self.revisions.lock().clear();
        *self.outline.lock() = None;
        *self.selection_text.lock() = None;
        self.undo.lock().clear();
        self.modified.store(false, Ordering::SeqCst);
        *doc = None;
        drop(doc);
        let mut state = self.state.lock();
        if matches!(*state, OpenState::Open) {
            debug!("document closed");
        }
        *state = OpenState::Closed;
    }

    /// Re-reads the file in place. Renders started before the swap carry
    /// the old generation and are discarded by the viewport.
    pub fn reload_document(self: &Arc<Self>) -> EngineResult<()> {
        let path = self.path().ok_or(EngineError::NoDocument)?;
        if !self.is_open() {
            return Err(EngineError::InvalidState("not open"));
        }
        let model = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = model.provider.open(&path).await;
            let backend = match outcome {
                Ok(OpenOutcome::Ready(backend)) => Ok(backend),
                Ok(OpenOutcome::NeedsPassword(pending)) => {
                    let password = model.password.lock().clone().unwrap_or_default();
                    match pending.authenticate(&password) {
                        Ok(AuthOutcome::Ready(backend)) => Ok(backend),
                        Ok(AuthOutcome::Rejected(_)) => Err(EngineError::PasswordRejected {
                            path: path.clone(),
                        }),
                        Err(err) => Err(EngineError::open_failed(&path, &err)),
                    }
                }
                Err(err) => Err(EngineError::open_failed(&path, &err)),
            };
            match backend {
                Ok(backend) => {
                    let page_count = backend.info().page_count;
                    let first = backend.page_bounds(0).ok();
                    model.install(backend, first);
                    model.undo.lock().clear();
                    model.modified.store(false, Ordering::SeqCst);
                    info!(page_count, path = %path.display(), "document reloaded");
                    model.emit(ModelEvent::Reloaded { page_count });
                }
                Err(error) => {
                    warn!(%error, "reload failed");
                    model.emit(ModelEvent::OpenFailed(error));
                }
            }
        });
        Ok(())
    }

    // ---- persistence -------------------------------------------------------

    fn require_editable(&self, backend: &dyn DocumentBackend) -> EngineResult<()> {
        if backend.info().kind.is_editable() {
            Ok(())
        } else {
            Err(EngineError::InvalidState("viewing a read-only format"))
        }
    }

    #[instrument(skip(self))]
    pub fn save_changes(&self) -> EngineResult<()> {
        let path = self.path().ok_or(EngineError::NoDocument)?;
        self.write_to(&path, WriteOptions {
            incremental: true,
            encryption: EncryptionChange::Keep,
        })
    }

    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn save_as(&self, path: &Path) -> EngineResult<()> {
        self.write_to(path, WriteOptions::default())
    }

    fn write_to(&self, path: &Path, options: WriteOptions) -> EngineResult<()> {
        let doc = self.doc.read();
        let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
        self.require_editable(backend.as_ref())?;
        backend.save(path, &options).map_err(|err| {
            warn!(?err, "save failed");
            EngineError::save_failed(path, &err)
        })?;
        self.modified.store(false, Ordering::SeqCst);
        info!(path = %path.display(), "saved");
        Ok(())
    }

    /// Rewrites the file with AES-256 using the given passwords.
    #[instrument(skip(self, info))]
    pub fn encrypt(&self, info: &EncryptInfo) -> EngineResult<()> {
        let path = self.path().ok_or(EngineError::NoDocument)?;
        let doc = self.doc.read();
        let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
        self.require_editable(backend.as_ref())?;
        backend.encrypt(&path, info).map_err(|err| {
            warn!(?err, "encryption failed");
            EngineError::save_failed(&path, &err)
        })?;
        *self.password.lock() = Some(info.user_password.clone());
        Ok(())
    }

    /// Rewrites the file with encryption removed.
    #[instrument(skip(self))]
    pub fn decrypt(&self) -> EngineResult<()> {
        let path = self.path().ok_or(EngineError::NoDocument)?;
        self.write_to(&path, WriteOptions {
            incremental: false,
            encryption: EncryptionChange::Remove,
        })?;
        *self.password.lock() = None;
        Ok(())
    }

    // ---- settings ----------------------------------------------------------

    pub fn settings(&self) -> RenderSettings {
        *self.settings.read()
    }

    /// Clamps and stores the zoom level, returning the value kept.
    pub fn set_zoom(&self, zoom: f32) -> f32 {
        let zoom = if zoom.is_finite() { zoom.clamp(MIN_ZOOM, MAX_ZOOM) } else { 1.0 };
        self.settings.write().zoom = zoom;
        zoom
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        self.settings.write().rotation = rotation;
    }

    pub fn set_dpr(&self, dpr: f32) {
        if dpr > 0.0 {
            self.settings.write().dpr = dpr;
        }
    }

    pub fn set_dpi(&self, dpi: f32) {
        if dpi > 0.0 {
            self.settings.write().dpi = dpi;
        }
    }

    pub fn set_invert(&self, invert: bool) {
        self.settings.write().invert = invert;
    }

    pub fn set_tint(&self, tint: Option<(Color, Color)>) {
        self.settings.write().tint = tint;
    }

    pub fn set_detect_urls(&self, detect: bool) {
        self.settings.write().detect_urls = detect && self.url_detector.is_some();
    }

    // ---- dimensions and coordinates ---------------------------------------

    /// Page bounds in points; pages not yet loaded report the first page's
    /// size.
    pub fn page_bounds(&self, page: usize) -> EngineResult<Rect> {
        let page_count = self.page_count();
        if page >= page_count {
            return Err(EngineError::PageOutOfRange { page, page_count });
        }
        let dims = self.dims.read();
        dims.known
            .get(page)
            .copied()
            .flatten()
            .or(dims.default)
            .ok_or(EngineError::NoDocument)
    }

    /// Whether the bounds of `page` were actually measured.
    pub fn page_bounds_known(&self, page: usize) -> bool {
        self.dims.read().known.get(page).is_some_and(Option::is_some)
    }

    pub fn all_page_bounds(&self) -> Vec<Rect> {
        let dims = self.dims.read();
        dims.known
            .iter()
            .map(|known| known.or(dims.default).unwrap_or(Rect::EMPTY))
            .collect()
    }

    fn remember_bounds(&self, page: usize, bounds: Rect) {
        let mut dims = self.dims.write();
        if let Some(slot) = dims.known.get_mut(page) {
            *slot = Some(bounds);
        }
    }

    /// Page to device-pixel transform used by the renderer.
    pub fn device_transform(&self, page: usize) -> EngineResult<Matrix> {
        let bounds = self.page_bounds(page)?;
        let s = self.settings();
        Ok(page_to_device(&bounds, s.logical_scale() * s.dpr, s.rotation))
    }

    /// Page to page-local logical pixel transform used for selection.
    pub fn logical_transform(&self, page: usize) -> EngineResult<Matrix> {
        let bounds = self.page_bounds(page)?;
        let s = self.settings();
        Ok(page_to_device(&bounds, s.logical_scale(), s.rotation))
    }

    /// PDF point to page-local logical pixel.
    pub fn to_pixel_space(&self, page: usize, p: Point) -> EngineResult<Point> {
        let m = self.device_transform(page)?;
        let dpr = self.settings().dpr;
        let d = m.transform_point(p);
        Ok(Point::new(d.x / dpr, d.y / dpr))
    }

    /// Page-local logical pixel to PDF point.
    pub fn to_pdf_space(&self, page: usize, p: Point) -> EngineResult<Point> {
        let m = self.device_transform(page)?;
        let dpr = self.settings().dpr;
        let inv = m.invert().ok_or(EngineError::InvalidState("degenerate page transform"))?;
        Ok(inv.transform_point(Point::new(p.x * dpr, p.y * dpr)))
    }

    /// Page-local logical rect to a PDF-space rect.
    pub fn rect_to_pdf_space(&self, page: usize, rect: &Rect) -> EngineResult<Rect> {
        let m = self.logical_transform(page)?;
        let inv = m.invert().ok_or(EngineError::InvalidState("degenerate page transform"))?;
        Ok(inv.transform_rect(rect))
    }

    // ---- page cache --------------------------------------------------------

    /// Returns the cache entry for `page`, building it when missing.
    pub fn ensure_cached(&self, page: usize) -> EngineResult<Arc<PageCacheEntry>> {
        if let Some(entry) = self.page_cache.lock().get(page) {
            return Ok(entry);
        }
        let doc = self.doc.read();
        let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
        let page_count = backend.info().page_count;
        if page >= page_count {
            return Err(EngineError::PageOutOfRange { page, page_count });
        }
        let entry = build_entry(backend.as_ref(), page).map_err(|err| {
            warn!(page, ?err, "failed to cache page");
            EngineError::CacheBuildFailed {
                page,
                reason: format!("{err:#}"),
            }
        })?;
        self.remember_bounds(page, entry.bounds);
        let mut cache = self.page_cache.lock();
        if let Some(existing) = cache.get(page) {
            return Ok(existing);
        }
        Ok(cache.insert(page, entry))
    }

    pub fn invalidate_page_cache(&self, page: usize) {
        *self.revisions.lock().entry(page).or_default() += 1;
        if self.page_cache.lock().invalidate(page) {
            debug!(page, "page cache entry invalidated");
        }
        self.text_cache.lock().invalidate(page);
        let mut selection = self.selection_text.lock();
        if selection.as_ref().is_some_and(|(p, _, _)| *p == page) {
            *selection = None;
        }
    }

    /// Number of invalidations `page` has seen since the document was
    /// installed.
    pub fn revision(&self, page: usize) -> u64 {
        self.revisions.lock().get(&page).copied().unwrap_or(0)
    }

    pub fn clear_page_cache(&self) {
        self.page_cache.lock().clear();
    }

    pub fn page_cache_len(&self) -> usize {
        self.page_cache.lock().len()
    }

    pub fn cached_pages(&self) -> Vec<usize> {
        self.page_cache.lock().pages()
    }

    pub fn links_on(&self, page: usize) -> EngineResult<Vec<CachedLink>> {
        Ok(self.ensure_cached(page)?.links.clone())
    }

    pub fn annotations_on(&self, page: usize) -> EngineResult<Vec<CachedAnnotation>> {
        Ok(self.ensure_cached(page)?.annotations.clone())
    }

    // ---- rendering ---------------------------------------------------------

    pub fn create_render_job(&self, page: usize) -> RenderJob {
        let s = self.settings();
        RenderJob {
            page,
            zoom: s.zoom,
            dpi: s.dpi,
            dpr: s.dpr,
            rotation: s.rotation,
            invert: s.invert,
            tint: s.tint,
            detect_urls: s.detect_urls,
            generation: self.generation(),
            revision: self.revision(page),
        }
    }

    /// Queues `job`; the result arrives as [`ModelEvent::RenderFinished`]
    /// or [`ModelEvent::RenderFailed`].
    pub fn request_page_render(self: &Arc<Self>, job: RenderJob) {
        if job.generation != self.generation() {
            debug!(page = job.page, "dropping render request for a replaced document");
            return;
        }
        self.queue.lock().request(job);
        self.start_next_render();
    }

    /// Restricts queued work to `keep`, preferring `visible`.
    pub fn set_wanted_pages(&self, visible: BTreeSet<usize>, keep: &BTreeSet<usize>) {
        let mut queue = self.queue.lock();
        queue.set_visible(visible);
        queue.prune(keep);
    }

    /// Called by the host once it has consumed a render result. Results
    /// from before a reload or close belong to a queue that no longer
    /// exists and are ignored.
    pub fn render_completed(self: &Arc<Self>, page: usize, generation: u64) {
        if generation != self.generation() {
            return;
        }
        self.queue.lock().finish(page);
        self.start_next_render();
    }

    pub fn pending_renders(&self) -> BTreeSet<usize> {
        self.queue.lock().pending_pages()
    }

    pub fn render_in_flight(&self) -> Option<usize> {
        self.queue.lock().in_flight()
    }

    fn start_next_render(self: &Arc<Self>) {
        let Some(job) = self.queue.lock().start_next() else {
            return;
        };
        let model = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            let result = {
                let _gate = model.render_gate.lock();
                model.run_job(&job)
            };
            match result {
                Ok(outcome) => {
                    let existing: Vec<Rect> = outcome.links.iter().map(|l| l.link.rect).collect();
                    model.emit(ModelEvent::RenderFinished(Box::new(outcome)));
                    if job.detect_urls {
                        model.spawn_url_detection(&job, existing);
                    }
                }
                Err(error) => {
                    warn!(page = job.page, %error, "render failed");
                    model.emit(ModelEvent::RenderFailed {
                        page: job.page,
                        generation: job.generation,
                        error,
                    });
                }
            }
        });
    }

    fn run_job(&self, job: &RenderJob) -> EngineResult<RenderOutcome> {
        if job.generation != self.generation() {
            return Err(EngineError::RenderFailed {
                page: job.page,
                reason: "document changed".into(),
            });
        }
        let entry = self.ensure_cached(job.page)?;
        execute(job, &entry).map_err(|err| EngineError::RenderFailed {
            page: job.page,
            reason: format!("{err:#}"),
        })
    }

    fn spawn_url_detection(self: &Arc<Self>, job: &RenderJob, existing: Vec<Rect>) {
        let (page, generation, revision) = (job.page, job.generation, job.revision);
        let model = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            let Some(detector) = model.url_detector.as_ref() else {
                return;
            };
            let text = match model.text_page(page) {
                Ok(text) => text,
                Err(error) => {
                    warn!(page, %error, "url detection skipped");
                    return;
                }
            };
            let links = detector.detect(&text, &existing);
            if !links.is_empty() {
                debug!(page, count = links.len(), "detected urls");
                model.emit(ModelEvent::UrlLinksDetected {
                    page,
                    generation,
                    revision,
                    links,
                });
            }
        });
    }

    // ---- text and selection ------------------------------------------------

    /// Structured text of `page`, kept for repeated selection calls.
    pub fn text_page(&self, page: usize) -> EngineResult<Arc<StructuredText>> {
        let generation = self.generation();
        if let Some((p, g, text)) = self.selection_text.lock().as_ref() {
            if *p == page && *g == generation {
                return Ok(Arc::clone(text));
            }
        }
        let backend = self.backend()?;
        let text = Arc::new(backend.text_page(page).map_err(|err| EngineError::CacheBuildFailed {
            page,
            reason: format!("{err:#}"),
        })?);
        *self.selection_text.lock() = Some((page, generation, Arc::clone(&text)));
        Ok(text)
    }

    /// Selection between two page-local logical points, snapped to `mode`.
    pub fn compute_text_selection(
        &self,
        page: usize,
        start: Point,
        end: Point,
        mode: SnapMode,
    ) -> EngineResult<Option<DeviceSelection>> {
        let m = self.logical_transform(page)?;
        let inv = m.invert().ok_or(EngineError::InvalidState("degenerate page transform"))?;
        let text = self.text_page(page)?;
        let a = inv.transform_point(start);
        let b = inv.transform_point(end);
        Ok(selection::select(&text, page, a, b, mode).map(|selection| DeviceSelection {
            quads: selection.quads.iter().map(|q| m.transform_quad(q)).collect(),
            selection,
        }))
    }

    pub fn select_word_at(&self, page: usize, p: Point) -> EngineResult<Option<DeviceSelection>> {
        self.compute_text_selection(page, p, p, SnapMode::Words)
    }

    pub fn select_line_at(&self, page: usize, p: Point) -> EngineResult<Option<DeviceSelection>> {
        self.compute_text_selection(page, p, p, SnapMode::Lines)
    }

    pub fn select_paragraph_at(&self, page: usize, p: Point) -> EngineResult<Option<DeviceSelection>> {
        self.compute_text_selection(page, p, p, SnapMode::Block)
    }

    /// Text inside a PDF-space rect.
    pub fn text_in_area(&self, page: usize, area: &Rect) -> EngineResult<String> {
        Ok(self.text_page(page)?.text_in_rect(area))
    }

    pub fn first_char_position(&self, page: usize) -> EngineResult<Option<Point>> {
        Ok(self.text_page(page)?.first_char_position())
    }

    // ---- annotations -------------------------------------------------------

    /// Applies `command`, records it for undo, and asks the host to redraw
    /// the page. A failed command is not recorded.
    #[instrument(skip(self, command), fields(page = command.page, edit = command.label()))]
    pub fn execute(&self, mut command: Command) -> EngineResult<Option<ObjectNumber>> {
        let page = command.page;
        {
            let doc = self.doc.write();
            let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
            self.require_editable(backend.as_ref())?;
            if command.document != backend.info().id {
                return Err(EngineError::InvalidState("edit targets another document"));
            }
            command
                .apply(backend.as_ref())
                .map_err(|err| EngineError::edit_failed(page, &err))?;
            self.invalidate_page_cache(page);
        }
        self.modified.store(true, Ordering::SeqCst);
        let created = command.created_id();
        self.undo.lock().push(command);
        self.emit(ModelEvent::ReloadRequested { page });
        Ok(created)
    }

    /// Reverts the newest command; `false` when there was nothing to undo.
    pub fn undo(&self) -> EngineResult<bool> {
        let doc = self.doc.write();
        let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
        let Some(command) = self.undo.lock().take_undo() else {
            return Ok(false);
        };
        let page = command.page;
        let result = command.revert(backend.as_ref());
        self.invalidate_page_cache(page);
        drop(doc);
        match result {
            Ok(()) => {
                self.undo.lock().undone(command);
                self.modified.store(true, Ordering::SeqCst);
                self.emit(ModelEvent::ReloadRequested { page });
                Ok(true)
            }
            Err(err) => {
                self.undo.lock().restore_undo(command);
                Err(EngineError::edit_failed(page, &err))
            }
        }
    }

    pub fn redo(&self) -> EngineResult<bool> {
        let doc = self.doc.write();
        let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
        let Some(mut command) = self.undo.lock().take_redo() else {
            return Ok(false);
        };
        let page = command.page;
        let result = command.apply(backend.as_ref());
        self.invalidate_page_cache(page);
        drop(doc);
        match result {
            Ok(()) => {
                self.undo.lock().redone(command);
                self.modified.store(true, Ordering::SeqCst);
                self.emit(ModelEvent::ReloadRequested { page });
                Ok(true)
            }
            Err(err) => {
                self.undo.lock().restore_redo(command);
                Err(EngineError::edit_failed(page, &err))
            }
        }
    }

    pub fn can_undo(&self) -> bool {
        self.undo.lock().can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.undo.lock().can_redo()
    }

    fn document_id(&self) -> EngineResult<crate::DocumentId> {
        Ok(self.backend()?.info().id)
    }

    pub fn add_highlight(&self, page: usize, quads: Vec<Quad>) -> EngineResult<Option<ObjectNumber>> {
        let color = self.config.colors.highlight;
        self.execute(Command::add_highlight(self.document_id()?, page, quads, color))
    }

    pub fn add_rect(&self, page: usize, rect: Rect) -> EngineResult<Option<ObjectNumber>> {
        let color = self.config.colors.annot_rect;
        self.execute(Command::add_rect(self.document_id()?, page, rect, color))
    }

    pub fn add_text(
        &self,
        page: usize,
        rect: Rect,
        contents: &str,
    ) -> EngineResult<Option<ObjectNumber>> {
        let color = self.config.colors.annot_popup;
        self.execute(Command::add_text(self.document_id()?, page, rect, contents, color))
    }

    pub fn remove_annotations(&self, page: usize, ids: &[ObjectNumber]) -> EngineResult<()> {
        let backend = self.backend()?;
        let command = Command::delete_many(backend.as_ref(), page, ids)
            .map_err(|err| EngineError::edit_failed(page, &err))?;
        self.execute(command).map(|_| ())
    }

    pub fn change_color(&self, page: usize, id: ObjectNumber, color: Color) -> EngineResult<()> {
        let backend = self.backend()?;
        let command = Command::change_color(backend.as_ref(), page, id, color)
            .map_err(|err| EngineError::edit_failed(page, &err))?;
        self.execute(command).map(|_| ())
    }

    /// Replaces a note's text. Not recorded for undo.
    pub fn set_text_annotation_contents(
        &self,
        page: usize,
        id: ObjectNumber,
        text: &str,
    ) -> EngineResult<()> {
        {
            let doc = self.doc.write();
            let backend = doc.as_ref().ok_or(EngineError::NoDocument)?;
            self.require_editable(backend.as_ref())?;
            backend
                .set_annotation_contents(page, id, text)
                .map_err(|err| EngineError::edit_failed(page, &err))?;
            self.invalidate_page_cache(page);
        }
        self.modified.store(true, Ordering::SeqCst);
        self.emit(ModelEvent::ReloadRequested { page });
        Ok(())
    }

    /// Text under every highlight, page by page. With `group_by_line` each
    /// visual line of a highlight is reported separately.
    pub fn collect_highlight_texts(&self, group_by_line: bool) -> EngineResult<Vec<HighlightText>> {
        let backend = self.backend()?;
        let mut out = Vec::new();
        for page in 0..backend.info().page_count {
            let loaded = match backend.load_page(page) {
                Ok(loaded) => loaded,
                Err(err) => {
                    warn!(page, ?err, "failed to collect highlight text");
                    continue;
                }
            };
            let highlights: Vec<_> = loaded
                .annotations
                .into_iter()
                .filter(|a| a.kind == AnnotationKind::Highlight && !a.quads.is_empty())
                .collect();
            if highlights.is_empty() {
                continue;
            }
            let text = match backend.text_page(page) {
                Ok(text) => text,
                Err(err) => {
                    warn!(page, ?err, "failed to collect highlight text");
                    continue;
                }
            };
            for annot in highlights {
                let groups = if group_by_line {
                    merge_quads_by_line(&annot.quads)
                } else {
                    merge_quads(&annot.quads).into_iter().collect()
                };
                for quad in groups {
                    let rect = quad.bounds();
                    if !rect.is_valid() {
                        continue;
                    }
                    let found = text.text_in_rect(&rect).trim().to_owned();
                    if !found.is_empty() {
                        out.push(HighlightText {
                            page,
                            id: annot.id,
                            text: found,
                            quad,
                        });
                    }
                }
            }
        }
        Ok(out)
    }

    // ---- search ------------------------------------------------------------

    fn build_text_cache(&self, pages: &[usize]) -> EngineResult<()> {
        let missing = self.text_cache.lock().missing(pages);
        if missing.is_empty() {
            return Ok(());
        }
        let backend = self.backend()?;
        for page in missing {
            match backend.text_page(page) {
                Ok(text) => {
                    self.text_cache
                        .lock()
                        .insert(page, TextCacheEntry::from_text(&text));
                }
                Err(err) => warn!(page, ?err, "failed to extract page text"),
            }
        }
        Ok(())
    }

    /// Hits for `query` on one page, building its text stream if needed.
    pub fn search_page(&self, page: usize, query: &SearchQuery) -> EngineResult<Vec<SearchHit>> {
        self.build_text_cache(&[page])?;
        let entry = self.text_cache.lock().get(page);
        Ok(entry.map_or_else(Vec::new, |entry| search_stream(&entry, page, query)))
    }

    pub fn text_cache_len(&self) -> usize {
        self.text_cache.lock().len()
    }

    /// Scans every page in the background. A newer search supersedes this
    /// one; its results are then never delivered.
    pub fn search(self: &Arc<Self>, query: SearchQuery) -> u64 {
        let pages: Vec<usize> = (0..self.page_count()).collect();
        self.spawn_search(query, pages)
    }

    pub fn search_in_page(self: &Arc<Self>, page: usize, query: SearchQuery) -> u64 {
        let pages = if page < self.page_count() { vec![page] } else { Vec::new() };
        self.spawn_search(query, pages)
    }

    pub fn search_generation(&self) -> u64 {
        self.search_generation.load(Ordering::SeqCst)
    }

    fn spawn_search(self: &Arc<Self>, query: SearchQuery, pages: Vec<usize>) -> u64 {
        let generation = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let model = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            let mut found = std::collections::BTreeMap::new();
            if !query.term.is_empty() {
                for page in pages {
                    if model.search_generation() != generation {
                        debug!(generation, "search superseded");
                        return;
                    }
                    match model.search_page(page, &query) {
                        Ok(hits) if !hits.is_empty() => {
                            found.insert(page, hits);
                        }
                        Ok(_) => {}
                        Err(error) => warn!(page, %error, "search skipped page"),
                    }
                }
            }
            if model.search_generation() != generation {
                return;
            }
            let results = SearchResults::new(query, found);
            info!(hits = results.len(), "search finished");
            model.emit(ModelEvent::SearchResultsReady {
                generation,
                results,
            });
        });
        generation
    }

    // ---- document extras ---------------------------------------------------

    pub fn outline(&self) -> EngineResult<Vec<OutlineItem>> {
        if let Some(outline) = self.outline.lock().as_ref() {
            return Ok(outline.clone());
        }
        let backend = self.backend()?;
        let outline = backend.outline().map_err(|err| {
            let path = backend.info().path.clone();
            EngineError::open_failed(path, &err)
        })?;
        *self.outline.lock() = Some(outline.clone());
        Ok(outline)
    }

    /// Key/value description of the document for a properties view.
    pub fn properties(&self) -> EngineResult<Vec<(String, String)>> {
        let backend = self.backend()?;
        let info = backend.info();
        let mut props = vec![
            ("File Path".to_owned(), info.path.display().to_string()),
            ("File Type".to_owned(), info.kind.to_string()),
            ("Encrypted".to_owned(), if info.encrypted { "Yes" } else { "No" }.to_owned()),
            ("Page Count".to_owned(), info.page_count.to_string()),
        ];
        let meta = &info.metadata;
        let fields = [
            ("Title", &meta.title),
            ("Author", &meta.author),
            ("Subject", &meta.subject),
            ("Creator", &meta.creator),
            ("Producer", &meta.producer),
            ("CreationDate", &meta.creation_date),
            ("ModDate", &meta.modification_date),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                props.push((key.to_owned(), value.clone()));
            }
        }
        if !meta.keywords.is_empty() {
            props.push(("Keywords".to_owned(), meta.keywords.join(", ")));
        }
        if let Some(version) = &info.pdf_version {
            props.push(("PDF Version".to_owned(), version.clone()));
        }
        Ok(props)
    }
}

fn merge_quads(quads: &[Quad]) -> Option<Quad> {
    quads
        .iter()
        .map(Quad::bounds)
        .reduce(|a, b| a.union(&b))
        .map(|r| Quad::from_rect(&r))
}

/// Unions quads that sit on the same visual line.
fn merge_quads_by_line(quads: &[Quad]) -> Vec<Quad> {
    let mut rects: Vec<Rect> = quads.iter().map(Quad::bounds).collect();
    rects.sort_by(|a, b| a.y0.total_cmp(&b.y0).then(a.x0.total_cmp(&b.x0)));
    let mut lines: Vec<Rect> = Vec::new();
    for rect in rects {
        match lines.last_mut() {
            Some(line) if (rect.center().y - line.center().y).abs() < line.height().max(1.0) * 0.5 => {
                *line = line.union(&rect);
            }
            _ => lines.push(rect),
        }
    }
    lines.iter().map(Quad::from_rect).collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use super::*;
    use crate::test_support::{FakeDocument, FakeProvider};

    async fn wait_for(
        rx: &mut UnboundedReceiver<ModelEvent>,
        mut pred: impl FnMut(&ModelEvent) -> bool,
    ) -> ModelEvent {
        loop {
            let event = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for an event")
                .expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    }

    async fn open(doc: &Arc<FakeDocument>) -> (Arc<DocumentModel>, UnboundedReceiver<ModelEvent>) {
        let (model, mut rx) =
            DocumentModel::new(FakeProvider::with(Arc::clone(doc)), EngineConfig::default()).unwrap();
        model.open_async(doc.info().path.clone(), None);
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::OpenFinished { .. }), "{event:?}");
        (model, rx)
    }

    async fn render(
        model: &Arc<DocumentModel>,
        rx: &mut UnboundedReceiver<ModelEvent>,
        page: usize,
    ) -> RenderOutcome {
        model.request_page_render(model.create_render_job(page));
        let event = wait_for(rx, |e| {
            matches!(e, ModelEvent::RenderFinished(o) if o.job.page == page)
                || matches!(e, ModelEvent::RenderFailed { .. })
        })
        .await;
        match &event {
            ModelEvent::RenderFinished(o) => model.render_completed(page, o.job.generation),
            ModelEvent::RenderFailed { generation, .. } => model.render_completed(page, *generation),
            _ => {}
        }
        match event {
            ModelEvent::RenderFinished(outcome) => *outcome,
            other => panic!("render failed: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_reports_page_count_and_first_bounds() {
        let doc = FakeDocument::builder().pages(3).page_size(200.0, 300.0).build();
        let (model, _rx) = open(&doc).await;

        assert!(model.is_open());
        assert_eq!(model.page_count(), 3);
        assert_eq!(model.page_bounds(2).unwrap(), Rect::new(0.0, 0.0, 200.0, 300.0));
        assert!(matches!(
            model.page_bounds(3),
            Err(EngineError::PageOutOfRange { page: 3, page_count: 3 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_path_fails_to_open() {
        let doc = FakeDocument::builder().build();
        let (model, mut rx) =
            DocumentModel::new(FakeProvider::with(doc), EngineConfig::default()).unwrap();
        model.open_async("/nonexistent/lektra/missing.pdf", None);

        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::OpenFailed(EngineError::OpenFailed { .. })));
        assert!(!model.is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn wrong_password_keeps_the_document_parked() {
        let doc = FakeDocument::builder()
            .path("/nonexistent/lektra/locked.pdf")
            .pages(2)
            .password("s3cret")
            .build();
        let (model, mut rx) =
            DocumentModel::new(FakeProvider::with(Arc::clone(&doc)), EngineConfig::default())
                .unwrap();
        model.open_async(doc.info().path.clone(), None);

        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::PasswordRequired { .. }));
        assert!(model.is_awaiting_password());

        model.submit_password("nope").unwrap();
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::PasswordRejected { .. }));
        assert!(model.is_awaiting_password());

        model.submit_password("s3cret").unwrap();
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::OpenFinished { page_count: 2 }));
        assert_eq!(doc.auth_attempts(), 2);
        assert!(model.is_open());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn password_supplied_up_front_skips_the_prompt() {
        let doc = FakeDocument::builder()
            .path("/nonexistent/lektra/locked.pdf")
            .password("s3cret")
            .build();
        let (model, mut rx) =
            DocumentModel::new(FakeProvider::with(Arc::clone(&doc)), EngineConfig::default())
                .unwrap();
        model.open_async(doc.info().path.clone(), Some("s3cret".into()));

        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::OpenFinished { page_count: 1 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelling_password_entry_fails_the_open() {
        let doc = FakeDocument::builder()
            .path("/nonexistent/lektra/locked.pdf")
            .password("s3cret")
            .build();
        let (model, mut rx) =
            DocumentModel::new(FakeProvider::with(Arc::clone(&doc)), EngineConfig::default())
                .unwrap();
        model.open_async(doc.info().path.clone(), None);
        wait_for(&mut rx, |e| matches!(e, ModelEvent::PasswordRequired { .. })).await;

        model.cancel_open();
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::OpenFailed(_)));
        assert!(!model.is_open());
        assert!(matches!(
            model.submit_password("s3cret"),
            Err(EngineError::InvalidState(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn render_is_sized_in_device_pixels() {
        let doc = FakeDocument::builder().page_size(100.0, 200.0).build();
        let (model, mut rx) = open(&doc).await;
        model.set_dpr(2.0);
        model.set_zoom(1.5);

        let outcome = render(&model, &mut rx, 0).await;
        assert_eq!(outcome.image.width, 300);
        assert_eq!(outcome.image.height, 600);
        assert_eq!(outcome.image.device_pixel_ratio, 2.0);
        assert_eq!(outcome.job.generation, model.generation());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn renders_run_one_at_a_time() {
        let doc = FakeDocument::builder().pages(6).page_size(50.0, 50.0).build();
        let (model, mut rx) = open(&doc).await;

        for page in 0..6 {
            model.request_page_render(model.create_render_job(page));
        }
        let mut done = BTreeSet::new();
        while done.len() < 6 {
            if let ModelEvent::RenderFinished(outcome) =
                wait_for(&mut rx, |e| matches!(e, ModelEvent::RenderFinished(_))).await
            {
                done.insert(outcome.job.page);
                model.render_completed(outcome.job.page, outcome.job.generation);
            }
        }
        assert_eq!(doc.max_concurrent_replays(), 1);
        assert_eq!(doc.replays(), 6);
        assert!(model.render_in_flight().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failing_page_reports_render_failure() {
        let doc = FakeDocument::builder().pages(3).failing_page(1).build();
        let (model, mut rx) = open(&doc).await;

        assert!(matches!(
            model.ensure_cached(1),
            Err(EngineError::CacheBuildFailed { page: 1, .. })
        ));
        model.request_page_render(model.create_render_job(1));
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::RenderFailed { page: 1, .. }));
        model.render_completed(1, model.generation());
        assert!(model.ensure_cached(2).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unmeasured_pages_use_the_first_page_size() {
        let doc = FakeDocument::builder()
            .pages(4)
            .sized_page(3, 300.0, 400.0)
            .build();
        let (model, _rx) = open(&doc).await;

        assert!(!model.page_bounds_known(3));
        assert_eq!(model.page_bounds(3).unwrap(), Rect::new(0.0, 0.0, 612.0, 792.0));
        model.ensure_cached(3).unwrap();
        assert!(model.page_bounds_known(3));
        assert_eq!(model.page_bounds(3).unwrap(), Rect::new(0.0, 0.0, 300.0, 400.0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn edit_during_render_keeps_the_running_entry_alive() {
        let doc = FakeDocument::builder().page_size(100.0, 100.0).build();
        let (model, mut rx) = open(&doc).await;

        let gate = doc.replay_gate.lock();
        model.request_page_render(model.create_render_job(0));
        while !model.cached_pages().contains(&0) {
            sleep(Duration::from_millis(5)).await;
        }

        model.add_rect(0, Rect::new(10.0, 10.0, 30.0, 30.0)).unwrap();
        assert!(model.cached_pages().is_empty());
        assert_eq!(doc.live_display_lists(), 1);
        drop(gate);

        let event = wait_for(&mut rx, |e| matches!(e, ModelEvent::RenderFinished(_))).await;
        let ModelEvent::RenderFinished(stale) = event else {
            unreachable!()
        };
        assert!(stale.annotations.is_empty());
        model.render_completed(0, stale.job.generation);

        let fresh = render(&model, &mut rx, 0).await;
        assert_eq!(fresh.annotations.len(), 1);
        assert_eq!(doc.live_display_lists(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn undo_and_redo_restore_the_page() {
        let doc = FakeDocument::builder().text(0, &["hello world"]).build();
        let (model, mut rx) = open(&doc).await;
        let before = doc.serialize_page(0);

        let quad = Quad::from_rect(&FakeDocument::text_rect(0, 0, 5));
        let id = model.add_highlight(0, vec![quad]).unwrap().unwrap();
        let after = doc.serialize_page(0);
        assert_ne!(before, after);
        assert!(model.is_modified());
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::ReloadRequested { page: 0 }));

        assert!(model.undo().unwrap());
        assert_eq!(doc.serialize_page(0), before);
        assert!(model.can_redo());

        assert!(model.redo().unwrap());
        assert_eq!(doc.serialize_page(0), after);
        assert_eq!(model.annotations_on(0).unwrap()[0].id, id);
        assert!(!model.redo().unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn deletion_and_recolour_are_undoable() {
        let doc = FakeDocument::builder().build();
        let (model, _rx) = open(&doc).await;
        let a = model.add_rect(0, Rect::new(0.0, 0.0, 10.0, 10.0)).unwrap().unwrap();
        let b = model
            .add_text(0, Rect::new(20.0, 20.0, 40.0, 40.0), "note")
            .unwrap()
            .unwrap();
        let populated = doc.serialize_page(0);

        model.change_color(0, a, Color::rgba(0.0, 1.0, 0.0, 0.5)).unwrap();
        model.remove_annotations(0, &[a, b]).unwrap();
        assert!(model.annotations_on(0).unwrap().is_empty());

        model.undo().unwrap();
        model.undo().unwrap();
        assert_eq!(doc.serialize_page(0), populated);
        assert!(model.remove_annotations(0, &[]).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_only_formats_refuse_edits() {
        let doc = FakeDocument::builder().path("/nonexistent/lektra/book.epub").build();
        let (model, _rx) = open(&doc).await;

        assert!(matches!(
            model.add_rect(0, Rect::new(0.0, 0.0, 5.0, 5.0)),
            Err(EngineError::InvalidState(_))
        ));
        assert!(matches!(model.save_changes(), Err(EngineError::InvalidState(_))));
        assert!(!model.can_undo());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn save_decrypt_and_encrypt_write_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let doc = FakeDocument::builder().path(dir.path().join("doc.pdf")).build();
        let (model, _rx) = open(&doc).await;
        model.add_rect(0, Rect::new(0.0, 0.0, 5.0, 5.0)).unwrap();

        let copy = dir.path().join("copy.pdf");
        model.save_as(&copy).unwrap();
        assert!(copy.exists());
        assert!(!model.is_modified());

        model.decrypt().unwrap();
        model
            .encrypt(&EncryptInfo {
                user_password: "pw".into(),
                owner_password: None,
            })
            .unwrap();

        let saves = doc.saves.lock();
        assert_eq!(saves.len(), 2);
        assert!(!saves[0].1.incremental);
        assert!(matches!(saves[1].1.encryption, EncryptionChange::Remove));
        assert_eq!(doc.encryptions.lock()[0].1, "pw");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn close_drops_every_cache() {
        let doc = FakeDocument::builder().pages(4).build();
        let (model, _rx) = open(&doc).await;
        for page in 0..4 {
            model.ensure_cached(page).unwrap();
        }
        model.add_rect(1, Rect::new(0.0, 0.0, 5.0, 5.0)).unwrap();
        model.search_page(0, &SearchQuery::smart("x")).unwrap();

        model.close();
        assert!(!model.is_open());
        assert_eq!(model.page_count(), 0);
        assert_eq!(model.page_cache_len(), 0);
        assert_eq!(model.text_cache_len(), 0);
        assert_eq!(doc.live_display_lists(), 0);
        assert!(!model.can_undo());
        assert!(!model.is_modified());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_discards_work_from_before_the_swap() {
        let doc = FakeDocument::builder().pages(2).build();
        let (model, mut rx) = open(&doc).await;
        model.ensure_cached(0).unwrap();
        let old_job = model.create_render_job(1);

        model.reload_document().unwrap();
        let event = wait_for(&mut rx, |_| true).await;
        assert!(matches!(event, ModelEvent::Reloaded { page_count: 2 }));
        assert_eq!(model.page_cache_len(), 0);

        model.request_page_render(old_job);
        assert!(model.pending_renders().is_empty());
        assert!(model.render_in_flight().is_none());
        let fresh = render(&model, &mut rx, 1).await;
        assert_eq!(fresh.job.generation, model.generation());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn search_collects_hits_across_pages() {
        let doc = FakeDocument::builder()
            .pages(3)
            .text(0, &["foo bar foo"])
            .text(2, &["food"])
            .build();
        let (model, mut rx) = open(&doc).await;

        let generation = model.search(SearchQuery::smart("foo"));
        let event = wait_for(&mut rx, |e| matches!(e, ModelEvent::SearchResultsReady { .. })).await;
        let ModelEvent::SearchResultsReady { generation: got, results } = event else {
            unreachable!()
        };
        assert_eq!(got, generation);
        assert_eq!(results.len(), 3);
        assert_eq!(results.hits_on(0).len(), 2);
        assert_eq!(results.pages.keys().copied().collect::<Vec<_>>(), vec![0, 2]);

        model.search(SearchQuery::smart(""));
        let event = wait_for(&mut rx, |e| matches!(e, ModelEvent::SearchResultsReady { .. })).await;
        assert!(matches!(event, ModelEvent::SearchResultsReady { results, .. } if results.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn pixel_and_pdf_space_round_trip() {
        let doc = FakeDocument::builder().page_size(200.0, 100.0).build();
        let (model, _rx) = open(&doc).await;
        model.set_dpr(2.0);
        let points = [
            Point::new(0.0, 0.0),
            Point::new(200.0, 100.0),
            Point::new(37.5, 81.25),
        ];

        for zoom in [0.5, 1.0, 2.0] {
            model.set_zoom(zoom);
            for rotation in [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270] {
                model.set_rotation(rotation);
                let (w, h) = if rotation.is_sideways() {
                    (100.0 * zoom, 200.0 * zoom)
                } else {
                    (200.0 * zoom, 100.0 * zoom)
                };
                for p in points {
                    let px = model.to_pixel_space(0, p).unwrap();
                    assert!(
                        (-1.0..=w + 1.0).contains(&px.x) && (-1.0..=h + 1.0).contains(&px.y),
                        "{p:?} at zoom {zoom} {rotation:?} landed outside the page: {px:?}"
                    );
                    let back = model.to_pdf_space(0, px).unwrap();
                    assert!(
                        (back.x - p.x).abs() < 0.01 && (back.y - p.y).abs() < 0.01,
                        "{p:?} at zoom {zoom} {rotation:?} came back as {back:?}"
                    );
                }
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn double_click_selects_a_word() {
        let doc = FakeDocument::builder().text(0, &["hello world"]).build();
        let (model, _rx) = open(&doc).await;

        let hit = model.select_word_at(0, Point::new(55.0, 15.0)).unwrap().unwrap();
        assert_eq!(hit.selection.text, "world");
        assert_eq!(hit.quads.len(), hit.selection.quads.len());
        assert_eq!(
            model.text_in_area(0, &FakeDocument::text_rect(0, 0, 5)).unwrap(),
            "hello"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn highlight_text_can_be_grouped_by_line() {
        let doc = FakeDocument::builder().text(0, &["hello world", "second line"]).build();
        let (model, _rx) = open(&doc).await;
        let quads = vec![
            Quad::from_rect(&FakeDocument::text_rect(0, 0, 5)),
            Quad::from_rect(&FakeDocument::text_rect(1, 0, 6)),
        ];
        model.add_highlight(0, quads).unwrap();

        let lines = model.collect_highlight_texts(true).unwrap();
        let texts: Vec<&str> = lines.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "second"]);

        let merged = model.collect_highlight_texts(false).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "hello\nsecond");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn properties_list_the_info_dictionary() {
        let doc = FakeDocument::builder().pages(3).build();
        let (model, _rx) = open(&doc).await;
        let props = model.properties().unwrap();

        assert!(props.contains(&("Page Count".into(), "3".into())));
        assert!(props.contains(&("Title".into(), "Fake".into())));
        assert!(props.contains(&("PDF Version".into(), "1.7".into())));
    }
}
