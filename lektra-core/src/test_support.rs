//! In-memory backend for exercising the engine without a native library.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::backend::{
    AnnotationKind, AuthOutcome, DisplayList, DocumentBackend, DocumentProvider, EncryptInfo,
    LoadedPage, NewAnnotation, ObjectNumber, OpenOutcome, OutlineItem, PendingDocument,
    RawAnnotation, RawLink, WriteOptions,
};
use crate::geometry::{page_to_device, Quad, Rect, Rotation};
use crate::text::{StructuredText, TextPageBuilder};
use crate::types::{Color, DocumentInfo, DocumentMetadata, FileKind, RenderImage};

pub const TEXT_LEFT: f32 = 10.0;
pub const TEXT_TOP: f32 = 10.0;
pub const CHAR_WIDTH: f32 = 6.0;
pub const LINE_GAP: f32 = 14.0;

#[derive(Clone)]
struct FakePage {
    width: f32,
    height: f32,
    lines: Vec<String>,
    links: Vec<RawLink>,
}

#[derive(Default)]
struct Probes {
    live_lists: AtomicUsize,
    active_replays: AtomicUsize,
    max_active_replays: AtomicUsize,
    replays: AtomicUsize,
    loads: AtomicUsize,
    auth_attempts: AtomicUsize,
}

pub struct FakeDocument {
    info: DocumentInfo,
    pages: Vec<FakePage>,
    annotations: Mutex<BTreeMap<usize, Vec<RawAnnotation>>>,
    next_id: AtomicU32,
    failing: HashSet<usize>,
    password: Option<String>,
    outline: Vec<OutlineItem>,
    probes: Arc<Probes>,
    /// Held by tests to stall replays.
    pub replay_gate: Arc<Mutex<()>>,
    pub saves: Mutex<Vec<(PathBuf, WriteOptions)>>,
    pub encryptions: Mutex<Vec<(PathBuf, String)>>,
}

pub struct FakeDocumentBuilder {
    path: PathBuf,
    kind: FileKind,
    pages: Vec<FakePage>,
    annotations: BTreeMap<usize, Vec<RawAnnotation>>,
    failing: HashSet<usize>,
    password: Option<String>,
    outline: Vec<OutlineItem>,
}

impl FakeDocument {
    pub fn builder() -> FakeDocumentBuilder {
        FakeDocumentBuilder {
            path: PathBuf::from("/nonexistent/lektra/fake.pdf"),
            kind: FileKind::Pdf,
            pages: vec![page(612.0, 792.0)],
            annotations: BTreeMap::new(),
            failing: HashSet::new(),
            password: None,
            outline: Vec::new(),
        }
    }

    pub fn live_display_lists(&self) -> usize {
        self.probes.live_lists.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_replays(&self) -> usize {
        self.probes.max_active_replays.load(Ordering::SeqCst)
    }

    pub fn replays(&self) -> usize {
        self.probes.replays.load(Ordering::SeqCst)
    }

    pub fn page_loads(&self) -> usize {
        self.probes.loads.load(Ordering::SeqCst)
    }

    pub fn auth_attempts(&self) -> usize {
        self.probes.auth_attempts.load(Ordering::SeqCst)
    }

    pub fn annotations_on(&self, page: usize) -> Vec<RawAnnotation> {
        self.annotations.lock().get(&page).cloned().unwrap_or_default()
    }

    /// Stable textual form of a page's annotations, standing in for the
    /// written file.
    pub fn serialize_page(&self, page: usize) -> String {
        let mut annots = self.annotations_on(page);
        annots.sort_by_key(|a| a.id);
        annots
            .iter()
            .map(|a| format!("{a:?}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Rect of line `line`, columns `from..to`, in page space.
    pub fn text_rect(line: usize, from: usize, to: usize) -> Rect {
        let top = TEXT_TOP + line as f32 * LINE_GAP;
        Rect::new(
            TEXT_LEFT + from as f32 * CHAR_WIDTH,
            top,
            TEXT_LEFT + to as f32 * CHAR_WIDTH,
            top + 10.0,
        )
    }

    fn page(&self, page: usize) -> Result<&FakePage> {
        self.pages
            .get(page)
            .ok_or_else(|| anyhow!("page {page} out of range"))
    }
}

fn page(width: f32, height: f32) -> FakePage {
    FakePage {
        width,
        height,
        lines: Vec::new(),
        links: Vec::new(),
    }
}

impl FakeDocumentBuilder {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self.kind = FileKind::from_path(&self.path);
        self
    }

    pub fn pages(mut self, count: usize) -> Self {
        let (w, h) = self
            .pages
            .first()
            .map(|p| (p.width, p.height))
            .unwrap_or((612.0, 792.0));
        self.pages = (0..count).map(|_| page(w, h)).collect();
        self
    }

    pub fn page_size(mut self, width: f32, height: f32) -> Self {
        for p in &mut self.pages {
            p.width = width;
            p.height = height;
        }
        self
    }

    pub fn sized_page(mut self, index: usize, width: f32, height: f32) -> Self {
        if let Some(p) = self.pages.get_mut(index) {
            p.width = width;
            p.height = height;
        }
        self
    }

    pub fn text(mut self, index: usize, lines: &[&str]) -> Self {
        if let Some(p) = self.pages.get_mut(index) {
            p.lines = lines.iter().map(|l| (*l).to_owned()).collect();
        }
        self
    }

    pub fn link(mut self, index: usize, link: RawLink) -> Self {
        if let Some(p) = self.pages.get_mut(index) {
            p.links.push(link);
        }
        self
    }

    pub fn annotation(mut self, index: usize, annotation: RawAnnotation) -> Self {
        self.annotations.entry(index).or_default().push(annotation);
        self
    }

    pub fn failing_page(mut self, index: usize) -> Self {
        self.failing.insert(index);
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn outline(mut self, items: Vec<OutlineItem>) -> Self {
        self.outline = items;
        self
    }

    pub fn build(self) -> Arc<FakeDocument> {
        let next_id = self
            .annotations
            .values()
            .flatten()
            .map(|a| a.id.0 + 1)
            .max()
            .unwrap_or(1);
        Arc::new(FakeDocument {
            info: DocumentInfo {
                id: crate::document_id_for_path(&self.path),
                path: self.path,
                kind: self.kind,
                page_count: self.pages.len(),
                encrypted: self.password.is_some(),
                pdf_version: Some("1.7".into()),
                metadata: DocumentMetadata {
                    title: Some("Fake".into()),
                    ..DocumentMetadata::default()
                },
            },
            pages: self.pages,
            annotations: Mutex::new(self.annotations),
            next_id: AtomicU32::new(next_id),
            failing: self.failing,
            password: self.password,
            outline: self.outline,
            probes: Arc::new(Probes::default()),
            replay_gate: Arc::new(Mutex::new(())),
            saves: Mutex::new(Vec::new()),
            encryptions: Mutex::new(Vec::new()),
        })
    }
}

/// Paints a white page with filled annotation rects.
struct FakeList {
    bounds: Rect,
    annotations: Vec<RawAnnotation>,
    probes: Arc<Probes>,
    gate: Arc<Mutex<()>>,
}

impl FakeList {
    fn new(
        bounds: Rect,
        annotations: Vec<RawAnnotation>,
        probes: Arc<Probes>,
        gate: Arc<Mutex<()>>,
    ) -> Self {
        probes.live_lists.fetch_add(1, Ordering::SeqCst);
        Self {
            bounds,
            annotations,
            probes,
            gate,
        }
    }
}

impl Drop for FakeList {
    fn drop(&mut self) {
        self.probes.live_lists.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DisplayList for FakeList {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn replay(
        &self,
        scale: f32,
        rotation: Rotation,
        width: u32,
        height: u32,
    ) -> Result<RenderImage> {
        let active = self.probes.active_replays.fetch_add(1, Ordering::SeqCst) + 1;
        self.probes
            .max_active_replays
            .fetch_max(active, Ordering::SeqCst);
        let _gate = self.gate.lock();

        let mut image = RenderImage::filled(width, height, Color::WHITE);
        let ctm = page_to_device(&self.bounds, scale, rotation);
        for annot in &self.annotations {
            let color = annot.interior.or(annot.color).unwrap_or(Color::BLACK);
            let px = color.to_rgba8();
            let r = ctm.transform_rect(&annot.rect).round_out();
            for y in r.y0.max(0)..r.y1.min(height as i32) {
                for x in r.x0.max(0)..r.x1.min(width as i32) {
                    let i = (y as usize * width as usize + x as usize) * 4;
                    image.pixels[i..i + 3].copy_from_slice(&px[..3]);
                }
            }
        }

        self.probes.replays.fetch_add(1, Ordering::SeqCst);
        self.probes.active_replays.fetch_sub(1, Ordering::SeqCst);
        Ok(image)
    }
}

impl DocumentBackend for FakeDocument {
    fn info(&self) -> &DocumentInfo {
        &self.info
    }

    fn page_bounds(&self, page: usize) -> Result<Rect> {
        let p = self.page(page)?;
        Ok(Rect::new(0.0, 0.0, p.width, p.height))
    }

    fn load_page(&self, page: usize) -> Result<LoadedPage> {
        if self.failing.contains(&page) {
            bail!("page {page} is damaged");
        }
        self.probes.loads.fetch_add(1, Ordering::SeqCst);
        let bounds = self.page_bounds(page)?;
        let annotations = self.annotations_on(page);
        Ok(LoadedPage {
            bounds,
            display_list: Arc::new(FakeList::new(
                bounds,
                annotations.clone(),
                Arc::clone(&self.probes),
                Arc::clone(&self.replay_gate),
            )),
            links: self.page(page)?.links.clone(),
            annotations,
        })
    }

    fn text_page(&self, page: usize) -> Result<StructuredText> {
        let p = self.page(page)?;
        let mut builder = TextPageBuilder::new();
        for (li, line) in p.lines.iter().enumerate() {
            for (ci, c) in line.chars().enumerate() {
                builder.push(c, Quad::from_rect(&FakeDocument::text_rect(li, ci, ci + 1)));
            }
            builder.push('\n', Quad::default());
        }
        Ok(builder.finish())
    }

    fn outline(&self) -> Result<Vec<OutlineItem>> {
        Ok(self.outline.clone())
    }

    fn add_annotation(&self, page: usize, new: &NewAnnotation) -> Result<ObjectNumber> {
        self.page(page)?;
        let id = match new.id {
            Some(id) => id,
            None => ObjectNumber(self.next_id.fetch_add(1, Ordering::SeqCst)),
        };
        let rect = if new.quads.is_empty() {
            new.rect
        } else {
            new.quads
                .iter()
                .map(Quad::bounds)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(new.rect)
        };
        self.annotations.lock().entry(page).or_default().push(RawAnnotation {
            id,
            kind: new.kind,
            rect,
            color: new.stroke,
            interior: new.interior,
            opacity: new.opacity,
            contents: new.contents.clone(),
            quads: new.quads.clone(),
        });
        Ok(id)
    }

    fn remove_annotations(&self, page: usize, ids: &[ObjectNumber]) -> Result<()> {
        let mut annots = self.annotations.lock();
        let list = annots.entry(page).or_default();
        list.retain(|a| !ids.contains(&a.id));
        Ok(())
    }

    fn annotation(&self, page: usize, id: ObjectNumber) -> Result<RawAnnotation> {
        self.annotations_on(page)
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| anyhow!("no annotation {} on page {page}", id.0))
    }

    fn set_annotation_contents(&self, page: usize, id: ObjectNumber, text: &str) -> Result<()> {
        let mut annots = self.annotations.lock();
        let annot = annots
            .get_mut(&page)
            .and_then(|l| l.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| anyhow!("no annotation {} on page {page}", id.0))?;
        annot.contents = Some(text.to_owned());
        Ok(())
    }

    fn set_annotation_color(&self, page: usize, id: ObjectNumber, color: Color) -> Result<()> {
        let mut annots = self.annotations.lock();
        let annot = annots
            .get_mut(&page)
            .and_then(|l| l.iter_mut().find(|a| a.id == id))
            .ok_or_else(|| anyhow!("no annotation {} on page {page}", id.0))?;
        match annot.kind {
            AnnotationKind::Square | AnnotationKind::Text => {
                annot.interior = Some(color.with_alpha(1.0))
            }
            _ => annot.color = Some(color.with_alpha(1.0)),
        }
        annot.opacity = color.a;
        Ok(())
    }

    fn save(&self, path: &Path, options: &WriteOptions) -> Result<()> {
        let body = (0..self.pages.len())
            .map(|p| self.serialize_page(p))
            .collect::<Vec<_>>()
            .join("\n");
        fs::write(path, body)?;
        self.saves.lock().push((path.to_owned(), options.clone()));
        Ok(())
    }

    fn encrypt(&self, path: &Path, info: &EncryptInfo) -> Result<()> {
        fs::write(path, b"encrypted")?;
        self.encryptions
            .lock()
            .push((path.to_owned(), info.user_password.clone()));
        Ok(())
    }
}

struct FakePending {
    doc: Arc<FakeDocument>,
}

impl PendingDocument for FakePending {
    fn path(&self) -> &Path {
        &self.doc.info.path
    }

    fn authenticate(self: Box<Self>, password: &str) -> Result<AuthOutcome> {
        self.doc.probes.auth_attempts.fetch_add(1, Ordering::SeqCst);
        if self.doc.password.as_deref() == Some(password) {
            Ok(AuthOutcome::Ready(self.doc.clone()))
        } else {
            Ok(AuthOutcome::Rejected(self))
        }
    }
}

/// Hands out registered fake documents by path.
#[derive(Default)]
pub struct FakeProvider {
    docs: Mutex<HashMap<PathBuf, Arc<FakeDocument>>>,
}

impl FakeProvider {
    pub fn with(doc: Arc<FakeDocument>) -> Arc<Self> {
        let provider = Self::default();
        provider.insert(doc);
        Arc::new(provider)
    }

    pub fn insert(&self, doc: Arc<FakeDocument>) {
        self.docs.lock().insert(doc.info.path.clone(), doc);
    }
}

#[async_trait]
impl DocumentProvider for FakeProvider {
    async fn open(&self, path: &Path) -> Result<OpenOutcome> {
        let doc = self
            .docs
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("cannot open {}: no such file", path.display()))?;
        if doc.password.is_some() {
            Ok(OpenOutcome::NeedsPassword(Box::new(FakePending { doc })))
        } else {
            Ok(OpenOutcome::Ready(doc))
        }
    }
}
