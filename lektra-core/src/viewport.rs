//! The scrolling view over one open document.
//!
//! A [`Viewport`] owns the page slots placed in scene space, tracks which of
//! them are visible, keeps the user's focus fixed across zoom and rotation,
//! and folds [`ModelEvent`]s into slot updates. It lives on the host's UI
//! thread; the host forwards model events through [`Viewport::handle_event`]
//! and composites [`Viewport::frame`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backend::ObjectNumber;
use crate::document::{DeviceSelection, DocumentModel, ModelEvent};
use crate::error::{EngineError, EngineResult};
use crate::geometry::{Matrix, Point, Rect, Rotation};
use crate::history::LocationHistory;
use crate::layout::PageLayout;
use crate::links::{self, HintInput, HintMode, LinkAction, LinkHints};
use crate::page_cache::{CachedAnnotation, CachedLink};
use crate::render::{RenderJob, RenderOutcome};
use crate::search::{FlatHitRef, SearchCursor, SearchHit, SearchQuery, SearchResults};
use crate::selection::{self, map_region, Region, SnapMode, TextSelection};
use crate::types::{Color, FitMode, LayoutMode, PageLocation, RenderImage};

const MARKER_SIZE: f32 = 8.0;
const NOTE_SIZE: f32 = 20.0;

#[derive(Debug, Clone)]
pub enum SlotItem {
    /// Nothing rendered yet; drawn as a flat page-coloured box.
    Placeholder,
    Image {
        image: Arc<RenderImage>,
        job: RenderJob,
    },
}

/// One page placed in the scene. Links and annotations are kept in page
/// space and mapped through the current transform when used.
#[derive(Debug, Clone)]
pub struct PageSlot {
    pub page: usize,
    pub scene_rect: Rect,
    pub item: SlotItem,
    pub links: Vec<CachedLink>,
    pub annotations: Vec<CachedAnnotation>,
    requested: Option<RenderJob>,
    failed: Option<RenderJob>,
}

impl PageSlot {
    fn placeholder(page: usize, scene_rect: Rect) -> Self {
        Self {
            page,
            scene_rect,
            item: SlotItem::Placeholder,
            links: Vec::new(),
            annotations: Vec::new(),
            requested: None,
            failed: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self.item, SlotItem::Placeholder)
    }

    pub fn image(&self) -> Option<&Arc<RenderImage>> {
        match &self.item {
            SlotItem::Image { image, .. } => Some(image),
            SlotItem::Placeholder => None,
        }
    }

    fn needs_render(&self, wanted: &RenderJob) -> bool {
        let done = matches!(&self.item, SlotItem::Image { job, .. } if job.same_output(wanted));
        let asked = self.requested.as_ref().is_some_and(|j| j.same_output(wanted));
        let failed = self.failed.as_ref().is_some_and(|j| j.same_output(wanted));
        !done && !asked && !failed
    }
}

/// Notifications for the host, drained with [`Viewport::take_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    PageChanged { page: usize },
    ZoomChanged { zoom: f32 },
    OpenUrl(String),
    CopyText(String),
    SearchFinished { hits: usize },
    SearchIndexChanged { index: usize, total: usize },
    Status(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    Link,
    SearchHit,
    CurrentHit,
    Selection,
    SelectedAnnotation,
    Region,
    JumpMarker,
}

/// A filled rectangle in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Overlay {
    pub kind: OverlayKind,
    pub rect: Rect,
    pub color: Color,
}

#[derive(Debug, Clone)]
pub struct FramePage {
    pub page: usize,
    pub rect: Rect,
    pub image: Option<Arc<RenderImage>>,
    pub placeholder: Color,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HintLabel {
    pub label: String,
    pub at: Point,
}

/// Everything needed to draw the view once, in viewport coordinates.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: f32,
    pub height: f32,
    pub pages: Vec<FramePage>,
    pub overlays: Vec<Overlay>,
    pub hints: Vec<HintLabel>,
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    page: usize,
    fx: f32,
    fy: f32,
}

#[derive(Debug, Clone, Copy)]
struct JumpMarker {
    location: PageLocation,
    shown_at: Instant,
}

pub struct Viewport {
    model: Arc<DocumentModel>,
    layout: PageLayout,
    mode: LayoutMode,
    fit: FitMode,
    view: (f32, f32),
    scroll: Point,
    current_page: usize,
    slots: BTreeMap<usize, PageSlot>,
    pending_jump: Option<PageLocation>,
    marker: Option<JumpMarker>,
    last_marker: Option<PageLocation>,
    history: LocationHistory,
    search: SearchCursor,
    search_generation: Option<u64>,
    selection: Option<DeviceSelection>,
    drag_anchor: Option<(usize, Point)>,
    region: Option<Region>,
    selected_annotations: BTreeSet<(usize, ObjectNumber)>,
    hints: Option<LinkHints>,
    scroll_dirty_since: Option<Instant>,
    hq_pending_since: Option<Instant>,
    events: VecDeque<ViewEvent>,
}

impl Viewport {
    /// Builds a view of `width` x `height` logical pixels over an open
    /// model and schedules the first renders.
    pub fn new(model: Arc<DocumentModel>, width: f32, height: f32) -> Self {
        let config = model.config();
        let (mode, fit) = (config.layout.mode, config.layout.initial_fit);
        let history = LocationHistory::new(config.behavior.page_history_limit);
        let mut viewport = Self {
            layout: PageLayout::default(),
            mode,
            fit,
            view: (width.max(1.0), height.max(1.0)),
            scroll: Point::default(),
            current_page: 0,
            slots: BTreeMap::new(),
            pending_jump: None,
            marker: None,
            last_marker: None,
            history,
            search: SearchCursor::default(),
            search_generation: None,
            selection: None,
            drag_anchor: None,
            region: None,
            selected_annotations: BTreeSet::new(),
            hints: None,
            scroll_dirty_since: None,
            hq_pending_since: None,
            events: VecDeque::new(),
            model,
        };
        viewport.reset(0);
        viewport
    }

    pub fn model(&self) -> &Arc<DocumentModel> {
        &self.model
    }

    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    pub fn layout_mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn fit_mode(&self) -> FitMode {
        self.fit
    }

    pub fn view_size(&self) -> (f32, f32) {
        self.view
    }

    pub fn scroll(&self) -> Point {
        self.scroll
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn zoom(&self) -> f32 {
        self.model.settings().zoom
    }

    pub fn slots(&self) -> &BTreeMap<usize, PageSlot> {
        &self.slots
    }

    pub fn slot(&self, page: usize) -> Option<&PageSlot> {
        self.slots.get(&page)
    }

    pub fn pending_jump(&self) -> Option<PageLocation> {
        self.pending_jump
    }

    pub fn jump_marker(&self) -> Option<PageLocation> {
        self.marker.map(|m| m.location)
    }

    pub fn take_events(&mut self) -> Vec<ViewEvent> {
        self.events.drain(..).collect()
    }

    fn emit(&mut self, event: ViewEvent) {
        self.events.push_back(event);
    }

    // ---- geometry ----------------------------------------------------------

    pub fn scene_rect(&self) -> Rect {
        self.layout.scene_rect(self.view, self.current_page)
    }

    pub fn page_rect(&self, page: usize) -> Rect {
        self.layout.page_rect(page)
    }

    /// Scene point at the middle of the view.
    pub fn center(&self) -> Point {
        Point::new(
            self.scroll.x + self.view.0 / 2.0,
            self.scroll.y + self.view.1 / 2.0,
        )
    }

    fn primary(&self, p: Point) -> f32 {
        if self.layout.is_horizontal() {
            p.x
        } else {
            p.y
        }
    }

    fn page_near(&self, scene: Point) -> usize {
        match self.mode {
            LayoutMode::Single => self.current_page,
            _ => self.layout.page_at(self.primary(scene)),
        }
    }

    /// Page whose rectangle contains `scene`.
    pub fn page_at_scene(&self, scene: Point) -> Option<usize> {
        if self.layout.page_count() == 0 {
            return None;
        }
        let page = self.page_near(scene);
        self.layout.page_rect(page).contains(scene).then_some(page)
    }

    /// Page space to scene space for `page`.
    pub fn page_to_scene(&self, page: usize) -> Option<Matrix> {
        let origin = self.layout.page_rect(page);
        let m = self.model.logical_transform(page).ok()?;
        Some(m.concat(&Matrix::translate(origin.x0, origin.y0)))
    }

    /// The page under `scene` and the matching point in page space.
    pub fn scene_to_page(&self, scene: Point) -> Option<(usize, Point)> {
        let page = self.page_near(scene);
        let inv = self.page_to_scene(page)?.invert()?;
        Some((page, inv.transform_point(scene)))
    }

    fn scene_to_local(&self, page: usize, scene: Point) -> Point {
        let origin = self.layout.page_rect(page);
        Point::new(scene.x - origin.x0, scene.y - origin.y0)
    }

    fn clamp_scroll(&mut self) {
        let scene = self.scene_rect();
        self.scroll.x = clamp_axis(self.scroll.x, scene.x0, scene.x1 - self.view.0);
        self.scroll.y = clamp_axis(self.scroll.y, scene.y0, scene.y1 - self.view.1);
    }

    fn relayout(&mut self) {
        let s = self.model.settings();
        let config = self.model.config();
        let bounds = self.model.all_page_bounds();
        self.layout = PageLayout::new(
            self.mode,
            &bounds,
            s.logical_scale(),
            s.rotation,
            config.layout.spacing * s.zoom,
            config.layout.margin,
        );
        for (&page, slot) in self.slots.iter_mut() {
            slot.scene_rect = self.layout.page_rect(page);
        }
    }

    fn anchor(&self, at: Point) -> Option<Anchor> {
        if self.layout.page_count() == 0 {
            return None;
        }
        let p = Point::new(self.scroll.x + at.x, self.scroll.y + at.y);
        let page = self.page_near(p);
        let r = self.layout.page_rect(page);
        Some(Anchor {
            page,
            fx: fraction(p.x - r.x0, r.width()),
            fy: fraction(p.y - r.y0, r.height()),
        })
    }

    fn restore_anchor(&mut self, anchor: Option<Anchor>, at: Point) {
        if let Some(a) = anchor {
            let r = self.layout.page_rect(a.page);
            self.scroll = Point::new(
                r.x0 + a.fx * r.width() - at.x,
                r.y0 + a.fy * r.height() - at.y,
            );
        }
        self.clamp_scroll();
    }

    /// Relayouts after a scale or rotation change, keeping the scene point
    /// under `at` (viewport coordinates) in place. Sharp renders wait for
    /// `hq_render_delay_ms` so a burst of zoom steps renders once.
    fn relayout_anchored(&mut self, anchor: Option<Anchor>, at: Point) {
        self.relayout();
        self.region = None;
        self.restore_anchor(anchor, at);
        if self.model.config().behavior.hq_render_delay_ms == 0 {
            self.refresh();
        } else {
            self.update_current_page();
            self.place_slots();
            self.hq_pending_since = Some(Instant::now());
        }
    }

    fn view_center(&self) -> Point {
        Point::new(self.view.0 / 2.0, self.view.1 / 2.0)
    }

    // ---- visible set -------------------------------------------------------

    pub fn visible_pages(&self) -> BTreeSet<usize> {
        let count = self.layout.page_count();
        if count == 0 {
            return BTreeSet::new();
        }
        match self.mode {
            LayoutMode::Single => BTreeSet::from([self.current_page.min(count - 1)]),
            _ => {
                let (lo, extent) = if self.layout.is_horizontal() {
                    (self.scroll.x, self.view.0)
                } else {
                    (self.scroll.y, self.view.1)
                };
                self.layout.pages_between(lo, lo + extent).collect()
            }
        }
    }

    fn keep_set(&self, visible: &BTreeSet<usize>) -> BTreeSet<usize> {
        let count = self.layout.page_count();
        let preload = self.model.config().behavior.preload_pages;
        match (visible.first(), visible.last()) {
            (Some(&first), Some(&last)) if self.mode != LayoutMode::Single => {
                (first.saturating_sub(preload)..=(last + preload).min(count - 1)).collect()
            }
            _ => visible.clone(),
        }
    }

    /// Recomputes the visible set now: creates placeholders, drops slots
    /// that fell out of range, and queues renders.
    pub fn refresh(&mut self) {
        self.scroll_dirty_since = None;
        self.hq_pending_since = None;
        if self.layout.page_count() == 0 {
            return;
        }
        self.update_current_page();
        let (visible, keep) = self.place_slots();
        self.model.set_wanted_pages(visible.clone(), &keep);
        for &page in visible.iter().chain(keep.difference(&visible)) {
            self.request_render(page);
        }
    }

    /// Brings the slot set in line with the visible range without asking
    /// for renders.
    fn place_slots(&mut self) -> (BTreeSet<usize>, BTreeSet<usize>) {
        let visible = self.visible_pages();
        let keep = self.keep_set(&visible);
        self.slots.retain(|page, _| keep.contains(page));
        for &page in &keep {
            let rect = self.layout.page_rect(page);
            self.slots
                .entry(page)
                .or_insert_with(|| PageSlot::placeholder(page, rect));
        }
        (visible, keep)
    }

    fn request_render(&mut self, page: usize) {
        let job = self.model.create_render_job(page);
        let Some(slot) = self.slots.get_mut(&page) else {
            return;
        };
        if slot.needs_render(&job) {
            slot.requested = Some(job.clone());
            self.model.request_page_render(job);
        }
    }

    fn update_current_page(&mut self) {
        let count = self.layout.page_count();
        if count == 0 {
            return;
        }
        let page = self.page_near(self.center()).min(count - 1);
        if page != self.current_page {
            self.current_page = page;
            self.emit(ViewEvent::PageChanged { page });
        }
    }

    /// Drives time-based behaviour: the debounced visible-set update after
    /// scrolling, delayed sharp renders after zooming, and the jump marker
    /// timeout.
    pub fn tick(&mut self, now: Instant) {
        let config = self.model.config();
        let debounce = Duration::from_millis(config.behavior.scroll_debounce_ms);
        let hq_delay = Duration::from_millis(config.behavior.hq_render_delay_ms);
        let marker_timeout = Duration::from_millis(config.markers.jump_marker_timeout_ms);

        let scroll_due = self
            .scroll_dirty_since
            .is_some_and(|since| now.saturating_duration_since(since) >= debounce);
        let hq_due = self
            .hq_pending_since
            .is_some_and(|since| now.saturating_duration_since(since) >= hq_delay);
        if scroll_due || hq_due {
            self.refresh();
        }
        if let Some(marker) = self.marker {
            if now.saturating_duration_since(marker.shown_at) >= marker_timeout {
                self.marker = None;
            }
        }
    }

    // ---- scrolling ---------------------------------------------------------

    pub fn scroll_by(&mut self, dx: f32, dy: f32) {
        self.scroll_to(Point::new(self.scroll.x + dx, self.scroll.y + dy));
    }

    /// Moves the view's top-left corner; the visible set follows on the
    /// next [`Viewport::tick`] after the debounce interval.
    pub fn scroll_to(&mut self, scene: Point) {
        self.scroll = scene;
        self.clamp_scroll();
        self.marker = None;
        self.update_current_page();
        self.scroll_dirty_since = Some(Instant::now());
    }

    /// Centres the view on `scene` and updates the visible set at once.
    pub fn center_on(&mut self, scene: Point) {
        self.scroll = Point::new(scene.x - self.view.0 / 2.0, scene.y - self.view.1 / 2.0);
        self.clamp_scroll();
        self.refresh();
    }

    pub fn set_view_size(&mut self, width: f32, height: f32) {
        let anchor = self.anchor(self.view_center());
        self.view = (width.max(1.0), height.max(1.0));
        if let Some(zoom) = self.fit_zoom(self.fit) {
            self.model.set_zoom(zoom);
        }
        let at = self.view_center();
        self.relayout_anchored(anchor, at);
    }

    pub fn set_layout_mode(&mut self, mode: LayoutMode) {
        if mode == self.mode {
            return;
        }
        info!(?mode, "layout mode changed");
        let page = self.current_page;
        self.mode = mode;
        self.slots.clear();
        self.relayout();
        self.scroll_to_location(&PageLocation::top_of(page));
        self.refresh();
    }

    // ---- zoom, fit, rotation ----------------------------------------------

    /// Sets an explicit zoom level, leaving any fit mode.
    pub fn set_zoom(&mut self, zoom: f32) {
        self.fit = FitMode::None;
        let at = self.view_center();
        self.apply_zoom(zoom, at);
    }

    pub fn zoom_in(&mut self) {
        let factor = self.model.config().zoom.factor;
        self.set_zoom(self.zoom() * factor);
    }

    pub fn zoom_out(&mut self) {
        let factor = self.model.config().zoom.factor;
        self.set_zoom(self.zoom() / factor);
    }

    /// Wheel zoom: scales by `factor` keeping the point under `at`
    /// (viewport coordinates) fixed.
    pub fn zoom_at(&mut self, at: Point, factor: f32) {
        self.fit = FitMode::None;
        self.apply_zoom(self.zoom() * factor, at);
    }

    fn apply_zoom(&mut self, zoom: f32, at: Point) {
        let anchor = self.anchor(at);
        let old = self.zoom();
        let new = self.model.set_zoom(zoom);
        if (new - old).abs() < f32::EPSILON {
            return;
        }
        debug!(old, new, "zoom changed");
        self.relayout_anchored(anchor, at);
        self.emit(ViewEvent::ZoomChanged { zoom: new });
    }

    pub fn set_fit(&mut self, fit: FitMode) {
        self.fit = fit;
        if let Some(zoom) = self.fit_zoom(fit) {
            let at = self.view_center();
            self.apply_zoom(zoom, at);
        }
    }

    /// Zoom at which the current page fills the view along `fit`.
    pub fn fit_zoom(&self, fit: FitMode) -> Option<f32> {
        let bounds = self.model.page_bounds(self.current_page).ok()?;
        let s = self.model.settings();
        let unit = s.dpi / 72.0;
        let (mut w, mut h) = (bounds.width() * unit, bounds.height() * unit);
        if s.rotation.is_sideways() {
            std::mem::swap(&mut w, &mut h);
        }
        if w <= 0.0 || h <= 0.0 {
            return None;
        }
        let (vw, vh) = self.view;
        match fit {
            FitMode::None => None,
            FitMode::Width => Some(vw / w),
            FitMode::Height => Some(vh / h),
            FitMode::Window => Some((vw / w).min(vh / h)),
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.model.settings().rotation
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        if rotation == self.rotation() {
            return;
        }
        let at = self.view_center();
        let anchor = self.anchor(at);
        self.model.set_rotation(rotation);
        if let Some(zoom) = self.fit_zoom(self.fit) {
            self.model.set_zoom(zoom);
        }
        self.relayout_anchored(anchor, at);
    }

    pub fn rotate_clockwise(&mut self) {
        self.set_rotation(self.rotation().clockwise());
    }

    pub fn rotate_anticlockwise(&mut self) {
        self.set_rotation(self.rotation().anticlockwise());
    }

    /// The host moved to a screen with a different pixel density.
    pub fn set_device_pixel_ratio(&mut self, dpr: f32) {
        self.model.set_dpr(dpr);
        self.region = None;
        self.refresh();
    }

    pub fn toggle_invert(&mut self) {
        let invert = !self.model.settings().invert;
        self.model.set_invert(invert);
        self.refresh();
    }

    // ---- navigation --------------------------------------------------------

    /// Where the view currently sits, for history and session state.
    pub fn current_location(&self) -> PageLocation {
        let page = self.current_page;
        let rect = self.layout.page_rect(page);
        let top_left = Point::new(self.scroll.x.max(rect.x0), self.scroll.y.max(rect.y0));
        let point = self
            .page_to_scene(page)
            .and_then(|m| m.invert())
            .map(|inv| inv.transform_point(top_left))
            .unwrap_or_default();
        PageLocation {
            zoom: Some(self.zoom()),
            ..PageLocation::new(page, point.x.max(0.0), point.y.max(0.0))
        }
    }

    /// Jumps to the top of `page`, recording the move in history.
    pub fn goto_page(&mut self, page: usize) {
        let target = PageLocation::top_of(page);
        self.history.push(self.current_location());
        self.history.push(target);
        self.jump_to(target);
    }

    pub fn next_page(&mut self) {
        let count = self.layout.page_count();
        if self.current_page + 1 < count {
            self.jump_to(PageLocation::top_of(self.current_page + 1));
        }
    }

    pub fn prev_page(&mut self) {
        if self.current_page > 0 {
            self.jump_to(PageLocation::top_of(self.current_page - 1));
        }
    }

    pub fn first_page(&mut self) {
        self.goto_page(0);
    }

    pub fn last_page(&mut self) {
        let count = self.layout.page_count();
        if count > 0 {
            self.goto_page(count - 1);
        }
    }

    pub fn back(&mut self) -> bool {
        match self.history.back() {
            Some(location) => {
                self.jump_to(location);
                true
            }
            None => false,
        }
    }

    pub fn forward(&mut self) -> bool {
        match self.history.forward() {
            Some(location) => {
                self.jump_to(location);
                true
            }
            None => false,
        }
    }

    /// Moves to `location` without touching history. A target whose page
    /// has not been rendered yet is parked until its image arrives.
    pub fn jump_to(&mut self, location: PageLocation) {
        let count = self.layout.page_count();
        if count == 0 {
            return;
        }
        let location = PageLocation {
            page: location.page.min(count - 1),
            ..location
        }
        .sanitized();
        self.marker = None;
        if self.mode == LayoutMode::Single && location.page != self.current_page {
            self.current_page = location.page;
            self.relayout();
            self.emit(ViewEvent::PageChanged {
                page: location.page,
            });
        }
        let ready = self
            .slots
            .get(&location.page)
            .is_some_and(|slot| !slot.is_placeholder());
        self.scroll_to_location(&location);
        self.refresh();
        if ready {
            self.pending_jump = None;
            self.show_marker(location);
        } else {
            debug!(page = location.page, "deferring jump until the page renders");
            self.pending_jump = Some(location);
        }
    }

    fn scroll_to_location(&mut self, location: &PageLocation) {
        let Some(m) = self.page_to_scene(location.page) else {
            return;
        };
        let p = m.transform_point(Point::new(location.x, location.y));
        let (vw, vh) = self.view;
        match self.mode {
            LayoutMode::Horizontal => {
                self.scroll.x = p.x;
                if p.y < self.scroll.y || p.y > self.scroll.y + vh {
                    self.scroll.y = p.y - vh / 2.0;
                }
            }
            LayoutMode::Vertical | LayoutMode::Single => {
                self.scroll.y = p.y;
                if p.x < self.scroll.x || p.x > self.scroll.x + vw {
                    self.scroll.x = p.x - vw / 2.0;
                }
            }
        }
        self.clamp_scroll();
    }

    fn show_marker(&mut self, location: PageLocation) {
        if !self.model.config().markers.jump_marker {
            return;
        }
        self.marker = Some(JumpMarker {
            location,
            shown_at: Instant::now(),
        });
        self.last_marker = Some(location);
    }

    /// Shows the last jump marker again.
    pub fn reshow_jump_marker(&mut self) {
        if let Some(location) = self.last_marker {
            self.show_marker(location);
        }
    }

    // ---- links -------------------------------------------------------------

    pub fn link_at(&self, scene: Point) -> Option<(usize, CachedLink)> {
        let page = self.page_at_scene(scene)?;
        let slot = self.slots.get(&page)?;
        let m = self.page_to_scene(page)?;
        selection::hit_point(&slot.links, |l| m.transform_rect(&l.rect), scene)
            .map(|link| (page, link.clone()))
    }

    /// Follows the link under `scene`, if any.
    pub fn click(&mut self, scene: Point) -> bool {
        match self.link_at(scene) {
            Some((_, link)) => {
                self.follow_link(&link);
                true
            }
            None => false,
        }
    }

    pub fn follow_link(&mut self, link: &CachedLink) {
        match links::resolve(link) {
            Some(LinkAction::OpenExternal(uri)) => {
                info!(%uri, "opening external link");
                self.emit(ViewEvent::OpenUrl(uri));
            }
            Some(LinkAction::Jump { target, fit }) => {
                self.history.push(self.current_location());
                self.history.push(target);
                if let Some(fit) = fit {
                    self.fit = fit;
                    if let Some(zoom) = self.fit_zoom(fit) {
                        self.model.set_zoom(zoom);
                        self.relayout();
                    }
                }
                self.jump_to(target);
            }
            None => debug!(uri = %link.uri, "link has no usable target"),
        }
    }

    /// Labels every link on the visible pages; returns how many there are.
    pub fn start_link_hints(&mut self, mode: HintMode) -> usize {
        let mut found = Vec::new();
        for page in self.visible_pages() {
            if let Some(slot) = self.slots.get(&page) {
                found.extend(slot.links.iter().map(|l| (page, l.clone())));
            }
        }
        let count = found.len();
        if count == 0 {
            self.emit(ViewEvent::Status("no links on screen".into()));
            self.hints = None;
        } else {
            self.hints = Some(LinkHints::new(mode, found));
        }
        count
    }

    pub fn link_hints_active(&self) -> bool {
        self.hints.is_some()
    }

    pub fn hint_key(&mut self, digit: char) -> HintInput {
        let Some(hints) = self.hints.as_mut() else {
            return HintInput::NoMatch;
        };
        let input = hints.push_digit(digit);
        if let HintInput::Matched(mode, hint) = &input {
            self.hints = None;
            match mode {
                HintMode::Follow => self.follow_link(&hint.link),
                HintMode::Copy => {
                    let file = self.model.path().unwrap_or_default();
                    self.emit(ViewEvent::CopyText(links::copy_text(&hint.link, &file)));
                }
            }
        }
        input
    }

    pub fn hint_backspace(&mut self) {
        if let Some(hints) = self.hints.as_mut() {
            hints.backspace();
        }
    }

    pub fn cancel_link_hints(&mut self) {
        self.hints = None;
    }

    // ---- search ------------------------------------------------------------

    /// Starts a smart-case search over the whole document.
    pub fn search(&mut self, term: &str) {
        self.start_search(SearchQuery::smart(term));
    }

    pub fn search_regex(&mut self, pattern: &str) {
        self.start_search(SearchQuery::regex(pattern));
    }

    fn start_search(&mut self, query: SearchQuery) {
        self.search.clear();
        self.search_generation = Some(self.model.search(query));
    }

    pub fn search_cursor(&self) -> &SearchCursor {
        &self.search
    }

    pub fn clear_search(&mut self) {
        self.search.clear();
        self.search_generation = None;
    }

    fn on_search_results(&mut self, generation: u64, results: SearchResults) {
        if self.search_generation != Some(generation) {
            debug!(generation, "dropping superseded search results");
            return;
        }
        let hits = results.len();
        info!(hits, "search results ready");
        self.search = SearchCursor::new(results);
        self.emit(ViewEvent::SearchFinished { hits });
        if hits > 0 {
            self.goto_hit(0);
        }
    }

    pub fn goto_hit(&mut self, index: usize) -> Option<usize> {
        let hit = self.search.goto(index).cloned()?;
        self.show_hit(&hit);
        self.search.current()
    }

    pub fn next_hit(&mut self) -> Option<usize> {
        let hit = self.search.next().cloned()?;
        self.show_hit(&hit);
        self.search.current()
    }

    pub fn prev_hit(&mut self) -> Option<usize> {
        let hit = self.search.prev().cloned()?;
        self.show_hit(&hit);
        self.search.current()
    }

    fn show_hit(&mut self, hit: &SearchHit) {
        if self.mode == LayoutMode::Single && hit.page != self.current_page {
            self.current_page = hit.page;
            self.relayout();
            self.emit(ViewEvent::PageChanged { page: hit.page });
        }
        if let Some(m) = self.page_to_scene(hit.page) {
            let center = m.transform_rect(&hit.quad.bounds()).center();
            self.center_on(center);
        }
        if let Some(index) = self.search.current() {
            let total = self.search.results().len();
            self.emit(ViewEvent::SearchIndexChanged { index, total });
        }
    }

    /// Hit positions as fractions along the main scroll axis.
    pub fn search_markers(&self) -> Vec<f32> {
        let results = self.search.results();
        let count = self.layout.page_count().max(1) as f32;
        let total = self.layout.total_extent();
        results
            .flat()
            .iter()
            .filter_map(|r| {
                let hit = results.hit(*r)?;
                if self.mode == LayoutMode::Single || total <= 0.0 {
                    return Some(hit.page as f32 / count);
                }
                let m = self.page_to_scene(hit.page)?;
                let c = m.transform_rect(&hit.quad.bounds()).center();
                Some((self.primary(c) / total).clamp(0.0, 1.0))
            })
            .collect()
    }

    // ---- text selection ----------------------------------------------------

    /// Starts a drag at `scene`; returns false off-page.
    pub fn begin_selection(&mut self, scene: Point) -> bool {
        self.clear_selection();
        match self.page_at_scene(scene) {
            Some(page) => {
                self.drag_anchor = Some((page, scene));
                true
            }
            None => false,
        }
    }

    pub fn update_selection(&mut self, scene: Point, mode: SnapMode) -> EngineResult<()> {
        let Some((page, start)) = self.drag_anchor else {
            return Ok(());
        };
        let a = self.scene_to_local(page, start);
        let b = self.scene_to_local(page, scene);
        self.selection = self.model.compute_text_selection(page, a, b, mode)?;
        Ok(())
    }

    pub fn end_selection(&mut self) {
        self.drag_anchor = None;
    }

    /// Multi-click selection: two clicks pick a word, three a line, four a
    /// block.
    pub fn select_at(&mut self, scene: Point, clicks: u8) -> EngineResult<bool> {
        let mode = match clicks {
            2 => SnapMode::Words,
            3 => SnapMode::Lines,
            n if n >= 4 => SnapMode::Block,
            _ => return Ok(false),
        };
        let Some(page) = self.page_at_scene(scene) else {
            return Ok(false);
        };
        let local = self.scene_to_local(page, scene);
        self.selection = self.model.compute_text_selection(page, local, local, mode)?;
        Ok(self.selection.is_some())
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
        self.drag_anchor = None;
    }

    pub fn selection(&self) -> Option<&TextSelection> {
        self.selection.as_ref().map(|s| &s.selection)
    }

    pub fn copy_selection(&mut self) -> bool {
        let Some(text) = self.selection().map(|s| s.text.clone()) else {
            return false;
        };
        self.emit(ViewEvent::CopyText(text));
        true
    }

    /// Turns the current selection into a highlight annotation.
    pub fn highlight_selection(&mut self) -> EngineResult<Option<ObjectNumber>> {
        let Some(selection) = self.selection.take() else {
            return Ok(None);
        };
        let TextSelection { page, quads, .. } = selection.selection;
        self.model.add_highlight(page, quads)
    }

    // ---- region ------------------------------------------------------------

    /// Resolves a rubber-band rectangle against the page under its centre.
    pub fn set_region(&mut self, scene: Rect) -> Option<Region> {
        let page = self.page_at_scene(scene.center())?;
        let slot = self.slots.get(&page)?;
        let dpr = self.model.settings().dpr;
        let size = match slot.image() {
            Some(image) => (image.width, image.height),
            None => (
                (slot.scene_rect.width() * dpr).round() as u32,
                (slot.scene_rect.height() * dpr).round() as u32,
            ),
        };
        let region = map_region(page, &slot.scene_rect, &scene, dpr, size)?;
        self.region = Some(region);
        Some(region)
    }

    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    pub fn clear_region(&mut self) {
        self.region = None;
    }

    /// Pixels of the selected region, cut from the page image.
    pub fn region_image(&self) -> Option<RenderImage> {
        let region = self.region?;
        let image = self.slots.get(&region.page)?.image()?;
        let px = region.pixels;
        image.crop(px.x0 as u32, px.y0 as u32, px.width(), px.height())
    }

    pub fn copy_text_from_region(&self) -> EngineResult<String> {
        let region = self
            .region
            .ok_or(EngineError::InvalidState("no region is selected"))?;
        let area = self.model.rect_to_pdf_space(region.page, &region.logical)?;
        self.model.text_in_area(region.page, &area)
    }

    // ---- annotations -------------------------------------------------------

    pub fn annotation_at(&self, scene: Point) -> Option<(usize, CachedAnnotation)> {
        let page = self.page_at_scene(scene)?;
        let slot = self.slots.get(&page)?;
        let m = self.page_to_scene(page)?;
        selection::hit_point(&slot.annotations, |a| m.transform_rect(&a.rect), scene)
            .map(|a| (page, a.clone()))
    }

    /// Selects the annotation under `scene`; with `extend` the existing
    /// selection is kept.
    pub fn select_annotation_at(&mut self, scene: Point, extend: bool) -> bool {
        if !extend {
            self.selected_annotations.clear();
        }
        match self.annotation_at(scene) {
            Some((page, annotation)) => {
                self.selected_annotations.insert((page, annotation.id));
                true
            }
            None => false,
        }
    }

    /// Selects every annotation intersecting `area`; returns the new total.
    pub fn select_annotations_in(&mut self, area: Rect) -> usize {
        let mut found = Vec::new();
        for (&page, slot) in &self.slots {
            let Some(m) = self.page_to_scene(page) else {
                continue;
            };
            found.extend(
                selection::hit_area(&slot.annotations, move |a| m.transform_rect(&a.rect), &area)
                    .map(|a| (page, a.id)),
            );
        }
        self.selected_annotations.extend(found);
        self.selected_annotations.len()
    }

    pub fn selected_annotations(&self) -> impl Iterator<Item = &(usize, ObjectNumber)> {
        self.selected_annotations.iter()
    }

    pub fn clear_annotation_selection(&mut self) {
        self.selected_annotations.clear();
    }

    fn selected_by_page(&self) -> BTreeMap<usize, Vec<ObjectNumber>> {
        let mut by_page: BTreeMap<usize, Vec<ObjectNumber>> = BTreeMap::new();
        for &(page, id) in &self.selected_annotations {
            by_page.entry(page).or_default().push(id);
        }
        by_page
    }

    /// Deletes the selection with one undoable command per page.
    pub fn delete_selected_annotations(&mut self) -> EngineResult<usize> {
        let mut deleted = 0;
        for (page, ids) in self.selected_by_page() {
            self.model.remove_annotations(page, &ids)?;
            deleted += ids.len();
        }
        self.selected_annotations.clear();
        Ok(deleted)
    }

    pub fn recolor_selected_annotations(&mut self, color: Color) -> EngineResult<usize> {
        let mut changed = 0;
        for (page, ids) in self.selected_by_page() {
            for id in ids {
                self.model.change_color(page, id, color)?;
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Adds a rectangle annotation covering `scene`.
    pub fn add_rect_annotation(&mut self, scene: Rect) -> EngineResult<Option<ObjectNumber>> {
        let page = self
            .page_at_scene(scene.center())
            .ok_or(EngineError::InvalidState("no page under the rectangle"))?;
        let page_rect = self.layout.page_rect(page);
        let local = scene
            .intersect(&page_rect)
            .translate(-page_rect.x0, -page_rect.y0);
        let area = self.model.rect_to_pdf_space(page, &local)?;
        self.model.add_rect(page, area)
    }

    /// Adds a note at `scene`.
    pub fn add_text_annotation(
        &mut self,
        scene: Point,
        contents: &str,
    ) -> EngineResult<Option<ObjectNumber>> {
        let (page, at) = self
            .page_at_scene(scene)
            .and_then(|_| self.scene_to_page(scene))
            .ok_or(EngineError::InvalidState("no page under the cursor"))?;
        self.model
            .add_text(page, Rect::from_xywh(at.x, at.y, NOTE_SIZE, NOTE_SIZE), contents)
    }

    pub fn undo(&mut self) -> EngineResult<bool> {
        self.model.undo()
    }

    pub fn redo(&mut self) -> EngineResult<bool> {
        self.model.redo()
    }

    // ---- model events ------------------------------------------------------

    pub fn handle_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::RenderFinished(outcome) => self.on_render_finished(*outcome),
            ModelEvent::RenderFailed {
                page,
                generation,
                error,
            } => {
                warn!(page, %error, "page stays blank");
                if let Some(slot) = self.slots.get_mut(&page) {
                    slot.failed = slot.requested.take();
                }
                self.model.render_completed(page, generation);
            }
            ModelEvent::ReloadRequested { page } => self.on_reload_requested(page),
            ModelEvent::UrlLinksDetected {
                page,
                generation,
                revision,
                links,
            } => {
                if generation != self.model.generation() || revision != self.model.revision(page) {
                    debug!(page, "dropping urls detected on outdated text");
                    return;
                }
                if let Some(slot) = self.slots.get_mut(&page) {
                    for link in links {
                        if !slot.links.contains(&link) {
                            slot.links.push(link);
                        }
                    }
                }
            }
            ModelEvent::SearchResultsReady {
                generation,
                results,
            } => self.on_search_results(generation, results),
            ModelEvent::OpenFinished { .. } => self.reset(0),
            ModelEvent::Reloaded { .. } => self.on_reloaded(),
            ModelEvent::PasswordRequired { .. }
            | ModelEvent::PasswordRejected { .. }
            | ModelEvent::OpenFailed(_) => {}
        }
    }

    fn on_render_finished(&mut self, outcome: RenderOutcome) {
        let page = outcome.job.page;
        let generation = outcome.job.generation;
        let fresh = generation == self.model.generation();
        let wanted = self.model.create_render_job(page);
        let exact = fresh && outcome.job.same_output(&wanted);
        let mut resized = false;

        if fresh {
            if let Some(slot) = self.slots.get_mut(&page) {
                if exact || slot.is_placeholder() {
                    let (lw, lh) = (slot.scene_rect.width(), slot.scene_rect.height());
                    let dpr = outcome.job.dpr;
                    let (iw, ih) = (
                        outcome.image.width as f32 / dpr,
                        outcome.image.height as f32 / dpr,
                    );
                    resized = exact && ((lw - iw).abs() > 1.5 || (lh - ih).abs() > 1.5);
                    slot.links = outcome.links.into_iter().map(|l| l.link).collect();
                    slot.annotations = outcome.annotations.into_iter().map(|a| a.annotation).collect();
                    slot.item = SlotItem::Image {
                        image: outcome.image,
                        job: outcome.job,
                    };
                    slot.failed = None;
                    if slot.requested.as_ref().is_some_and(|j| !j.same_output(&wanted) || exact) {
                        slot.requested = None;
                    }
                } else {
                    debug!(page, "discarding render for outdated parameters");
                }
            }
        } else {
            debug!(page, "discarding render from a replaced document");
        }
        self.model.render_completed(page, generation);

        if resized {
            debug!(page, "page size differs from the estimate, relaying out");
            let at = self.view_center();
            let anchor = self.anchor(at);
            self.relayout_anchored(anchor, at);
        }
        if let Some(jump) = self.pending_jump {
            if jump.page == page && self.slots.get(&page).is_some_and(|s| !s.is_placeholder()) {
                self.pending_jump = None;
                self.scroll_to_location(&jump);
                self.refresh();
                self.show_marker(jump);
            }
        }
    }

    fn on_reload_requested(&mut self, page: usize) {
        self.selected_annotations.retain(|&(p, _)| p != page);
        if self.selection().is_some_and(|s| s.page == page) {
            self.selection = None;
        }
        if let Some(slot) = self.slots.get_mut(&page) {
            slot.failed = None;
        }
        self.request_render(page);
    }

    fn on_reloaded(&mut self) {
        let at = self.view_center();
        let anchor = self.anchor(at);
        self.clear_transient_state();
        self.slots.clear();
        self.current_page = self
            .current_page
            .min(self.model.page_count().saturating_sub(1));
        self.relayout_anchored(anchor, at);
    }

    fn clear_transient_state(&mut self) {
        self.selection = None;
        self.drag_anchor = None;
        self.region = None;
        self.hints = None;
        self.selected_annotations.clear();
        self.pending_jump = None;
        self.marker = None;
        self.clear_search();
    }

    /// Starts over on `page` with fresh slots, as after opening a document.
    pub fn reset(&mut self, page: usize) {
        self.clear_transient_state();
        self.slots.clear();
        self.history.clear();
        self.current_page = page.min(self.model.page_count().saturating_sub(1));
        if let Some(zoom) = self.fit_zoom(self.fit) {
            self.model.set_zoom(zoom);
        }
        self.relayout();
        self.scroll = self.scene_rect().top_left();
        self.scroll_to_location(&PageLocation::top_of(self.current_page));
        self.refresh();
    }

    // ---- drawing -----------------------------------------------------------

    /// Snapshot of the visible slots and overlays in viewport coordinates.
    pub fn frame(&self) -> Frame {
        let origin = self.scroll;
        let to_view = |r: &Rect| r.translate(-origin.x, -origin.y);
        let view_rect = Rect::from_xywh(origin.x, origin.y, self.view.0, self.view.1);
        let settings = self.model.settings();
        let colors = &self.model.config().colors;
        let placeholder = if settings.invert {
            Color::BLACK
        } else {
            Color::WHITE
        };

        let mut pages = Vec::new();
        let mut overlays = Vec::new();
        let mut hints = Vec::new();
        let current_hit = self.search.current_ref();

        for (&page, slot) in &self.slots {
            if !slot.scene_rect.intersects(&view_rect) {
                continue;
            }
            pages.push(FramePage {
                page,
                rect: to_view(&slot.scene_rect),
                image: slot.image().cloned(),
                placeholder,
            });
            let Some(m) = self.page_to_scene(page) else {
                continue;
            };

            overlays.extend(slot.links.iter().map(|link| Overlay {
                kind: OverlayKind::Link,
                rect: to_view(&m.transform_rect(&link.rect)),
                color: Color::TRANSPARENT,
            }));

            for (index, hit) in self.search.results().hits_on(page).iter().enumerate() {
                let current = current_hit == Some(FlatHitRef { page, index });
                let (kind, color) = if current {
                    (OverlayKind::CurrentHit, colors.search_index)
                } else {
                    (OverlayKind::SearchHit, colors.search_match)
                };
                overlays.push(Overlay {
                    kind,
                    rect: to_view(&m.transform_rect(&hit.quad.bounds())),
                    color,
                });
            }

            if let Some(selection) = self.selection().filter(|s| s.page == page) {
                overlays.extend(selection.quads.iter().map(|q| Overlay {
                    kind: OverlayKind::Selection,
                    rect: to_view(&m.transform_rect(&q.bounds())),
                    color: colors.selection,
                }));
            }

            for annotation in &slot.annotations {
                if self.selected_annotations.contains(&(page, annotation.id)) {
                    overlays.push(Overlay {
                        kind: OverlayKind::SelectedAnnotation,
                        rect: to_view(&m.transform_rect(&annotation.rect)),
                        color: colors.selection,
                    });
                }
            }

            if let Some(region) = self.region.filter(|r| r.page == page) {
                let scene = region.logical.translate(slot.scene_rect.x0, slot.scene_rect.y0);
                overlays.push(Overlay {
                    kind: OverlayKind::Region,
                    rect: to_view(&scene),
                    color: colors.selection,
                });
            }

            if let Some(marker) = self.marker.filter(|mk| mk.location.page == page) {
                let p = m.transform_point(Point::new(marker.location.x, marker.location.y));
                let half = MARKER_SIZE / 2.0;
                overlays.push(Overlay {
                    kind: OverlayKind::JumpMarker,
                    rect: to_view(&Rect::new(p.x - half, p.y - half, p.x + half, p.y + half)),
                    color: colors.jump_marker,
                });
            }

            if let Some(link_hints) = &self.hints {
                for hint in link_hints.visible().filter(|h| h.page == page) {
                    let rect = to_view(&m.transform_rect(&hint.link.rect));
                    hints.push(HintLabel {
                        label: hint.label.clone(),
                        at: rect.top_left(),
                    });
                }
            }
        }

        Frame {
            width: self.view.0,
            height: self.view.1,
            pages,
            overlays,
            hints,
        }
    }
}

fn clamp_axis(value: f32, lo: f32, hi: f32) -> f32 {
    if hi <= lo {
        lo
    } else {
        value.clamp(lo, hi)
    }
}

fn fraction(offset: f32, extent: f32) -> f32 {
    if extent > 0.0 {
        offset / extent
    } else {
        0.0
    }
}
