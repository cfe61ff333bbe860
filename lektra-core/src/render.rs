//! Render jobs, their single-flight queue, and job execution.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::instrument;

use crate::geometry::{device_bounds, page_to_device, Matrix, Rect, Rotation};
use crate::page_cache::{CachedAnnotation, CachedLink, PageCacheEntry};
use crate::types::{Color, RenderImage};

/// Snapshot of everything that determines one page image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderJob {
    pub page: usize,
    pub zoom: f32,
    pub dpi: f32,
    pub dpr: f32,
    pub rotation: Rotation,
    pub invert: bool,
    /// Foreground/background tint pair.
    pub tint: Option<(Color, Color)>,
    pub detect_urls: bool,
    /// Document generation the job was created against.
    pub generation: u64,
    /// Edit count of the page when the job was created.
    pub revision: u64,
}

impl RenderJob {
    /// Logical pixels per point.
    pub fn logical_scale(&self) -> f32 {
        self.zoom * self.dpi / 72.0
    }

    /// Device pixels per point.
    pub fn scale(&self) -> f32 {
        self.logical_scale() * self.dpr
    }

    /// Whether `other` would produce the same image for the same page.
    pub fn same_output(&self, other: &RenderJob) -> bool {
        (self.scale() - other.scale()).abs() < f32::EPSILON
            && self.rotation == other.rotation
            && self.invert == other.invert
            && self.tint == other.tint
            && self.generation == other.generation
            && self.revision == other.revision
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedLink {
    pub link: CachedLink,
    pub device_rect: Rect,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedAnnotation {
    pub annotation: CachedAnnotation,
    pub device_rect: Rect,
}

#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub job: RenderJob,
    pub image: Arc<RenderImage>,
    /// Page to device transform the image was drawn with.
    pub transform: Matrix,
    pub links: Vec<RenderedLink>,
    pub annotations: Vec<RenderedAnnotation>,
}

/// Replays `entry` for `job`. The caller holds its own reference to the
/// entry, so invalidation in the meantime does not affect the result.
#[instrument(skip(job, entry), fields(page = job.page, zoom = job.zoom))]
pub fn execute(job: &RenderJob, entry: &PageCacheEntry) -> Result<RenderOutcome> {
    let scale = job.scale();
    let bbox = device_bounds(&entry.bounds, scale, job.rotation);
    if bbox.is_empty() {
        bail!("page {} has an empty device box", job.page);
    }

    let mut image = entry
        .display_list
        .replay(scale, job.rotation, bbox.width(), bbox.height())?;
    if let Some((fg, bg)) = job.tint {
        apply_tint(&mut image, fg, bg);
    }
    if job.invert {
        invert_luminance(&mut image);
    }
    image.device_pixel_ratio = job.dpr;
    image.dpi = job.dpi;

    let transform = page_to_device(&entry.bounds, scale, job.rotation);
    let links = entry
        .links
        .iter()
        .map(|link| RenderedLink {
            device_rect: transform.transform_rect(&link.rect),
            link: link.clone(),
        })
        .collect();
    let annotations = entry
        .annotations
        .iter()
        .map(|annotation| RenderedAnnotation {
            device_rect: transform.transform_rect(&annotation.rect),
            annotation: annotation.clone(),
        })
        .collect();

    Ok(RenderOutcome {
        job: job.clone(),
        image: Arc::new(image),
        transform,
        links,
        annotations,
    })
}

/// Maps black to `fg` and white to `bg`, channel by channel.
pub fn apply_tint(image: &mut RenderImage, fg: Color, bg: Color) {
    let fg = fg.to_rgba8();
    let bg = bg.to_rgba8();
    for px in image.pixels.chunks_exact_mut(4) {
        for i in 0..3 {
            let v = px[i] as u32;
            let lo = fg[i] as u32;
            let hi = bg[i] as u32;
            px[i] = ((lo * (255 - v) + hi * v) / 255) as u8;
        }
    }
}

/// Inverts lightness while keeping hue, so coloured figures stay readable.
pub fn invert_luminance(image: &mut RenderImage) {
    for px in image.pixels.chunks_exact_mut(4) {
        let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
        let y = (299 * r + 587 * g + 114 * b) / 1000;
        let d = 255 - 2 * y;
        px[0] = (r + d).clamp(0, 255) as u8;
        px[1] = (g + d).clamp(0, 255) as u8;
        px[2] = (b + d).clamp(0, 255) as u8;
    }
}

/// Single-flight queue: one job in flight, a FIFO of candidate pages, and
/// the latest job requested for each pending page.
#[derive(Debug, Default)]
pub struct RenderQueue {
    in_flight: Option<usize>,
    queue: VecDeque<usize>,
    pending: HashMap<usize, RenderJob>,
    visible: BTreeSet<usize>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `job`, replacing the parameters of an already pending page.
    pub fn request(&mut self, job: RenderJob) {
        let page = job.page;
        if self.pending.insert(page, job).is_none() {
            self.queue.push_back(page);
        }
    }

    pub fn set_visible(&mut self, visible: BTreeSet<usize>) {
        self.visible = visible;
    }

    /// Drops every pending page outside `keep`. The in-flight job is left
    /// alone.
    pub fn prune(&mut self, keep: &BTreeSet<usize>) {
        self.pending.retain(|page, _| keep.contains(page));
        let pending = &self.pending;
        self.queue.retain(|page| pending.contains_key(page));
    }

    /// Takes the next job when nothing is in flight, preferring visible
    /// pages over preloads.
    pub fn start_next(&mut self) -> Option<RenderJob> {
        if self.in_flight.is_some() {
            return None;
        }
        let pending = &self.pending;
        self.queue.retain(|page| pending.contains_key(page));
        let index = self
            .queue
            .iter()
            .position(|page| self.visible.contains(page))
            .unwrap_or(0);
        let page = self.queue.remove(index)?;
        let job = self.pending.remove(&page)?;
        self.in_flight = Some(page);
        Some(job)
    }

    /// Marks `page` done; returns false when it was not the in-flight page.
    pub fn finish(&mut self, page: usize) -> bool {
        if self.in_flight == Some(page) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Discards queued work; the in-flight page stays until it finishes.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.visible.clear();
    }

    pub fn in_flight(&self) -> Option<usize> {
        self.in_flight
    }

    pub fn is_pending(&self, page: usize) -> bool {
        self.pending.contains_key(&page)
    }

    pub fn pending_pages(&self) -> BTreeSet<usize> {
        self.pending.keys().copied().collect()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::page_cache::build_entry;
    use crate::test_support::FakeDocument;

    pub(crate) fn job(page: usize) -> RenderJob {
        RenderJob {
            page,
            zoom: 1.0,
            dpi: 72.0,
            dpr: 1.0,
            rotation: Rotation::R0,
            invert: false,
            tint: None,
            detect_urls: false,
            generation: 0,
            revision: 0,
        }
    }

    fn set(pages: &[usize]) -> BTreeSet<usize> {
        pages.iter().copied().collect()
    }

    #[test]
    fn one_job_in_flight_at_a_time() {
        let mut queue = RenderQueue::new();
        queue.request(job(1));
        queue.request(job(2));
        assert_eq!(queue.start_next().map(|j| j.page), Some(1));
        assert!(queue.start_next().is_none());
        assert!(!queue.finish(2));
        assert!(queue.finish(1));
        assert_eq!(queue.start_next().map(|j| j.page), Some(2));
        assert!(queue.finish(2));
        assert!(queue.is_idle());
    }

    #[test]
    fn pruning_keeps_only_wanted_pages() {
        let mut queue = RenderQueue::new();
        for page in 0..6 {
            queue.request(job(page));
        }
        let first = queue.start_next().unwrap();
        assert_eq!(first.page, 0);
        queue.prune(&set(&[4, 5]));
        assert_eq!(queue.pending_pages(), set(&[4, 5]));
        assert_eq!(queue.in_flight(), Some(0));
        queue.finish(0);
        assert_eq!(queue.start_next().map(|j| j.page), Some(4));
    }

    #[test]
    fn visible_pages_jump_the_queue() {
        let mut queue = RenderQueue::new();
        queue.request(job(8));
        queue.request(job(9));
        queue.request(job(3));
        queue.set_visible(set(&[3]));
        assert_eq!(queue.start_next().map(|j| j.page), Some(3));
    }

    #[test]
    fn rerequest_updates_parameters_without_duplicating() {
        let mut queue = RenderQueue::new();
        queue.request(job(2));
        queue.request(RenderJob { zoom: 2.0, ..job(2) });
        let started = queue.start_next().unwrap();
        assert_eq!(started.zoom, 2.0);
        queue.finish(2);
        assert!(queue.start_next().is_none());
    }

    #[test]
    fn execute_maps_overlays_to_device_space() {
        use crate::backend::{AnnotationKind, ObjectNumber, RawAnnotation};
        let doc = FakeDocument::builder()
            .page_size(200.0, 100.0)
            .annotation(
                0,
                RawAnnotation {
                    id: ObjectNumber(1),
                    kind: AnnotationKind::Square,
                    rect: Rect::new(10.0, 10.0, 30.0, 20.0),
                    color: None,
                    interior: Some(Color::rgba(1.0, 0.0, 0.0, 1.0)),
                    opacity: 1.0,
                    contents: None,
                    quads: Vec::new(),
                },
            )
            .build();
        let entry = build_entry(doc.as_ref(), 0).unwrap();
        let outcome = execute(
            &RenderJob {
                zoom: 2.0,
                ..job(0)
            },
            &entry,
        )
        .unwrap();
        assert_eq!((outcome.image.width, outcome.image.height), (400, 200));
        assert_eq!(
            outcome.annotations[0].device_rect,
            Rect::new(20.0, 20.0, 60.0, 40.0)
        );
        let px = |x: usize, y: usize| {
            let i = (y * 400 + x) * 4;
            [outcome.image.pixels[i], outcome.image.pixels[i + 1], outcome.image.pixels[i + 2]]
        };
        assert_eq!(px(30, 30), [255, 0, 0]);
        assert_eq!(px(100, 100), [255, 255, 255]);
    }

    #[test]
    fn rotated_render_swaps_dimensions() {
        let doc = FakeDocument::builder().page_size(200.0, 100.0).build();
        let entry = build_entry(doc.as_ref(), 0).unwrap();
        let outcome = execute(
            &RenderJob {
                rotation: Rotation::R90,
                dpr: 2.0,
                ..job(0)
            },
            &entry,
        )
        .unwrap();
        assert_eq!((outcome.image.width, outcome.image.height), (200, 400));
        assert_eq!(outcome.image.device_pixel_ratio, 2.0);
    }

    #[test]
    fn invert_and_tint_recolour_pixels() {
        let mut image = RenderImage::filled(1, 1, Color::WHITE);
        invert_luminance(&mut image);
        assert_eq!(&image.pixels[..3], &[0, 0, 0]);

        let mut image = RenderImage::filled(1, 1, Color::BLACK);
        apply_tint(&mut image, Color::from_rgba8(10, 20, 30, 255), Color::WHITE);
        assert_eq!(&image.pixels[..3], &[10, 20, 30]);
    }
}
