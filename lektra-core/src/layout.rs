//! Scene geometry for the page strip: per-page extents, cumulative offsets
//! along the primary axis, and the scrollable scene rectangle.

use crate::geometry::{Rect, Rotation};
use crate::types::LayoutMode;

#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    mode: LayoutMode,
    sizes: Vec<(f32, f32)>,
    /// Primary-axis start of every page, plus the end of the strip.
    offsets: Vec<f32>,
    spacing: f32,
    max_cross: f32,
    margin: f32,
}

impl PageLayout {
    /// `scale` turns points into scene units; `spacing` and `margin` are
    /// already in scene units.
    pub fn new(
        mode: LayoutMode,
        bounds: &[Rect],
        scale: f32,
        rotation: Rotation,
        spacing: f32,
        margin: f32,
    ) -> Self {
        let sizes: Vec<(f32, f32)> = bounds
            .iter()
            .map(|b| {
                let (w, h) = (b.width() * scale, b.height() * scale);
                if rotation.is_sideways() {
                    (h, w)
                } else {
                    (w, h)
                }
            })
            .collect();

        let horizontal = mode == LayoutMode::Horizontal;
        let mut offsets = Vec::with_capacity(sizes.len() + 1);
        let mut cursor = 0.0;
        let mut max_cross: f32 = 0.0;
        for &(w, h) in &sizes {
            offsets.push(cursor);
            let (primary, cross) = if horizontal { (w, h) } else { (h, w) };
            cursor += primary + spacing;
            max_cross = max_cross.max(cross);
        }
        offsets.push(cursor);

        Self {
            mode,
            sizes,
            offsets,
            spacing,
            max_cross,
            margin,
        }
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn page_count(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_horizontal(&self) -> bool {
        self.mode == LayoutMode::Horizontal
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn page_size(&self, page: usize) -> (f32, f32) {
        self.sizes.get(page).copied().unwrap_or((0.0, 0.0))
    }

    /// Primary-axis advance from `page` to the next one.
    pub fn stride(&self, page: usize) -> f32 {
        match (self.offsets.get(page), self.offsets.get(page + 1)) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }

    pub fn offset(&self, page: usize) -> f32 {
        self.offsets.get(page).copied().unwrap_or(0.0)
    }

    /// Length of the strip without the trailing gap.
    pub fn total_extent(&self) -> f32 {
        match self.offsets.last() {
            Some(end) if !self.sizes.is_empty() => end - self.spacing,
            _ => 0.0,
        }
    }

    /// Where `page` sits in the scene. In single mode every page occupies
    /// the origin.
    pub fn page_rect(&self, page: usize) -> Rect {
        let (w, h) = self.page_size(page);
        match self.mode {
            LayoutMode::Single => Rect::from_xywh(0.0, 0.0, w, h),
            LayoutMode::Vertical => {
                Rect::from_xywh((self.max_cross - w) / 2.0, self.offset(page), w, h)
            }
            LayoutMode::Horizontal => {
                Rect::from_xywh(self.offset(page), (self.max_cross - h) / 2.0, w, h)
            }
        }
    }

    /// Page whose slot covers primary-axis coordinate `pos`; gaps belong to
    /// the page before them.
    pub fn page_at(&self, pos: f32) -> usize {
        let n = self.sizes.len();
        if n == 0 {
            return 0;
        }
        let idx = self.offsets[..n].partition_point(|&o| o <= pos);
        idx.saturating_sub(1).min(n - 1)
    }

    /// Pages intersecting `[lo, hi]` on the primary axis.
    pub fn pages_between(&self, lo: f32, hi: f32) -> std::ops::RangeInclusive<usize> {
        self.page_at(lo)..=self.page_at(hi.max(lo))
    }

    /// Scrollable area for a view of `view` size. The strip is padded so
    /// the first and last pages can be centred, and centred across the
    /// cross axis when narrower than the view.
    pub fn scene_rect(&self, view: (f32, f32), current: usize) -> Rect {
        let (vw, vh) = view;
        match self.mode {
            LayoutMode::Single => {
                let (w, h) = self.page_size(current);
                let xm = ((vw - w) / 2.0).max(0.0);
                let ym = ((vh - h) / 2.0).max(0.0);
                Rect::from_xywh(-xm, -ym, vw.max(w), vh.max(h))
            }
            LayoutMode::Vertical => {
                let (start, end) = self.primary_padding(vh);
                let xm = ((vw - self.max_cross) / 2.0).max(0.0);
                Rect::new(-xm, -start, self.max_cross + xm, self.total_extent() + end)
            }
            LayoutMode::Horizontal => {
                let (start, end) = self.primary_padding(vw);
                let ym = ((vh - self.max_cross) / 2.0).max(0.0);
                Rect::new(-start, -ym, self.total_extent() + end, self.max_cross + ym)
            }
        }
    }

    fn primary_padding(&self, view: f32) -> (f32, f32) {
        let extent = |page: usize| {
            let (w, h) = self.page_size(page);
            if self.is_horizontal() {
                w
            } else {
                h
            }
        };
        let last = self.sizes.len().saturating_sub(1);
        (
            self.margin.max((view - extent(0)) / 2.0),
            self.margin.max((view - extent(last)) / 2.0),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(n: usize, w: f32, h: f32) -> Vec<Rect> {
        vec![Rect::new(0.0, 0.0, w, h); n]
    }

    #[test]
    fn vertical_offsets_accumulate_with_spacing() {
        let layout = PageLayout::new(LayoutMode::Vertical, &pages(3, 100.0, 200.0), 1.0, Rotation::R0, 10.0, 5.0);

        assert_eq!(layout.offset(2), 420.0);
        assert_eq!(layout.stride(1), 210.0);
        assert_eq!(layout.total_extent(), 620.0);
        assert_eq!(layout.page_at(0.0), 0);
        assert_eq!(layout.page_at(205.0), 0);
        assert_eq!(layout.page_at(215.0), 1);
        assert_eq!(layout.page_at(10_000.0), 2);
        assert_eq!(layout.pages_between(150.0, 430.0), 0..=2);
    }

    #[test]
    fn mixed_sizes_are_centred_across_the_strip() {
        let bounds = vec![Rect::new(0.0, 0.0, 100.0, 100.0), Rect::new(0.0, 0.0, 200.0, 100.0)];
        let layout = PageLayout::new(LayoutMode::Vertical, &bounds, 1.0, Rotation::R0, 0.0, 0.0);

        assert_eq!(layout.page_rect(0), Rect::new(50.0, 0.0, 150.0, 100.0));
        assert_eq!(layout.page_rect(1), Rect::new(0.0, 100.0, 200.0, 200.0));
    }

    #[test]
    fn rotation_swaps_extents() {
        let layout = PageLayout::new(LayoutMode::Horizontal, &pages(2, 800.0, 600.0), 0.5, Rotation::R90, 10.0, 0.0);

        assert_eq!(layout.page_size(0), (300.0, 400.0));
        assert_eq!(layout.stride(0), 310.0);
        assert_eq!(layout.page_rect(1).x0, 310.0);
    }

    #[test]
    fn horizontal_scene_lets_the_last_page_be_centred() {
        let layout = PageLayout::new(LayoutMode::Horizontal, &pages(3, 100.0, 100.0), 1.0, Rotation::R0, 10.0, 10.0);
        let view = (400.0, 300.0);
        let scene = layout.scene_rect(view, 0);

        let last = layout.page_rect(2);
        let centred_scroll = last.center().x - view.0 / 2.0;
        assert!(centred_scroll <= scene.x1 - view.0 + 0.001);
        let first = layout.page_rect(0);
        assert!(first.center().x - view.0 / 2.0 >= scene.x0 - 0.001);
        assert_eq!(scene.height(), 300.0);
    }

    #[test]
    fn single_mode_centres_the_current_page() {
        let layout = PageLayout::new(LayoutMode::Single, &pages(2, 100.0, 50.0), 1.0, Rotation::R0, 10.0, 0.0);
        let scene = layout.scene_rect((300.0, 100.0), 1);

        assert_eq!(scene, Rect::new(-100.0, -25.0, 200.0, 75.0));
        assert_eq!(layout.page_rect(1), Rect::new(0.0, 0.0, 100.0, 50.0));
    }
}
