//! Page-space geometry shared by the cache, renderer, selection and viewport.
//!
//! Page space is measured in PDF points with the origin at the top-left corner
//! and y growing downwards. Matrices use the row-vector convention
//! `[x y 1] * M`, so `a.concat(&b)` applies `a` first and `b` second.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_sq(&self, other: Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub const EMPTY: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 0.0,
        y1: 0.0,
    };

    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Normalised rect spanning two arbitrary corners.
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    /// Bounding box of a set of points, `None` when the iterator is empty.
    pub fn bounding<I: IntoIterator<Item = Point>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut rect = Rect::new(first.x, first.y, first.x, first.y);
        for p in iter {
            rect.x0 = rect.x0.min(p.x);
            rect.y0 = rect.y0.min(p.y);
            rect.x1 = rect.x1.max(p.x);
            rect.y1 = rect.y1.max(p.y);
        }
        Some(rect)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        !(self.x1 > self.x0 && self.y1 > self.y0)
    }

    pub fn is_infinite(&self) -> bool {
        !(self.x0.is_finite() && self.y0.is_finite() && self.x1.is_finite() && self.y1.is_finite())
    }

    pub fn is_valid(&self) -> bool {
        !self.is_infinite() && !self.is_empty()
    }

    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.x0, self.y0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.x0.max(other.x0),
            self.y0.max(other.y0),
            self.x1.min(other.x1),
            self.y1.min(other.y1),
        );
        if r.is_empty() {
            Rect::EMPTY
        } else {
            r
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::new(
            self.x0.min(other.x0),
            self.y0.min(other.y0),
            self.x1.max(other.x1),
            self.y1.max(other.y1),
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect::new(self.x0 + dx, self.y0 + dy, self.x1 + dx, self.y1 + dy)
    }

    pub fn scale(&self, s: f32) -> Rect {
        Rect::new(self.x0 * s, self.y0 * s, self.x1 * s, self.y1 * s)
    }

    /// Smallest integer rect covering this one, tolerant of float noise.
    pub fn round_out(&self) -> IRect {
        IRect {
            x0: (self.x0 + 0.001).floor() as i32,
            y0: (self.y0 + 0.001).floor() as i32,
            x1: (self.x1 - 0.001).ceil() as i32,
            y1: (self.y1 - 0.001).ceil() as i32,
        }
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            Point::new(self.x0, self.y0),
            Point::new(self.x1, self.y0),
            Point::new(self.x0, self.y1),
            Point::new(self.x1, self.y1),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl IRect {
    pub fn width(&self) -> u32 {
        (self.x1 - self.x0).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y1 - self.y0).max(0) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x0 as f32, self.y0 as f32, self.x1 as f32, self.y1 as f32)
    }
}

/// Four corners of a run of glyphs; not necessarily axis aligned.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Quad {
    pub ul: Point,
    pub ur: Point,
    pub ll: Point,
    pub lr: Point,
}

impl Quad {
    pub fn from_rect(r: &Rect) -> Self {
        Self {
            ul: Point::new(r.x0, r.y0),
            ur: Point::new(r.x1, r.y0),
            ll: Point::new(r.x0, r.y1),
            lr: Point::new(r.x1, r.y1),
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::bounding([self.ul, self.ur, self.ll, self.lr]).unwrap_or(Rect::EMPTY)
    }

    pub fn contains(&self, p: Point) -> bool {
        self.bounds().contains(p)
    }

    /// Polygon order used for filled paths: ll, lr, ur, ul.
    pub fn polygon(&self) -> [Point; 4] {
        [self.ll, self.lr, self.ur, self.ul]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Normalises any multiple of 90 degrees; other angles snap down.
    pub fn from_degrees(degrees: i32) -> Self {
        match degrees.rem_euclid(360) / 90 {
            1 => Rotation::R90,
            2 => Rotation::R180,
            3 => Rotation::R270,
            _ => Rotation::R0,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    pub fn is_sideways(self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }

    pub fn clockwise(self) -> Self {
        Self::from_degrees(self.degrees() + 90)
    }

    pub fn anticlockwise(self) -> Self {
        Self::from_degrees(self.degrees() - 90)
    }

    /// (|cos|, |sin|) of the angle.
    pub fn abs_cos_sin(self) -> (f32, f32) {
        if self.is_sideways() {
            (0.0, 1.0)
        } else {
            (1.0, 0.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self {
            e: tx,
            f: ty,
            ..Self::IDENTITY
        }
    }

    /// Exact for quarter turns so device rects stay integral.
    pub fn rotate(rotation: Rotation) -> Self {
        let (s, c) = match rotation {
            Rotation::R0 => (0.0, 1.0),
            Rotation::R90 => (1.0, 0.0),
            Rotation::R180 => (0.0, -1.0),
            Rotation::R270 => (-1.0, 0.0),
        };
        Self {
            a: c,
            b: s,
            c: -s,
            d: c,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self` followed by `other`.
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// `rotation` applied before `self`.
    pub fn pre_rotate(&self, rotation: Rotation) -> Matrix {
        Matrix::rotate(rotation).concat(self)
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let rdet = 1.0 / det;
        let a = self.d * rdet;
        let b = -self.b * rdet;
        let c = -self.c * rdet;
        let d = self.a * rdet;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -self.e * a - self.f * c,
            f: -self.e * b - self.f * d,
        })
    }

    pub fn transform_point(&self, p: Point) -> Point {
        Point::new(
            p.x * self.a + p.y * self.c + self.e,
            p.x * self.b + p.y * self.d + self.f,
        )
    }

    pub fn transform_rect(&self, r: &Rect) -> Rect {
        if r.is_infinite() {
            return *r;
        }
        Rect::bounding(r.corners().map(|p| self.transform_point(p))).unwrap_or(Rect::EMPTY)
    }

    pub fn transform_quad(&self, q: &Quad) -> Quad {
        Quad {
            ul: self.transform_point(q.ul),
            ur: self.transform_point(q.ur),
            ll: self.transform_point(q.ll),
            lr: self.transform_point(q.lr),
        }
    }
}

/// Page to device transform used by both the renderer and coordinate mapping:
/// scale by `scale` after rotating, then shift so the rounded device bbox
/// starts at the origin.
pub fn page_to_device(bounds: &Rect, scale: f32, rotation: Rotation) -> Matrix {
    let ctm = Matrix::scale(scale, scale).pre_rotate(rotation);
    let device = ctm.transform_rect(bounds).round_out();
    ctm.concat(&Matrix::translate(-device.x0 as f32, -device.y0 as f32))
}

/// Integer pixel box produced by [`page_to_device`].
pub fn device_bounds(bounds: &Rect, scale: f32, rotation: Rotation) -> IRect {
    Matrix::scale(scale, scale)
        .pre_rotate(rotation)
        .transform_rect(bounds)
        .round_out()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Point, b: Point) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn rotation_normalises_degrees() {
        assert_eq!(Rotation::from_degrees(-90), Rotation::R270);
        assert_eq!(Rotation::from_degrees(450), Rotation::R90);
        assert_eq!(Rotation::R270.clockwise(), Rotation::R0);
        assert_eq!(Rotation::R0.anticlockwise(), Rotation::R270);
    }

    #[test]
    fn invert_undoes_transform() {
        let m = Matrix::scale(2.0, 3.0)
            .pre_rotate(Rotation::R90)
            .concat(&Matrix::translate(10.0, -4.0));
        let inv = m.invert().unwrap();
        let p = Point::new(12.5, -7.25);
        assert!(approx(inv.transform_point(m.transform_point(p)), p));
    }

    #[test]
    fn page_to_device_maps_bounds_to_origin_for_every_rotation() {
        let bounds = Rect::new(0.0, 0.0, 800.0, 600.0);
        for rotation in [Rotation::R0, Rotation::R90, Rotation::R180, Rotation::R270] {
            let m = page_to_device(&bounds, 0.5, rotation);
            let device = m.transform_rect(&bounds);
            assert!(device.x0.abs() < 1e-3, "{rotation:?}");
            assert!(device.y0.abs() < 1e-3, "{rotation:?}");
            let (w, h) = if rotation.is_sideways() {
                (300.0, 400.0)
            } else {
                (400.0, 300.0)
            };
            assert!((device.width() - w).abs() < 1e-3);
            assert!((device.height() - h).abs() < 1e-3);
        }
    }

    #[test]
    fn quarter_turn_is_clockwise() {
        let bounds = Rect::new(0.0, 0.0, 100.0, 50.0);
        let m = page_to_device(&bounds, 1.0, Rotation::R90);
        // top-left of the page lands at the top-right of the device image
        assert!(approx(m.transform_point(Point::new(0.0, 0.0)), Point::new(50.0, 0.0)));
        assert!(approx(m.transform_point(Point::new(0.0, 50.0)), Point::new(0.0, 0.0)));
    }

    #[test]
    fn rect_set_operations() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 15.0, 15.0);
        assert!(a.intersects(&b));
        assert_eq!(a.intersect(&b), Rect::new(5.0, 5.0, 10.0, 10.0));
        assert_eq!(a.union(&b), Rect::new(0.0, 0.0, 15.0, 15.0));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 20.0, 10.0)));
        assert!(Rect::new(0.0, 0.0, f32::INFINITY, 1.0).is_infinite());
    }
}
