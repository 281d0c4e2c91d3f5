//! Coverage masks and compositing onto RGBA surfaces.
//!
//! Geometry is rasterized into a [`Mask`] of per-pixel coverage in `[0, 1]`.
//! Overlapping primitives combine with `max`, so a stroke built from many
//! segments covers each pixel once. The mask is then composited onto a
//! surface with a solid colour and a [`BlendMode`].

use image::RgbaImage;
use kurbo::{Point, Rect, Vec2};

use crate::color::Rgba;

/// How a mask's colour combines with the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendMode {
    /// Paint over the destination.
    #[default]
    SourceOver,
    /// Remove destination alpha where the mask covers (eraser).
    DestinationOut,
}

/// Per-pixel coverage for one drawing primitive.
#[derive(Debug, Clone)]
pub struct Mask {
    width: u32,
    height: u32,
    coverage: Vec<f32>,
    /// Pixel bounds touched since the last clear, as `(x0, y0, x1, y1)`.
    dirty: Option<(u32, u32, u32, u32)>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            coverage: vec![0.0; width as usize * height as usize],
            dirty: None,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Coverage of the pixel at `(x, y)`; zero outside the mask.
    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.coverage[(y * self.width + x) as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_none()
    }

    /// Reset coverage to zero, touching only the dirty region.
    pub fn clear(&mut self) {
        if let Some((x0, y0, x1, y1)) = self.dirty.take() {
            for y in y0..y1 {
                let row = (y * self.width) as usize;
                self.coverage[row + x0 as usize..row + x1 as usize].fill(0.0);
            }
        }
    }

    /// Pixel bounds touched since the last clear.
    pub fn dirty_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        self.dirty
    }

    /// Visit every pixel whose centre lies within `bounds`, raising its
    /// coverage to whatever `f` returns for that centre.
    fn cover(&mut self, bounds: Rect, mut f: impl FnMut(Point) -> f64) {
        let x0 = bounds.x0.floor().max(0.0) as u32;
        let y0 = bounds.y0.floor().max(0.0) as u32;
        let x1 = (bounds.x1.ceil().max(0.0) as u32).min(self.width);
        let y1 = (bounds.y1.ceil().max(0.0) as u32).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            return;
        }
        self.dirty = Some(match self.dirty {
            Some((dx0, dy0, dx1, dy1)) => (dx0.min(x0), dy0.min(y0), dx1.max(x1), dy1.max(y1)),
            None => (x0, y0, x1, y1),
        });
        for y in y0..y1 {
            for x in x0..x1 {
                let c = f(Point::new(x as f64 + 0.5, y as f64 + 0.5)).clamp(0.0, 1.0) as f32;
                let slot = &mut self.coverage[(y * self.width + x) as usize];
                if c > *slot {
                    *slot = c;
                }
            }
        }
    }

    /// A round-capped segment whose width varies linearly from `wa` to `wb`.
    pub fn stamp_segment(&mut self, a: Point, b: Point, wa: f64, wb: f64) {
        let reach = wa.max(wb) / 2.0 + 1.0;
        let bounds = Rect::from_points(a, b).inflate(reach, reach);
        let ab = b - a;
        let len2 = ab.hypot2();
        self.cover(bounds, |p| {
            let t = if len2 > 0.0 { ((p - a).dot(ab) / len2).clamp(0.0, 1.0) } else { 0.0 };
            let closest = a + ab * t;
            let half = (wa + (wb - wa) * t) / 2.0;
            half - p.distance(closest) + 0.5
        });
    }

    /// A polyline of `(point, width)` samples with round joins.
    pub fn stamp_polyline(&mut self, samples: &[(Point, f64)]) {
        match samples {
            [] => {}
            [(p, w)] => self.stamp_segment(*p, *p, *w, *w),
            _ => {
                for pair in samples.windows(2) {
                    let (a, wa) = pair[0];
                    let (b, wb) = pair[1];
                    self.stamp_segment(a, b, wa, wb);
                }
            }
        }
    }

    /// Stroke the outline of `rect` with a band `width` wide centred on the edge.
    pub fn ring_rect(&mut self, rect: Rect, width: f64) {
        let half = width / 2.0;
        let center = rect.center();
        let extent = Vec2::new(rect.width() / 2.0, rect.height() / 2.0);
        let bounds = rect.inflate(half + 1.0, half + 1.0);
        self.cover(bounds, |p| {
            let d = box_distance(p - center, extent);
            half - d.abs() + 0.5
        });
    }

    /// Stroke a circle outline with a band `width` wide centred on the rim.
    pub fn ring_circle(&mut self, center: Point, radius: f64, width: f64) {
        let half = width / 2.0;
        let reach = radius + half + 1.0;
        let bounds = Rect::new(center.x - reach, center.y - reach, center.x + reach, center.y + reach);
        self.cover(bounds, |p| half - (p.distance(center) - radius).abs() + 0.5);
    }

    /// Fill a disc.
    pub fn fill_circle(&mut self, center: Point, radius: f64) {
        let reach = radius + 1.0;
        let bounds = Rect::new(center.x - reach, center.y - reach, center.x + reach, center.y + reach);
        self.cover(bounds, |p| radius - p.distance(center) + 0.5);
    }

    /// Raise coverage over the `width`x`height` block at `(left, top)` to
    /// `f(x, y)`, with `x` and `y` relative to the block. Clipped to the mask.
    pub fn stamp_coverage(&mut self, left: i64, top: i64, width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) {
        let bounds = Rect::new(
            left as f64,
            top as f64,
            left as f64 + width as f64,
            top as f64 + height as f64,
        );
        self.cover(bounds, |p| {
            let x = p.x.floor() as i64 - left;
            let y = p.y.floor() as i64 - top;
            if x < 0 || y < 0 || x >= i64::from(width) || y >= i64::from(height) {
                return 0.0;
            }
            f64::from(f(x as u32, y as u32))
        });
    }

    /// Fill an axis-aligned rectangle with area-weighted edge coverage.
    pub fn fill_rect(&mut self, rect: Rect) {
        let rect = rect.abs();
        self.cover(rect.inflate(1.0, 1.0), |p| {
            let ox = (rect.x1.min(p.x + 0.5) - rect.x0.max(p.x - 0.5)).max(0.0);
            let oy = (rect.y1.min(p.y + 0.5) - rect.y0.max(p.y - 0.5)).max(0.0);
            ox * oy
        });
    }
}

/// Signed distance from `p` (relative to the box centre) to a box edge.
fn box_distance(p: Vec2, extent: Vec2) -> f64 {
    let q = Vec2::new(p.x.abs() - extent.x, p.y.abs() - extent.y);
    let outside = Vec2::new(q.x.max(0.0), q.y.max(0.0)).hypot();
    outside + q.x.max(q.y).min(0.0)
}

/// Composite `mask` filled with `color` onto `surface`.
pub fn composite(surface: &mut RgbaImage, mask: &Mask, color: Rgba, mode: BlendMode) {
    let Some((x0, y0, x1, y1)) = mask.dirty_bounds() else {
        return;
    };
    let x1 = x1.min(surface.width());
    let y1 = y1.min(surface.height());
    let color_alpha = color[3] as f32 / 255.0;
    for y in y0..y1 {
        for x in x0..x1 {
            let coverage = mask.get(x, y);
            if coverage <= 0.0 {
                continue;
            }
            let src_alpha = coverage * color_alpha;
            let dst = surface.get_pixel_mut(x, y);
            match mode {
                BlendMode::SourceOver => blend_over(dst, [color[0], color[1], color[2]], src_alpha),
                BlendMode::DestinationOut => {
                    let a = dst[3] as f32 * (1.0 - coverage);
                    dst[3] = a.round() as u8;
                    if dst[3] == 0 {
                        *dst = image::Rgba([0, 0, 0, 0]);
                    }
                }
            }
        }
    }
}

/// Straight-alpha source-over for a single pixel.
pub(crate) fn blend_over(dst: &mut Rgba, src: [u8; 3], src_alpha: f32) {
    if src_alpha <= 0.0 {
        return;
    }
    let dst_alpha = dst[3] as f32 / 255.0;
    let out_alpha = src_alpha + dst_alpha * (1.0 - src_alpha);
    if out_alpha <= 0.0 {
        *dst = image::Rgba([0, 0, 0, 0]);
        return;
    }
    for i in 0..3 {
        let c = (src[i] as f32 * src_alpha + dst[i] as f32 * dst_alpha * (1.0 - src_alpha)) / out_alpha;
        dst[i] = c.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Draw `image` source-over with its top-left corner at `(x, y)`.
pub fn draw_image(surface: &mut RgbaImage, image: &RgbaImage, x: i64, y: i64) {
    for (ix, iy, pixel) in image.enumerate_pixels() {
        let sx = x + ix as i64;
        let sy = y + iy as i64;
        if sx < 0 || sy < 0 || sx >= surface.width() as i64 || sy >= surface.height() as i64 {
            continue;
        }
        let dst = surface.get_pixel_mut(sx as u32, sy as u32);
        blend_over(dst, [pixel[0], pixel[1], pixel[2]], pixel[3] as f32 / 255.0);
    }
}
