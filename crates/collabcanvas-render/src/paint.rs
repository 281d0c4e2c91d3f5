//! Turning operations, previews and cursors into pixels.

use collabcanvas_core::{Cursor, Operation, Preview, ShapeGeometry, StrokePoint, StrokeTool};
use image::RgbaImage;
use kurbo::{CubicBez, ParamCurve, Point, Rect};

use crate::color::parse_color;
use crate::images::ImageCache;
use crate::raster::{composite, draw_image, BlendMode, Mask};
use crate::text::TextRenderer;

/// Dash pattern for shape previews, in pixels on then off.
pub(crate) const PREVIEW_DASH: [f64; 2] = [6.0, 6.0];

/// Maximum length of one flattened piece of a stroke curve.
const FLATTEN_STEP: f64 = 2.0;

/// Text larger than this multiple of the surface's longer side is skipped.
const MAX_FONT_SCALE: f64 = 2.0;

/// Splits deeper than this leave the remaining piece as a single chord.
const MAX_SPLIT_DEPTH: u32 = 48;

/// Sample a freehand path into `(point, width)` pairs for a surface covering
/// `surface`.
///
/// Fewer than three points are joined with straight segments. Longer paths
/// follow a Catmull-Rom spline through every point, with control points at a
/// sixth of the neighbouring chord and the end points repeated. Curve pieces
/// entirely off the surface are kept as a single chord, so the sample count
/// follows the visible length of the path rather than its full length.
pub(crate) fn stroke_samples(path: &[StrokePoint], surface: Rect) -> Vec<(Point, f64)> {
    if path.len() < 3 {
        return path.iter().map(|p| (p.point(), p.size)).collect();
    }
    let widest = path.iter().map(|p| p.size).fold(0.0, f64::max);
    let reach = (widest / 2.0 + 1.0).min(surface.width() + surface.height());
    let clip = surface.inflate(reach, reach);
    let uniform_limit = 2.0 * (clip.width() + clip.height());

    let last = path.len() - 1;
    let mut samples = vec![(path[0].point(), path[0].size)];
    for i in 0..last {
        let p0 = path[i.saturating_sub(1)].point();
        let p1 = path[i].point();
        let p2 = path[i + 1].point();
        let p3 = path[(i + 2).min(last)].point();
        let curve = CubicBez::new(p1, p1 + (p2 - p0) / 6.0, p2 - (p3 - p1) / 6.0, p2);
        let piece = CurvePiece {
            curve,
            widths: (path[i].size, path[i + 1].size),
        };
        piece.flatten(clip, uniform_limit, 0, &mut samples);
    }
    samples
}

/// A stretch of stroke curve with the widths at either end.
struct CurvePiece {
    curve: CubicBez,
    widths: (f64, f64),
}

impl CurvePiece {
    fn hull_length(&self) -> f64 {
        let c = &self.curve;
        c.p0.distance(c.p1) + c.p1.distance(c.p2) + c.p2.distance(c.p3)
    }

    fn touches(&self, clip: Rect) -> bool {
        let c = &self.curve;
        let bounds = Rect::from_points(c.p0, c.p1).union_pt(c.p2).union_pt(c.p3);
        bounds.x0 <= clip.x1 && bounds.x1 >= clip.x0 && bounds.y0 <= clip.y1 && bounds.y1 >= clip.y0
    }

    /// Append samples after the start point, ending exactly at the end point.
    fn flatten(&self, clip: Rect, uniform_limit: f64, depth: u32, out: &mut Vec<(Point, f64)>) {
        let (w1, w2) = self.widths;
        if !self.touches(clip) || depth >= MAX_SPLIT_DEPTH {
            // The chord stays inside the control hull, so it is off the
            // surface too.
            out.push((self.curve.p3, w2));
            return;
        }
        let hull = self.hull_length();
        if hull > uniform_limit {
            let (a, b) = self.curve.subdivide();
            let mid = (w1 + w2) / 2.0;
            CurvePiece { curve: a, widths: (w1, mid) }.flatten(clip, uniform_limit, depth + 1, out);
            CurvePiece { curve: b, widths: (mid, w2) }.flatten(clip, uniform_limit, depth + 1, out);
            return;
        }
        let steps = (hull / FLATTEN_STEP).ceil().max(1.0) as usize;
        for k in 1..=steps {
            let t = k as f64 / steps as f64;
            out.push((self.curve.eval(t), w1 + (w2 - w1) * t));
        }
    }
}

/// Closed or open outline of a shape as a polyline.
fn shape_outline(geometry: &ShapeGeometry) -> Vec<Point> {
    match *geometry {
        ShapeGeometry::Line { x1, y1, x2, y2 } => vec![Point::new(x1, y1), Point::new(x2, y2)],
        ShapeGeometry::Rect { x, y, w, h } => vec![
            Point::new(x, y),
            Point::new(x + w, y),
            Point::new(x + w, y + h),
            Point::new(x, y + h),
            Point::new(x, y),
        ],
        ShapeGeometry::Circle { cx, cy, r } => {
            let n = ((std::f64::consts::TAU * r / FLATTEN_STEP).ceil() as usize).max(24);
            (0..=n)
                .map(|i| {
                    let a = std::f64::consts::TAU * i as f64 / n as f64;
                    Point::new(cx + r * a.cos(), cy + r * a.sin())
                })
                .collect()
        }
    }
}

/// Stamp a polyline as dashes following `pattern`.
fn stamp_dashed(mask: &mut Mask, outline: &[Point], width: f64, pattern: [f64; 2]) {
    let period = pattern[0] + pattern[1];
    if period <= 0.0 {
        return;
    }
    let mut travelled = 0.0;
    for pair in outline.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let len = a.distance(b);
        let mut pos = 0.0;
        while pos < len {
            let phase = (travelled + pos) % period;
            let (on, remaining) = if phase < pattern[0] {
                (true, pattern[0] - phase)
            } else {
                (false, period - phase)
            };
            let end = (pos + remaining).min(len);
            if on {
                mask.stamp_segment(a.lerp(b, pos / len), a.lerp(b, end / len), width, width);
            }
            pos = end;
        }
        travelled += len;
    }
}

fn stroke_mode(tool: StrokeTool) -> BlendMode {
    match tool {
        StrokeTool::Brush => BlendMode::SourceOver,
        StrokeTool::Eraser => BlendMode::DestinationOut,
    }
}

fn surface_rect(surface: &RgbaImage) -> Rect {
    Rect::new(0.0, 0.0, surface.width() as f64, surface.height() as f64)
}

/// Scratch state shared by every paint call of one compositor. The mask is
/// left cleared after each call.
#[derive(Debug)]
pub(crate) struct Painter {
    mask: Mask,
    images: ImageCache,
    text: TextRenderer,
}

impl Painter {
    pub(crate) fn new(width: u32, height: u32) -> Self {
        Self {
            mask: Mask::new(width, height),
            images: ImageCache::new(),
            text: TextRenderer::new(),
        }
    }

    /// Match a resized surface. Cached images are placed for the old size.
    pub(crate) fn resize(&mut self, width: u32, height: u32) {
        self.mask = Mask::new(width, height);
        self.images.clear();
    }

    pub(crate) fn images(&mut self) -> &mut ImageCache {
        &mut self.images
    }

    /// Paint one committed operation onto `surface`.
    pub(crate) fn paint_operation(&mut self, surface: &mut RgbaImage, op: &Operation) {
        match op {
            Operation::Stroke(stroke) => {
                self.mask.stamp_polyline(&stroke_samples(&stroke.path, surface_rect(surface)));
                composite(surface, &self.mask, parse_color(&stroke.color), stroke_mode(stroke.tool));
            }
            Operation::Shape(shape) => {
                match shape.geometry {
                    ShapeGeometry::Line { x1, y1, x2, y2 } => {
                        self.mask
                            .stamp_segment(Point::new(x1, y1), Point::new(x2, y2), shape.size, shape.size)
                    }
                    ShapeGeometry::Rect { x, y, w, h } => {
                        self.mask.ring_rect(Rect::new(x, y, x + w, y + h), shape.size)
                    }
                    ShapeGeometry::Circle { cx, cy, r } => self.mask.ring_circle(Point::new(cx, cy), r, shape.size),
                }
                composite(surface, &self.mask, parse_color(&shape.color), BlendMode::SourceOver);
            }
            Operation::Text(text) => {
                let font_size = text.font_size();
                if font_size > MAX_FONT_SCALE * surface.width().max(surface.height()) as f64 {
                    log::debug!("Skipping text {}: font size {} exceeds the surface", text.id, font_size);
                } else {
                    self.text
                        .draw(&mut self.mask, &text.text, Point::new(text.x, text.y), font_size);
                    composite(surface, &self.mask, parse_color(&text.color), BlendMode::SourceOver);
                }
            }
            Operation::Image(image) => {
                if let Some(placed) = self.images.get(image, surface.dimensions()) {
                    draw_image(surface, &placed.pixels, placed.x, placed.y);
                }
            }
        }
        self.mask.clear();
    }

    /// Paint the gesture in progress.
    pub(crate) fn paint_preview(&mut self, surface: &mut RgbaImage, preview: &Preview<'_>) {
        match preview {
            Preview::Stroke { tool, color, points, .. } => {
                self.mask.stamp_polyline(&stroke_samples(points, surface_rect(surface)));
                composite(surface, &self.mask, parse_color(color), stroke_mode(*tool));
            }
            Preview::Shape { color, size, geometry } => {
                stamp_dashed(&mut self.mask, &shape_outline(geometry), *size, PREVIEW_DASH);
                composite(surface, &self.mask, parse_color(color), BlendMode::SourceOver);
            }
        }
        self.mask.clear();
    }

    /// Paint a cursor as a dot with the participant's name beside it.
    pub(crate) fn paint_cursor(&mut self, surface: &mut RgbaImage, cursor: &Cursor, radius: f64, label_size: f64) {
        if cursor.is_hidden() {
            return;
        }
        let at = Point::new(cursor.x, cursor.y);
        self.mask.fill_circle(at, radius);
        let baseline = Point::new(at.x + radius * 2.0, at.y + label_size / 3.0);
        self.text.draw(&mut self.mask, &cursor.name, baseline, label_size);
        composite(surface, &self.mask, parse_color(&cursor.color), BlendMode::SourceOver);
        self.mask.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use collabcanvas_core::{ImageOp, StrokeOp, TextOp};

    const SURFACE: Rect = Rect::new(0.0, 0.0, 64.0, 64.0);

    fn pt(x: f64, y: f64) -> StrokePoint {
        StrokePoint::new(x, y, 4.0)
    }

    fn stroke(path: Vec<StrokePoint>) -> Operation {
        Operation::Stroke(StrokeOp {
            id: "s1".into(),
            user_id: "u1".into(),
            tool: StrokeTool::Brush,
            color: "#000000".into(),
            size: 4.0,
            path,
        })
    }

    #[test]
    fn test_short_paths_are_straight() {
        let samples = stroke_samples(&[pt(0.0, 0.0), pt(10.0, 0.0)], SURFACE);
        assert_eq!(samples.len(), 2);
        assert!(stroke_samples(&[], SURFACE).is_empty());
    }

    #[test]
    fn test_spline_passes_through_every_point() {
        let path = [pt(0.0, 0.0), pt(10.0, 10.0), pt(20.0, 0.0), pt(30.0, 10.0)];
        let samples = stroke_samples(&path, SURFACE);
        for p in &path {
            assert!(
                samples.iter().any(|(s, _)| s.distance(p.point()) < 1e-9),
                "missing {:?}",
                p
            );
        }
        assert_eq!(samples.last().map(|(p, _)| *p), Some(Point::new(30.0, 10.0)));
    }

    #[test]
    fn test_widths_interpolate() {
        let path = [
            StrokePoint::new(0.0, 0.0, 2.0),
            StrokePoint::new(10.0, 0.0, 6.0),
            StrokePoint::new(20.0, 0.0, 6.0),
        ];
        let samples = stroke_samples(&path, SURFACE);
        assert!(samples.iter().all(|(_, w)| (2.0..=6.0).contains(w)));
    }

    #[test]
    fn test_dashes_leave_gaps() {
        let mut mask = Mask::new(40, 10);
        stamp_dashed(&mut mask, &[Point::new(0.0, 5.0), Point::new(40.0, 5.0)], 2.0, PREVIEW_DASH);
        // On for x in [0, 6), off for [6, 12), on again from 12.
        assert!(mask.get(3, 4) > 0.5);
        assert_eq!(mask.get(9, 4), 0.0);
        assert!(mask.get(15, 4) > 0.5);
    }

    #[test]
    fn test_hidden_cursor_draws_nothing() {
        let mut surface = RgbaImage::new(20, 20);
        let mut painter = Painter::new(20, 20);
        let cursor = Cursor {
            user_id: "u".into(),
            name: "U".into(),
            color: "#f00".into(),
            x: -9999.0,
            y: -9999.0,
        };
        painter.paint_cursor(&mut surface, &cursor, 4.0, 12.0);
        assert!(surface.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_offscreen_curve_costs_few_samples() {
        let path = [pt(0.0, 0.0), pt(1_000_000.0, 0.0), pt(2_000_000.0, 0.0)];
        let samples = stroke_samples(&path, SURFACE);
        assert!(samples.len() < 500, "{} samples", samples.len());
        assert_eq!(samples.first().map(|(p, _)| *p), Some(Point::new(0.0, 0.0)));
        assert_eq!(samples.last().map(|(p, _)| *p), Some(Point::new(2_000_000.0, 0.0)));
    }

    #[test]
    fn test_visible_curve_sampling_ignores_surface_size() {
        let path = [pt(0.0, 32.0), pt(30.0, 10.0), pt(60.0, 32.0)];
        let large = Rect::new(0.0, 0.0, 1000.0, 1000.0);
        assert_eq!(stroke_samples(&path, SURFACE), stroke_samples(&path, large));
    }

    #[test]
    fn test_huge_stroke_still_paints_visible_part() {
        let mut surface = RgbaImage::new(64, 64);
        let mut painter = Painter::new(64, 64);
        let op = stroke(vec![pt(-1_000_000.0, 32.0), pt(32.0, 32.0), pt(1_000_000.0, 32.0)]);
        painter.paint_operation(&mut surface, &op);
        assert_eq!(surface.get_pixel(5, 32)[3], 255);
        assert_eq!(surface.get_pixel(60, 32)[3], 255);
        assert_eq!(surface.get_pixel(32, 5)[3], 0);
    }

    #[test]
    fn test_oversized_text_is_skipped() {
        let mut surface = RgbaImage::new(64, 64);
        let mut painter = Painter::new(64, 64);
        let op = Operation::Text(TextOp {
            id: "t1".into(),
            user_id: "u1".into(),
            color: "#000000".into(),
            size: 1.0e6,
            x: 0.0,
            y: 32.0,
            text: "W".into(),
        });
        painter.paint_operation(&mut surface, &op);
        assert!(surface.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn test_images_are_cached_at_visible_size() {
        let mut surface = RgbaImage::new(64, 64);
        let mut painter = Painter::new(64, 64);
        let op = ImageOp {
            id: "i1".into(),
            user_id: "u1".into(),
            x: 0.0,
            y: 0.0,
            w: 4000.0,
            h: 4000.0,
            src_data: crate::images::tests::png_data_url(2, 2, [0, 0, 255, 255]),
        };
        painter.paint_operation(&mut surface, &Operation::Image(op.clone()));
        assert_eq!(*surface.get_pixel(63, 63), image::Rgba([0, 0, 255, 255]));
        let placed = painter.images().get(&op, (64, 64)).map(|p| p.pixels.dimensions());
        assert_eq!(placed, Some((64, 64)));
    }
}
