//! Text shaping and glyph rasterization.
//!
//! Text is laid out with cosmic-text on the system's sans-serif face and
//! its glyphs are rasterized by swash into a coverage [`Mask`]. The font
//! system is loaded on first use, since discovering system fonts is slow.

use std::fmt;

use cosmic_text::{Attrs, Buffer, Family, FontSystem, Metrics, Shaping, SwashCache, SwashContent};
use kurbo::Point;

use crate::raster::Mask;

/// Line height as a multiple of the font size.
const LINE_SPACING: f32 = 1.2;

/// Shapes and rasterizes text. Glyph bitmaps are cached across calls.
#[derive(Default)]
pub struct TextRenderer {
    engine: Option<(FontSystem, SwashCache)>,
}

impl fmt::Debug for TextRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextRenderer")
            .field("loaded", &self.engine.is_some())
            .finish()
    }
}

impl TextRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn engine(&mut self) -> (&mut FontSystem, &mut SwashCache) {
        let (fonts, cache) = self.engine.get_or_insert_with(|| {
            let fonts = FontSystem::new();
            log::debug!("Loaded {} font faces", fonts.db().len());
            (fonts, SwashCache::new())
        });
        (fonts, cache)
    }

    /// Whether any font face was found. Without one, text draws nothing.
    pub fn has_fonts(&mut self) -> bool {
        !self.engine().0.db().is_empty()
    }

    /// Rasterize `text` into `mask` with its first baseline starting at
    /// `origin`. Line breaks in `text` start new lines below.
    pub fn draw(&mut self, mask: &mut Mask, text: &str, origin: Point, font_size: f64) {
        if text.is_empty() || !(font_size > 0.0) || !origin.is_finite() {
            return;
        }
        let (fonts, cache) = self.engine();
        let size = font_size as f32;

        let mut buffer = Buffer::new(fonts, Metrics::new(size, size * LINE_SPACING));
        buffer.set_size(fonts, None, None);
        buffer.set_text(fonts, text, Attrs::new().family(Family::SansSerif), Shaping::Advanced);
        buffer.shape_until_scroll(fonts, false);

        let mut first_baseline = None;
        for run in buffer.layout_runs() {
            let first = *first_baseline.get_or_insert(run.line_y);
            let baseline = origin.y as f32 + run.line_y - first;
            for glyph in run.glyphs.iter() {
                let physical = glyph.physical((origin.x as f32, baseline), 1.0);
                let Some(image) = cache.get_image(fonts, physical.cache_key) else {
                    continue;
                };
                let placement = image.placement;
                if placement.width == 0 || placement.height == 0 {
                    continue;
                }
                // Bytes per pixel, and which byte carries coverage.
                let (stride, channel) = match image.content {
                    SwashContent::Mask => (1, 0),
                    SwashContent::Color => (4, 3),
                    SwashContent::SubpixelMask => (4, 1),
                };
                let data = &image.data;
                let width = placement.width as usize;
                mask.stamp_coverage(
                    i64::from(physical.x) + i64::from(placement.left),
                    i64::from(physical.y) - i64::from(placement.top),
                    placement.width,
                    placement.height,
                    |x, y| {
                        let i = (y as usize * width + x as usize) * stride + channel;
                        data.get(i).map_or(0.0, |&alpha| f32::from(alpha) / 255.0)
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_or_degenerate_text_draws_nothing() {
        let mut text = TextRenderer::new();
        let mut mask = Mask::new(40, 40);
        text.draw(&mut mask, "", Point::new(5.0, 30.0), 18.0);
        text.draw(&mut mask, "hi", Point::new(5.0, 30.0), 0.0);
        text.draw(&mut mask, "hi", Point::new(f64::NAN, 30.0), 18.0);
        assert!(mask.is_empty());
    }

    #[test]
    fn test_glyphs_sit_on_baseline() {
        let mut text = TextRenderer::new();
        if !text.has_fonts() {
            return;
        }
        let mut mask = Mask::new(80, 60);
        text.draw(&mut mask, "H", Point::new(10.0, 40.0), 24.0);

        let (x0, y0, _, y1) = mask.dirty_bounds().expect("glyph coverage");
        assert!(x0 >= 10);
        assert!(y1 <= 42, "ink below baseline: {}", y1);
        assert!(y0 >= 40 - 24, "ink above the em box: {}", y0);
    }

    #[test]
    fn test_larger_size_covers_more() {
        let mut text = TextRenderer::new();
        if !text.has_fonts() {
            return;
        }
        let width_at = |text: &mut TextRenderer, size: f64| {
            let mut mask = Mask::new(400, 100);
            text.draw(&mut mask, "MMM", Point::new(0.0, 80.0), size);
            mask.dirty_bounds().map_or(0, |(x0, _, x1, _)| x1 - x0)
        };
        assert!(width_at(&mut text, 36.0) > width_at(&mut text, 12.0));
    }

    #[test]
    fn test_line_breaks_start_lower_lines() {
        let mut text = TextRenderer::new();
        if !text.has_fonts() {
            return;
        }
        let mut mask = Mask::new(80, 120);
        text.draw(&mut mask, "A\nA", Point::new(5.0, 30.0), 20.0);
        let (_, _, _, y1) = mask.dirty_bounds().expect("glyph coverage");
        assert!(y1 > 40, "second line missing: {}", y1);
    }
}
