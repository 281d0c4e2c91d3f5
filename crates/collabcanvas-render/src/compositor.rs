//! Two-tier raster compositor.

use collabcanvas_core::{Cursor, Operation, Preview, Repaint};
use image::RgbaImage;

use crate::export::{encode_png, ExportError};
use crate::paint::Painter;

/// Compositor configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositorConfig {
    /// Surface width in pixels.
    pub width: u32,
    /// Surface height in pixels.
    pub height: u32,
    /// Radius of the dot marking a cursor.
    pub cursor_radius: f64,
    /// Font size of cursor name labels.
    pub cursor_label_size: f64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            cursor_radius: 4.0,
            cursor_label_size: 12.0,
        }
    }
}

impl CompositorConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width.max(1);
        self.height = height.max(1);
        self
    }

    pub fn with_cursor_style(mut self, radius: f64, label_size: f64) -> Self {
        self.cursor_radius = radius;
        self.cursor_label_size = label_size;
        self
    }
}

/// Owns the persistent surface (all committed operations baked in) and the
/// visible surface (persistent plus live preview and cursors).
///
/// The preview and cursors are only ever drawn onto the visible surface.
#[derive(Debug)]
pub struct Compositor {
    config: CompositorConfig,
    persistent: RgbaImage,
    visible: RgbaImage,
    painter: Painter,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Self {
        let (width, height) = (config.width.max(1), config.height.max(1));
        Self {
            persistent: RgbaImage::new(width, height),
            visible: RgbaImage::new(width, height),
            painter: Painter::new(width, height),
            config,
        }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn width(&self) -> u32 {
        self.persistent.width()
    }

    pub fn height(&self) -> u32 {
        self.persistent.height()
    }

    /// Clear the persistent surface and replay `history` in order.
    pub fn rebuild(&mut self, history: &[Operation]) {
        self.persistent.fill(0);
        self.painter.images().retain(history.iter().map(|op| op.id()));
        for op in history {
            self.painter.paint_operation(&mut self.persistent, op);
        }
        log::debug!("Rebuilt surface from {} operations", history.len());
    }

    /// Draw one operation on top of the persistent surface.
    pub fn append_paint(&mut self, op: &Operation) {
        self.painter.paint_operation(&mut self.persistent, op);
    }

    /// Carry out a repaint requested by the history manager.
    pub fn apply(&mut self, repaint: &Repaint, history: &[Operation]) {
        match repaint {
            Repaint::None => {}
            Repaint::Append(op) => self.append_paint(op),
            Repaint::Rebuild => self.rebuild(history),
        }
    }

    /// Resize both surfaces and replay `history` at the new size.
    pub fn resize(&mut self, width: u32, height: u32, history: &[Operation]) {
        self.config = self.config.clone().with_size(width, height);
        self.persistent = RgbaImage::new(self.config.width, self.config.height);
        self.visible = RgbaImage::new(self.config.width, self.config.height);
        self.painter.resize(self.config.width, self.config.height);
        self.rebuild(history);
    }

    /// Compose the visible surface: the persistent surface, then the gesture
    /// preview, then cursors.
    pub fn present_frame<'a>(
        &mut self,
        preview: Option<&Preview<'_>>,
        cursors: impl IntoIterator<Item = &'a Cursor>,
    ) -> &RgbaImage {
        self.visible.copy_from_slice(&self.persistent);
        if let Some(preview) = preview {
            self.painter.paint_preview(&mut self.visible, preview);
        }
        for cursor in cursors {
            self.painter.paint_cursor(
                &mut self.visible,
                cursor,
                self.config.cursor_radius,
                self.config.cursor_label_size,
            );
        }
        &self.visible
    }

    pub fn persistent(&self) -> &RgbaImage {
        &self.persistent
    }

    pub fn visible(&self) -> &RgbaImage {
        &self.visible
    }

    /// Encode the persistent surface as PNG.
    pub fn export_png(&self) -> Result<Vec<u8>, ExportError> {
        encode_png(&self.persistent)
    }
}
