//! CollabCanvas Render Library
//!
//! Software rasterizer for the drawing surface. A [`Compositor`] keeps two
//! buffers: the persistent surface with every committed operation baked in,
//! and the visible surface presented each frame with the live preview and
//! cursors overlaid.

mod color;
mod compositor;
mod export;
mod images;
mod paint;
mod raster;
mod scheduler;
mod text;

pub use color::{parse_color, Rgba};
pub use compositor::{Compositor, CompositorConfig};
pub use export::{decode_png, encode_png, ExportError};
pub use images::{decode_data_url, encode_data_url, DecodeError, ImageCache};
pub use raster::{BlendMode, Mask};
pub use scheduler::FrameScheduler;
pub use text::TextRenderer;
