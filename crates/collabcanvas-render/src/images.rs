//! Data-URL image decoding and a per-operation cache of scaled pixels.

use std::collections::HashMap;

use base64::{Engine, engine::general_purpose::STANDARD};
use collabcanvas_core::ImageOp;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use thiserror::Error;

/// Image decoding errors.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Not a base64 data URL")]
    NotDataUrl,
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Image decode failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Decode a `data:<mime>;base64,<payload>` URL into RGBA pixels.
pub fn decode_data_url(src: &str) -> Result<RgbaImage, DecodeError> {
    let rest = src.strip_prefix("data:").ok_or(DecodeError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(DecodeError::NotDataUrl)?;
    if !header.ends_with(";base64") {
        return Err(DecodeError::NotDataUrl);
    }
    let bytes = STANDARD.decode(payload.trim())?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

/// Encode raw file bytes as a data URL, sniffing the MIME type.
pub fn encode_data_url(bytes: &[u8]) -> Result<String, DecodeError> {
    let format = image::guess_format(bytes)?;
    Ok(format!("data:{};base64,{}", format.to_mime_type(), STANDARD.encode(bytes)))
}

/// The visible part of an image operation, scaled to its placement and
/// positioned in surface pixels.
#[derive(Debug, Clone)]
pub struct PlacedImage {
    pub pixels: RgbaImage,
    pub x: i64,
    pub y: i64,
}

/// Scale the part of `decoded` that lands on a `surface`-sized canvas when
/// `op` stretches it over its placement rectangle. `None` if nothing lands.
fn place(decoded: &RgbaImage, op: &ImageOp, surface: (u32, u32)) -> Option<PlacedImage> {
    let (width, height) = (op.w.round(), op.h.round());
    let (x, y) = (op.x.round(), op.y.round());
    if !(width >= 1.0 && height >= 1.0 && x.is_finite() && y.is_finite()) {
        return None;
    }
    // Visible span in placement pixels.
    let ix0 = (-x).clamp(0.0, width);
    let iy0 = (-y).clamp(0.0, height);
    let ix1 = (surface.0 as f64 - x).clamp(0.0, width);
    let iy1 = (surface.1 as f64 - y).clamp(0.0, height);
    if ix0 >= ix1 || iy0 >= iy1 {
        return None;
    }

    // Matching span of the source, widened to whole pixels.
    let (src_w, src_h) = decoded.dimensions();
    let fx = src_w as f64 / width;
    let fy = src_h as f64 / height;
    let sx0 = ((ix0 * fx).floor() as u32).min(src_w.saturating_sub(1));
    let sy0 = ((iy0 * fy).floor() as u32).min(src_h.saturating_sub(1));
    let sx1 = ((ix1 * fx).ceil() as u32).clamp(sx0 + 1, src_w);
    let sy1 = ((iy1 * fy).ceil() as u32).clamp(sy0 + 1, src_h);

    let source = imageops::crop_imm(decoded, sx0, sy0, sx1 - sx0, sy1 - sy0).to_image();
    let pixels = imageops::resize(&source, (ix1 - ix0) as u32, (iy1 - iy0) as u32, FilterType::Triangle);
    Some(PlacedImage {
        pixels,
        x: (x + ix0) as i64,
        y: (y + iy0) as i64,
    })
}

/// Decoded images keyed by operation id, already scaled and clipped for the
/// surface they are drawn on. Failed decodes are remembered so they are not
/// retried on every rebuild.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: HashMap<String, Option<PlacedImage>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pixels for `op` on a surface of `surface` size, decoding on first
    /// use. `None` if the source cannot be decoded or nothing is visible.
    pub fn get(&mut self, op: &ImageOp, surface: (u32, u32)) -> Option<&PlacedImage> {
        self.entries
            .entry(op.id.clone())
            .or_insert_with(|| {
                if surface.0 == 0 || surface.1 == 0 {
                    return None;
                }
                match decode_data_url(&op.src_data) {
                    Ok(decoded) => place(&decoded, op, surface),
                    Err(e) => {
                        log::debug!("Skipping image {}: {}", op.id, e);
                        None
                    }
                }
            })
            .as_ref()
    }

    /// Drop entries for operations no longer in `live_ids`.
    pub fn retain<'a>(&mut self, live_ids: impl IntoIterator<Item = &'a str>) {
        let live: std::collections::HashSet<&str> = live_ids.into_iter().collect();
        self.entries.retain(|id, _| live.contains(id.as_str()));
    }

    /// Forget everything, e.g. after the surface changed size.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
