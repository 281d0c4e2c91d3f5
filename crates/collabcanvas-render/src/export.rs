//! PNG encoding of surfaces.

use image::RgbaImage;
use thiserror::Error;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("PNG decoding failed: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("Unsupported PNG layout: {0}")]
    Unsupported(String),
}

/// Encode a surface as an 8-bit RGBA PNG.
pub fn encode_png(surface: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, surface.width(), surface.height());
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(surface.as_raw())?;
    }
    Ok(png_data)
}

/// Decode an 8-bit RGBA PNG produced by [`encode_png`].
pub fn decode_png(bytes: &[u8]) -> Result<RgbaImage, ExportError> {
    let decoder = png::Decoder::new(bytes);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let info = reader.next_frame(&mut buf)?;
    if info.color_type != png::ColorType::Rgba || info.bit_depth != png::BitDepth::Eight {
        return Err(ExportError::Unsupported(format!("{:?} {:?}", info.color_type, info.bit_depth)));
    }
    buf.truncate(info.buffer_size());
    RgbaImage::from_raw(info.width, info.height, buf)
        .ok_or_else(|| ExportError::Unsupported("truncated image data".to_string()))
}
