//! CSS hex colour parsing.

/// 8-bit straight-alpha RGBA.
pub type Rgba = image::Rgba<u8>;

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`. Anything else is black.
pub fn parse_color(color: &str) -> Rgba {
    let color = color.trim();
    if color == "transparent" {
        return image::Rgba([0, 0, 0, 0]);
    }
    if let Some(hex) = color.strip_prefix('#') {
        let channel = |range: std::ops::Range<usize>| hex.get(range).and_then(|h| u8::from_str_radix(h, 16).ok());
        match hex.len() {
            3 => {
                // #rgb -> #rrggbb
                if let (Some(r), Some(g), Some(b)) = (channel(0..1), channel(1..2), channel(2..3)) {
                    return image::Rgba([r * 17, g * 17, b * 17, 255]);
                }
            }
            6 => {
                if let (Some(r), Some(g), Some(b)) = (channel(0..2), channel(2..4), channel(4..6)) {
                    return image::Rgba([r, g, b, 255]);
                }
            }
            8 => {
                if let (Some(r), Some(g), Some(b), Some(a)) =
                    (channel(0..2), channel(2..4), channel(4..6), channel(6..8))
                {
                    return image::Rgba([r, g, b, a]);
                }
            }
            _ => {}
        }
    }
    log::debug!("Unrecognized colour {:?}, using black", color);
    image::Rgba([0, 0, 0, 255])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_forms() {
        assert_eq!(parse_color("#ff8000"), image::Rgba([255, 128, 0, 255]));
        assert_eq!(parse_color("#f80"), image::Rgba([255, 136, 0, 255]));
        assert_eq!(parse_color("#00000080"), image::Rgba([0, 0, 0, 128]));
        assert_eq!(parse_color(" #FFFFFF "), image::Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_invalid_is_black() {
        assert_eq!(parse_color("red"), image::Rgba([0, 0, 0, 255]));
        assert_eq!(parse_color("#zzzzzz"), image::Rgba([0, 0, 0, 255]));
        assert_eq!(parse_color("transparent")[3], 0);
    }
}
