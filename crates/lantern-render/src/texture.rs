// SPDX-License-Identifier: CEPL-1.0
use crate::AssetError;
use std::path::Path;

/// Decoded RGBA8 pixels, row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureData {
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, AssetError> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected || expected == 0 {
            return Err(AssetError::PixelCount {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Full mip chain length down to 1x1: `floor(log2(max(w, h))) + 1`.
    pub fn mip_levels(&self) -> u32 {
        mip_levels(self.width, self.height)
    }
}

pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

pub fn load_texture(path: &Path) -> Result<TextureData, AssetError> {
    let img = image::open(path)
        .map_err(|source| AssetError::Image {
            path: path.display().to_string(),
            source,
        })?
        .to_rgba8();
    let (width, height) = img.dimensions();
    tracing::info!("texture {}: {}x{}", path.display(), width, height);
    TextureData::from_rgba8(width, height, img.into_raw())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_reaches_one_texel() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(1024, 1024), 11);
        assert_eq!(mip_levels(1024, 768), 11);
        assert_eq!(mip_levels(1023, 5), 10);
        assert_eq!(mip_levels(0, 0), 1);
    }

    #[test]
    fn pixel_buffer_must_match_dimensions() {
        let ok = TextureData::from_rgba8(2, 2, vec![255; 16]).unwrap();
        assert_eq!(ok.pixels.len(), 16);
        assert_eq!(ok.mip_levels(), 2);

        let err = TextureData::from_rgba8(2, 2, vec![255; 12]).unwrap_err();
        assert!(matches!(
            err,
            AssetError::PixelCount {
                expected: 16,
                actual: 12,
                ..
            }
        ));
        assert!(TextureData::from_rgba8(0, 4, Vec::new()).is_err());
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_texture(Path::new("no/such/texture.png")).unwrap_err();
        assert!(err.to_string().contains("no/such/texture.png"));
    }
}
