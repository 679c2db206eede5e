//! Headless software renderer: textures are CPU pixel buffers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{copy_pixel_rows, PixelLayout, RenderError, Renderer, RendererId, Texture};

/// Row alignment for software texture pitches. Mirrors the padding real
/// GPU backends apply, so the upload path always deals with mismatched
/// strides.
const ROW_ALIGN: usize = 64;

static NEXT_RENDERER_ID: AtomicU64 = AtomicU64::new(1);

/// CPU-side texture storage.
pub struct SoftwareTexture {
    pitch: usize,
    pixels: Mutex<Vec<u8>>,
}

impl SoftwareTexture {
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    /// Snapshot of the current pixel contents.
    pub fn pixels(&self) -> Vec<u8> {
        self.pixels.lock().clone()
    }
}

/// Renderer backed by plain memory, for headless playback and tests.
pub struct SoftwareRenderer {
    id: RendererId,
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            id: RendererId(NEXT_RENDERER_ID.fetch_add(1, Ordering::Relaxed)),
        }
    }

    /// Read back a texture's pixels and pitch, if it is software-backed.
    pub fn read_back(texture: &Texture) -> Option<(Vec<u8>, usize)> {
        texture
            .backing()
            .downcast_ref::<SoftwareTexture>()
            .map(|t| (t.pixels(), t.pitch()))
    }
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for SoftwareRenderer {
    fn id(&self) -> RendererId {
        self.id
    }

    fn create_texture(
        &self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Texture, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidDimensions { width, height });
        }
        let row_bytes = width as usize * layout.bytes_per_pixel();
        let pitch = row_bytes.div_ceil(ROW_ALIGN) * ROW_ALIGN;
        let pixels = vec![0u8; pitch * height as usize];
        Ok(Texture::new(
            self.id,
            width,
            height,
            layout,
            Arc::new(SoftwareTexture {
                pitch,
                pixels: Mutex::new(pixels),
            }),
        ))
    }

    fn upload(
        &self,
        texture: &Texture,
        pixels: &[u8],
        src_pitch: usize,
    ) -> Result<(), RenderError> {
        if texture.renderer() != self.id {
            return Err(RenderError::WrongRenderer);
        }
        let backing = texture
            .backing()
            .downcast_ref::<SoftwareTexture>()
            .ok_or_else(|| RenderError::Backend("texture is not software-backed".to_string()))?;
        let row_bytes = texture.width() as usize * texture.layout().bytes_per_pixel();
        let mut dst = backing.pixels.lock();
        // Clear first so pitch padding never ghosts previous contents.
        dst.fill(0);
        copy_pixel_rows(
            &mut dst,
            backing.pitch,
            pixels,
            src_pitch,
            row_bytes,
            texture.height() as usize,
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_honors_pitch_mismatch() {
        let renderer = SoftwareRenderer::new();
        let texture = renderer.create_texture(4, 3, PixelLayout::Rgb24).unwrap();
        let row_bytes = 4 * 3;
        // Source rows padded out to 16 bytes.
        let src_pitch = 16;
        let mut src = vec![0u8; src_pitch * 3];
        for y in 0..3 {
            for x in 0..row_bytes {
                src[y * src_pitch + x] = (y * row_bytes + x) as u8;
            }
        }

        renderer.upload(&texture, &src, src_pitch).unwrap();

        let (pixels, pitch) = SoftwareRenderer::read_back(&texture).unwrap();
        assert!(pitch >= row_bytes);
        for y in 0..3 {
            let row = &pixels[y * pitch..y * pitch + row_bytes];
            let expected: Vec<u8> = (0..row_bytes).map(|x| (y * row_bytes + x) as u8).collect();
            assert_eq!(row, &expected[..], "row {} mismatch", y);
        }
    }

    #[test]
    fn test_upload_rejects_foreign_texture() {
        let a = SoftwareRenderer::new();
        let b = SoftwareRenderer::new();
        let texture = a.create_texture(2, 2, PixelLayout::Rgba8).unwrap();
        let pixels = vec![0u8; 2 * 2 * 4];
        assert!(matches!(
            b.upload(&texture, &pixels, 8),
            Err(RenderError::WrongRenderer)
        ));
    }

    #[test]
    fn test_create_texture_rejects_zero_dimensions() {
        let renderer = SoftwareRenderer::new();
        assert!(renderer.create_texture(0, 4, PixelLayout::Rgb24).is_err());
        assert!(renderer.create_texture(4, 0, PixelLayout::Rgb24).is_err());
    }

    #[test]
    fn test_new_texture_is_black() {
        let renderer = SoftwareRenderer::new();
        let texture = renderer.create_texture(2, 2, PixelLayout::Rgba8).unwrap();
        let (pixels, _) = SoftwareRenderer::read_back(&texture).unwrap();
        assert!(pixels.iter().all(|&b| b == 0));
    }
}
