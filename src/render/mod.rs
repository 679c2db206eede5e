//! Renderer seam.
//!
//! The engine never talks to a GPU API directly: it produces pixel data
//! and uploads it through the [`Renderer`] trait. Frontends supply a
//! GPU-backed implementation; [`SoftwareRenderer`] is the headless one
//! used by the smoke-test binary and the unit tests.
//!
//! Renderer identity matters for caching: after a display reconfiguration
//! the frontend constructs a new renderer with a new [`RendererId`], and
//! cached resources bound to the old id must never be handed back.

mod software;

pub use software::SoftwareRenderer;

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Stable identity of one renderer instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RendererId(pub u64);

/// Pixel layouts the engine produces or uploads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// 3 bytes per pixel, the video decode output format.
    Rgb24,
    /// 4 bytes per pixel, the image loading format.
    Rgba8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb24 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

/// Errors from the renderer seam.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid texture dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
    #[error("texture belongs to a different renderer")]
    WrongRenderer,
    #[error("{0}")]
    Backend(String),
}

/// Reference-counted handle to a renderer-owned texture.
///
/// Dropping the last handle releases the underlying resource, so cache
/// eviction destroys a texture simply by dropping its entry.
#[derive(Clone)]
pub struct Texture {
    renderer: RendererId,
    width: u32,
    height: u32,
    layout: PixelLayout,
    backing: Arc<dyn Any + Send + Sync>,
}

impl Texture {
    pub fn new(
        renderer: RendererId,
        width: u32,
        height: u32,
        layout: PixelLayout,
        backing: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            renderer,
            width,
            height,
            layout,
            backing,
        }
    }

    pub fn renderer(&self) -> RendererId {
        self.renderer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Implementation-specific storage; renderers downcast this.
    pub fn backing(&self) -> &(dyn Any + Send + Sync) {
        self.backing.as_ref()
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("renderer", &self.renderer)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .finish()
    }
}

/// Capability the engine needs from a renderer.
pub trait Renderer {
    /// Identity used to validate cached resources.
    fn id(&self) -> RendererId;

    /// Create a streaming texture, cleared to black.
    fn create_texture(
        &self,
        width: u32,
        height: u32,
        layout: PixelLayout,
    ) -> Result<Texture, RenderError>;

    /// Upload pixel rows into a texture, honoring the source pitch.
    ///
    /// Must be called from the thread that owns the renderer.
    fn upload(&self, texture: &Texture, pixels: &[u8], src_pitch: usize)
        -> Result<(), RenderError>;
}

/// Copy `rows` rows of `row_bytes` bytes from `src` into `dst`, where the
/// two sides may use different strides. Rows that would read or write out
/// of bounds are skipped.
pub fn copy_pixel_rows(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    row_bytes: usize,
    rows: usize,
) {
    for y in 0..rows {
        let s = y * src_pitch;
        let d = y * dst_pitch;
        if s + row_bytes > src.len() || d + row_bytes > dst.len() {
            break;
        }
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_with_matching_pitch() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 12];
        copy_pixel_rows(&mut dst, 4, &src, 4, 4, 3);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_copy_with_padded_source_pitch() {
        // 2 rows of 3 bytes, source padded to a pitch of 5.
        let src = vec![1, 2, 3, 0xAA, 0xAA, 4, 5, 6, 0xAA, 0xAA];
        let mut dst = vec![0u8; 6];
        copy_pixel_rows(&mut dst, 3, &src, 5, 3, 2);
        assert_eq!(dst, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_copy_with_padded_destination_pitch() {
        let src = vec![1, 2, 3, 4, 5, 6];
        let mut dst = vec![0u8; 10];
        copy_pixel_rows(&mut dst, 5, &src, 3, 3, 2);
        assert_eq!(dst, vec![1, 2, 3, 0, 0, 4, 5, 6, 0, 0]);
    }

    #[test]
    fn test_copy_stops_at_short_source() {
        let src = vec![1, 2, 3];
        let mut dst = vec![0u8; 9];
        copy_pixel_rows(&mut dst, 3, &src, 3, 3, 3);
        assert_eq!(dst, vec![1, 2, 3, 0, 0, 0, 0, 0, 0]);
    }
}
