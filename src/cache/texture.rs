//! Texture cache: renderer-bound image textures keyed by file path.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use tracing::{debug, warn};

use super::lru::ResourceCache;
use crate::render::{PixelLayout, Renderer, RendererId, Texture};

/// Default number of cached textures.
pub const DEFAULT_TEXTURE_CACHE_SIZE: usize = 100;

struct TextureEntry {
    renderer: RendererId,
    texture: Texture,
}

/// Bounded LRU cache of image textures.
///
/// A hit bound to a different renderer than the one requested is never
/// returned (stale after a display reconfiguration); the entry is dropped
/// and the image reloaded against the current renderer. Eviction destroys
/// the texture immediately by dropping the handle.
pub struct TextureCache {
    entries: ResourceCache<PathBuf, TextureEntry>,
}

impl TextureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: ResourceCache::new(capacity),
        }
    }

    /// Fetch the texture for `path`, loading and caching it on a miss.
    pub fn get(&mut self, renderer: &dyn Renderer, path: &Path) -> Option<Texture> {
        if path.as_os_str().is_empty() {
            warn!("Empty path requested from texture cache");
            return None;
        }

        let key = path.to_path_buf();
        if let Some(entry) = self.entries.get(&key) {
            if entry.renderer == renderer.id() {
                debug!("Reusing cached texture: {}", path.display());
                return Some(entry.texture.clone());
            }
            // Bound to a stale renderer; reload below.
            self.entries.remove(&key);
        }

        let texture = match load_image_texture(renderer, path) {
            Ok(texture) => texture,
            Err(e) => {
                warn!("Failed to load texture {}: {:#}", path.display(), e);
                return None;
            }
        };
        debug!("Loaded new texture and added to cache: {}", path.display());

        let displaced = self.entries.insert(
            key,
            TextureEntry {
                renderer: renderer.id(),
                texture: texture.clone(),
            },
        );
        if let Some((evicted, _)) = displaced.evicted {
            debug!("Evicted oldest cached texture for {}", evicted.display());
        }

        Some(texture)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Drop every cached texture.
    pub fn clear(&mut self) {
        let _ = self.entries.drain().count();
        debug!("Texture cache cleared");
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(DEFAULT_TEXTURE_CACHE_SIZE)
    }
}

fn load_image_texture(renderer: &dyn Renderer, path: &Path) -> Result<Texture> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();
    let texture = renderer.create_texture(width, height, PixelLayout::Rgba8)?;
    renderer.upload(&texture, image.as_raw(), width as usize * 4)?;
    Ok(texture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SoftwareRenderer;

    fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let image = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([x as u8, y as u8, 0x40, 0xFF])
        });
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_miss_loads_and_hit_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), "playfield.png", 8, 4);
        let renderer = SoftwareRenderer::new();
        let mut cache = TextureCache::new(4);

        let first = cache.get(&renderer, &path).unwrap();
        assert_eq!(first.width(), 8);
        assert_eq!(first.height(), 4);
        assert_eq!(cache.len(), 1);

        let second = cache.get(&renderer, &path).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(first.renderer(), second.renderer());

        let (pixels, pitch) = SoftwareRenderer::read_back(&second).unwrap();
        // Pixel (3, 2) encodes its own coordinates.
        let offset = 2 * pitch + 3 * 4;
        assert_eq!(&pixels[offset..offset + 4], &[3, 2, 0x40, 0xFF]);
    }

    #[test]
    fn test_missing_file_is_a_clean_miss() {
        let renderer = SoftwareRenderer::new();
        let mut cache = TextureCache::new(4);
        assert!(cache
            .get(&renderer, Path::new("/nonexistent/backglass.png"))
            .is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_bound_holds() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = SoftwareRenderer::new();
        let mut cache = TextureCache::new(2);
        for i in 0..5 {
            let path = write_test_image(dir.path(), &format!("wheel{}.png", i), 4, 4);
            cache.get(&renderer, &path).unwrap();
            assert!(cache.len() <= 2);
        }
    }

    #[test]
    fn test_stale_renderer_is_never_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), "dmd.png", 4, 4);
        let old_renderer = SoftwareRenderer::new();
        let new_renderer = SoftwareRenderer::new();
        let mut cache = TextureCache::new(4);

        let old = cache.get(&old_renderer, &path).unwrap();
        assert_eq!(old.renderer(), old_renderer.id());

        // Same path, different renderer: reloaded, not handed back stale.
        let fresh = cache.get(&new_renderer, &path).unwrap();
        assert_eq!(fresh.renderer(), new_renderer.id());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear_empties_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test_image(dir.path(), "topper.png", 4, 4);
        let renderer = SoftwareRenderer::new();
        let mut cache = TextureCache::new(4);
        cache.get(&renderer, &path).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
