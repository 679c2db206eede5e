//! No-op playback backend.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::{MediaBackend, PlayerState};
use crate::render::{Renderer, Texture};

/// Backend that plays nothing. Used when playback is disabled in the
/// frontend configuration or as the fallback when a table has no media.
pub struct NullPlayer {
    state: PlayerState,
}

impl NullPlayer {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Idle,
        }
    }
}

impl Default for NullPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for NullPlayer {
    fn setup(
        &mut self,
        _renderer: Arc<dyn Renderer>,
        path: &Path,
        width: u32,
        height: u32,
    ) -> bool {
        if width == 0 || height == 0 {
            return false;
        }
        debug!("Null playback for {}", path.display());
        self.state = PlayerState::Stopped;
        true
    }

    fn play(&mut self) {
        if self.state != PlayerState::Idle {
            self.state = PlayerState::Playing;
        }
    }

    fn stop(&mut self) {
        if self.state == PlayerState::Playing {
            self.state = PlayerState::Stopped;
        }
    }

    fn update(&mut self) {}

    fn texture(&self) -> Option<Texture> {
        None
    }

    fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    fn set_volume(&mut self, _volume: f32) {}

    fn set_mute(&mut self, _mute: bool) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SoftwareRenderer;

    #[test]
    fn test_null_player_lifecycle() {
        let renderer: Arc<dyn Renderer> = Arc::new(SoftwareRenderer::new());
        let mut player = NullPlayer::new();
        assert!(!player.is_playing());
        assert!(player.setup(renderer, Path::new("/t/a.mp4"), 320, 240));
        player.play();
        assert!(player.is_playing());
        assert!(player.texture().is_none());
        player.stop();
        assert!(!player.is_playing());
    }

    #[test]
    fn test_null_player_rejects_zero_dimensions() {
        let renderer: Arc<dyn Renderer> = Arc::new(SoftwareRenderer::new());
        let mut player = NullPlayer::new();
        assert!(!player.setup(renderer, Path::new("/t/a.mp4"), 0, 240));
    }
}
