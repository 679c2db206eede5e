//! Playback backends.
//!
//! The frontend drives playback exclusively through [`MediaBackend`]; the
//! implementation is chosen once at construction from the closed
//! [`BackendKind`] enum. [`FfmpegPlayer`] is the real decode pipeline,
//! [`NullPlayer`] the placeholder used when playback is disabled or a
//! table has no media.

mod ffmpeg;
mod null;

pub use ffmpeg::hwaccel::detect_hw_accel;
pub use ffmpeg::FfmpegPlayer;
pub use null::NullPlayer;

use std::path::Path;
use std::sync::Arc;

use crate::render::{Renderer, Texture};

/// Playback lifecycle of a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    /// Nothing is open.
    Idle,
    /// Media is open; playback is not running.
    Stopped,
    /// Playback is running (looping until stopped).
    Playing,
}

impl PlayerState {
    /// Short label for display in a UI.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
        }
    }
}

/// Capability implemented by every playback backend.
///
/// `setup` carries the only externally visible failure signal; callers
/// fall back to a placeholder representation when it returns false. All
/// other operations handle their failures internally.
pub trait MediaBackend {
    /// Open `path` and prepare decode state plus the output texture at the
    /// requested size. Succeeds when at least one of the video and audio
    /// paths comes up.
    fn setup(
        &mut self,
        renderer: Arc<dyn Renderer>,
        path: &Path,
        width: u32,
        height: u32,
    ) -> bool;

    /// Start (or restart) playback.
    fn play(&mut self);

    /// Stop playback and rewind to the beginning. This is the cancellation
    /// primitive: it halts further decode attempts.
    fn stop(&mut self);

    /// Per-UI-tick pump: applies any pending texture update. Must be
    /// called from the thread that owns the renderer; never blocks.
    fn update(&mut self);

    /// Current video texture, if the video path is active.
    fn texture(&self) -> Option<Texture>;

    fn is_playing(&self) -> bool;

    /// Linear 0-100 volume, applied as perceptual (log-scaled) gain.
    fn set_volume(&mut self, volume: f32);

    fn set_mute(&mut self, mute: bool);
}

/// Which backend implementation to construct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Ffmpeg,
    /// No playback; every operation is a no-op.
    Null,
}

/// Construct a playback backend. The choice happens once here; no
/// per-call dispatch beyond the returned trait object.
pub fn create_player(kind: BackendKind) -> Box<dyn MediaBackend> {
    match kind {
        BackendKind::Ffmpeg => Box::new(FfmpegPlayer::new()),
        BackendKind::Null => Box::new(NullPlayer::new()),
    }
}
