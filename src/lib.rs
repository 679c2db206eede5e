//! Media decode and cache engine for virtual pinball cabinet frontends.
//!
//! A cabinet frontend previews table media (playfield/backglass/DMD/topper
//! video and images) for hundreds of candidate tables while the user flips
//! through a list. This crate is the engine behind that: per-item FFmpeg
//! decode pipelines that hand frames across a thread boundary to a
//! renderer, plus two bounded LRU caches that make rapid re-navigation
//! cheap by reusing warm textures and decoders instead of re-opening
//! codecs on every keystroke.
//!
//! Architecture:
//!
//! ```text
//! Orchestration thread         Decode worker (per player)
//! ┌────────────────┐          ┌───────────────────┐
//! │ cache lookup   │          │ demux → decode    │
//! │ update()       │◄─ frame ─│ clock-paced loop  │
//! │  - poll rx     │  channel │ scale → stage     │
//! │  - upload      │          └───────────────────┘
//! └────────────────┘                  │ PCM samples
//!                                     ▼
//!                              audio FIFO ──► device callback
//! ```
//!
//! The only externally visible failure signal is the boolean returned by
//! [`MediaBackend::setup`]; everything else is handled internally (bounded
//! retries, self-healing seeks, software fallback for hardware decode).

pub mod cache;
pub mod init;
pub mod player;
pub mod render;

pub use cache::{PlayerCache, PlayerKey, ResourceCache, TextureCache};
pub use player::{
    create_player, detect_hw_accel, BackendKind, FfmpegPlayer, MediaBackend, NullPlayer,
    PlayerState,
};
pub use render::{PixelLayout, RenderError, Renderer, RendererId, SoftwareRenderer, Texture};
