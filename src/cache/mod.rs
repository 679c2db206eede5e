//! Bounded LRU caches for renderer textures and media players.

mod lru;
mod player;
mod texture;

pub use lru::{Displaced, ResourceCache};
pub use player::{PlayerCache, PlayerKey, DEFAULT_PLAYER_CACHE_SIZE};
pub use texture::{TextureCache, DEFAULT_TEXTURE_CACHE_SIZE};
