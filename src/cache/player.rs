//! Player cache: warm decoder/player instances with retirement semantics.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::lru::ResourceCache;
use crate::player::MediaBackend;
use crate::render::RendererId;

/// Default number of cached players.
pub const DEFAULT_PLAYER_CACHE_SIZE: usize = 48;

/// Cache key: path plus the exact output size the player was built for.
/// A player is not reusable at a different size.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PlayerKey {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

struct PlayerEntry {
    renderer: RendererId,
    player: Box<dyn MediaBackend>,
}

/// Bounded LRU cache of constructed players.
///
/// Evicted players are stopped and parked in a bounded retirement queue
/// rather than destroyed on the spot: their decode worker may still be
/// mid-flight, and joining it belongs off the hot path. The queue trims
/// its own oldest entries past twice the cache capacity, so memory stays
/// bounded even under pathological eviction churn.
pub struct PlayerCache {
    entries: ResourceCache<PlayerKey, PlayerEntry>,
    retired: VecDeque<Box<dyn MediaBackend>>,
}

impl PlayerCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: ResourceCache::new(capacity),
            retired: VecDeque::new(),
        }
    }

    /// Take a warm player for `(path, width, height)` bound to `renderer`.
    ///
    /// Ownership transfers to the caller; the entry leaves the cache. A
    /// mismatch on dimensions or renderer identity is a miss, and an entry
    /// bound to a stale renderer is retired rather than handed back.
    pub fn acquire(
        &mut self,
        renderer: RendererId,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Option<Box<dyn MediaBackend>> {
        let key = PlayerKey {
            path: path.to_path_buf(),
            width,
            height,
        };
        let entry = self.entries.remove(&key)?;
        if entry.renderer != renderer {
            self.retire(entry.player);
            return None;
        }
        debug!("Reused cached video player for {}", key.path.display());
        Some(entry.player)
    }

    /// Store a player for later reuse, evicting (and retiring) the least
    /// recently used entry when over capacity.
    pub fn store(
        &mut self,
        renderer: RendererId,
        path: &Path,
        width: u32,
        height: u32,
        player: Box<dyn MediaBackend>,
    ) {
        let key = PlayerKey {
            path: path.to_path_buf(),
            width,
            height,
        };
        debug!("Cached video player for {}", key.path.display());
        let displaced = self.entries.insert(key, PlayerEntry { renderer, player });
        if let Some(previous) = displaced.replaced {
            self.retire(previous.player);
        }
        if let Some((evicted_key, entry)) = displaced.evicted {
            debug!(
                "Evicted oldest cached video player for {}",
                evicted_key.path.display()
            );
            self.retire(entry.player);
        }
    }

    /// Stop a player and park it in the retirement queue, trimming the
    /// queue's own oldest entries to stay within twice the cache capacity.
    fn retire(&mut self, mut player: Box<dyn MediaBackend>) {
        player.stop();
        self.retired.push_back(player);
        while self.retired.len() > self.entries.capacity() * 2 {
            self.retired.pop_front();
            debug!(
                "Trimmed oldest retired player (queue size: {})",
                self.retired.len()
            );
        }
    }

    /// Destroy every retired player. Call from the orchestration thread
    /// when there is idle time.
    pub fn drain_retired(&mut self) -> usize {
        let drained = self.retired.len();
        self.retired.clear();
        drained
    }

    /// Stop and retire every cached player (full teardown path).
    pub fn clear(&mut self) {
        let entries: Vec<_> = self.entries.drain().collect();
        for (_, entry) in entries {
            self.retire(entry.player);
        }
        debug!("Video player cache cleared");
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

    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }
}

impl Default for PlayerCache {
    fn default() -> Self {
        Self::new(DEFAULT_PLAYER_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{Renderer, Texture};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Backend stub that records play/stop calls and destruction.
    struct ProbePlayer {
        played: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    struct ProbeFlags {
        played: Arc<AtomicBool>,
        stopped: Arc<AtomicBool>,
        dropped: Arc<AtomicBool>,
    }

    impl ProbePlayer {
        fn new() -> (Box<dyn MediaBackend>, ProbeFlags) {
            let flags = ProbeFlags {
                played: Arc::new(AtomicBool::new(false)),
                stopped: Arc::new(AtomicBool::new(false)),
                dropped: Arc::new(AtomicBool::new(false)),
            };
            let player = Box::new(ProbePlayer {
                played: Arc::clone(&flags.played),
                stopped: Arc::clone(&flags.stopped),
                dropped: Arc::clone(&flags.dropped),
            });
            (player, flags)
        }
    }

    impl MediaBackend for ProbePlayer {
        fn setup(
            &mut self,
            _renderer: Arc<dyn Renderer>,
            _path: &Path,
            _width: u32,
            _height: u32,
        ) -> bool {
            true
        }
        fn play(&mut self) {
            self.played.store(true, Ordering::SeqCst);
        }
        fn stop(&mut self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
        fn update(&mut self) {}
        fn texture(&self) -> Option<Texture> {
            None
        }
        fn is_playing(&self) -> bool {
            false
        }
        fn set_volume(&mut self, _volume: f32) {}
        fn set_mute(&mut self, _mute: bool) {}
    }

    impl Drop for ProbePlayer {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_store_then_acquire_returns_same_player() {
        let renderer = RendererId(1);
        let mut cache = PlayerCache::new(4);
        let (player, flags) = ProbePlayer::new();
        cache.store(renderer, Path::new("/t/a.mp4"), 320, 240, player);

        let mut reused = cache
            .acquire(renderer, Path::new("/t/a.mp4"), 320, 240)
            .unwrap();
        // Driving the returned handle reaches the stored instance.
        reused.play();
        assert!(flags.played.load(Ordering::SeqCst));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_is_a_miss() {
        let renderer = RendererId(1);
        let mut cache = PlayerCache::new(4);
        let (player, _flags) = ProbePlayer::new();
        cache.store(renderer, Path::new("/t/a.mp4"), 320, 240, player);

        assert!(cache
            .acquire(renderer, Path::new("/t/a.mp4"), 640, 480)
            .is_none());
        assert!(cache
            .acquire(renderer, Path::new("/t/a.mp4"), 320, 200)
            .is_none());
        // The original entry is still there.
        assert!(cache
            .acquire(renderer, Path::new("/t/a.mp4"), 320, 240)
            .is_some());
    }

    #[test]
    fn test_stale_renderer_is_retired_not_returned() {
        let mut cache = PlayerCache::new(4);
        let (player, flags) = ProbePlayer::new();
        cache.store(RendererId(1), Path::new("/t/a.mp4"), 320, 240, player);

        assert!(cache
            .acquire(RendererId(2), Path::new("/t/a.mp4"), 320, 240)
            .is_none());
        assert!(flags.stopped.load(Ordering::SeqCst));
        assert!(!flags.dropped.load(Ordering::SeqCst));
        assert_eq!(cache.retired_len(), 1);
    }

    #[test]
    fn test_eviction_retires_instead_of_destroying() {
        // Two players for the same file at different output sizes,
        // capacity 1: the second store evicts the first into retirement.
        let renderer = RendererId(1);
        let mut cache = PlayerCache::new(1);
        let (small, small_flags) = ProbePlayer::new();
        let (large, _large_flags) = ProbePlayer::new();

        cache.store(renderer, Path::new("/t/a.mp4"), 320, 240, small);
        cache.store(renderer, Path::new("/t/a.mp4"), 640, 480, large);

        assert!(small_flags.stopped.load(Ordering::SeqCst));
        assert!(!small_flags.dropped.load(Ordering::SeqCst));
        assert_eq!(cache.retired_len(), 1);
        // The evicted size is now a miss.
        assert!(cache
            .acquire(renderer, Path::new("/t/a.mp4"), 320, 240)
            .is_none());
        assert!(cache
            .acquire(renderer, Path::new("/t/a.mp4"), 640, 480)
            .is_some());
    }

    #[test]
    fn test_cache_and_retirement_bounds_hold() {
        let renderer = RendererId(1);
        let capacity = 3;
        let mut cache = PlayerCache::new(capacity);
        for i in 0..20 {
            let (player, _flags) = ProbePlayer::new();
            cache.store(
                renderer,
                Path::new(&format!("/t/{}.mp4", i)),
                320,
                240,
                player,
            );
            assert!(cache.len() <= capacity);
            assert!(cache.retired_len() <= capacity * 2);
        }
    }

    #[test]
    fn test_retirement_trims_oldest_entries() {
        let renderer = RendererId(1);
        let mut cache = PlayerCache::new(1);
        let mut drop_flags = Vec::new();
        for i in 0..5 {
            let (player, flags) = ProbePlayer::new();
            drop_flags.push(flags.dropped);
            cache.store(
                renderer,
                Path::new(&format!("/t/{}.mp4", i)),
                320,
                240,
                player,
            );
        }
        // Capacity 1, retirement bound 2: the oldest evictees were trimmed.
        assert_eq!(cache.retired_len(), 2);
        assert!(drop_flags[0].load(Ordering::SeqCst));
        assert!(drop_flags[1].load(Ordering::SeqCst));
        assert!(!drop_flags[3].load(Ordering::SeqCst));
    }

    #[test]
    fn test_clear_stops_and_retires_everything() {
        let renderer = RendererId(1);
        let mut cache = PlayerCache::new(4);
        let mut stop_flags = Vec::new();
        for i in 0..3 {
            let (player, flags) = ProbePlayer::new();
            stop_flags.push(flags.stopped);
            cache.store(
                renderer,
                Path::new(&format!("/t/{}.mp4", i)),
                320,
                240,
                player,
            );
        }
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.retired_len(), 3);
        assert!(stop_flags.iter().all(|f| f.load(Ordering::SeqCst)));

        assert_eq!(cache.drain_retired(), 3);
        assert_eq!(cache.retired_len(), 0);
    }
}
