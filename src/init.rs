//! Process-wide FFmpeg library state.
//!
//! Codec registration happens once for the whole process; the avformat
//! network layer is reference-counted so it is initialized on first use
//! and torn down when the last player releases it. Both transitions are
//! guarded by one mutex.

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use tracing::debug;

struct LibraryState {
    initialized: bool,
    network_refs: usize,
}

static STATE: Mutex<LibraryState> = Mutex::new(LibraryState {
    initialized: false,
    network_refs: 0,
});

/// Initialize FFmpeg once for the whole process.
pub fn ensure_ffmpeg() -> Result<()> {
    let mut state = STATE.lock();
    if !state.initialized {
        ffmpeg_next::init().map_err(|e| anyhow!("Failed to initialize FFmpeg: {}", e))?;
        state.initialized = true;
        debug!("FFmpeg initialized");
    }
    Ok(())
}

/// Holds the avformat network layer alive. Dropping the last guard
/// deinitializes it.
pub struct NetworkGuard(());

/// Acquire a reference to the avformat network layer, initializing it on
/// the first acquisition.
pub fn acquire_network() -> Result<NetworkGuard> {
    ensure_ffmpeg()?;
    let mut state = STATE.lock();
    if state.network_refs == 0 {
        unsafe {
            ffmpeg_next::ffi::avformat_network_init();
        }
        debug!("avformat network layer initialized");
    }
    state.network_refs += 1;
    Ok(NetworkGuard(()))
}

impl Drop for NetworkGuard {
    fn drop(&mut self) {
        let mut state = STATE.lock();
        state.network_refs = state.network_refs.saturating_sub(1);
        if state.network_refs == 0 {
            unsafe {
                ffmpeg_next::ffi::avformat_network_deinit();
            }
            debug!("avformat network layer released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_refcount_balances() {
        let first = acquire_network().unwrap();
        let second = acquire_network().unwrap();
        drop(first);
        drop(second);
        // A fresh acquisition after full release must still work.
        let third = acquire_network().unwrap();
        drop(third);
    }
}
