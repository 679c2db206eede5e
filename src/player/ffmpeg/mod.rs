//! FFmpeg playback backend.
//!
//! `FfmpegPlayer` owns one decode worker thread, the pending-frame
//! channel it fills, the output texture, and the audio output stream.
//! The public verbs run on the orchestration thread and never block on
//! decoding: `update()` only drains the frame channel and uploads the
//! newest frame.

pub(crate) mod audio;
pub(crate) mod hwaccel;
mod video;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context as _, Result};
use crossbeam::channel::{self, Receiver, Sender};
use ffmpeg_next as ffmpeg;
use tracing::{debug, info, warn};

use super::{MediaBackend, PlayerState};
use crate::init;
use crate::render::{PixelLayout, Renderer, Texture};
use audio::{AudioDecoder, AudioOutput};
use video::{PendingFrame, VideoDecoder};
use worker::{MediaHandle, WorkerCommand};

/// Pending-frame channel depth: double buffering between the worker and
/// the renderer-owning thread.
const PENDING_FRAME_DEPTH: usize = 2;

/// Flags shared between the orchestration thread, the decode worker, and
/// the audio callback. This is the only cross-thread state besides the
/// frame channel and the audio FIFO.
pub(crate) struct PlayerShared {
    playing: AtomicBool,
    muted: AtomicBool,
    /// Perceptual gain in [0, 1], stored as f32 bits.
    gain: AtomicU32,
}

impl PlayerShared {
    pub(crate) fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            gain: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    pub(crate) fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub(crate) fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub(crate) fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub(crate) fn set_gain(&self, gain: f32) {
        self.gain.store(gain.to_bits(), Ordering::Relaxed);
    }
}

/// FFmpeg-based implementation of [`MediaBackend`].
pub struct FfmpegPlayer {
    state: PlayerState,
    path: PathBuf,
    renderer: Option<Arc<dyn Renderer>>,
    texture: Option<Texture>,
    shared: Arc<PlayerShared>,
    frame_rx: Option<Receiver<PendingFrame>>,
    cmd_tx: Option<Sender<WorkerCommand>>,
    worker: Option<thread::JoinHandle<()>>,
    audio_output: Option<AudioOutput>,
    _network: Option<init::NetworkGuard>,
}

impl FfmpegPlayer {
    pub fn new() -> Self {
        Self {
            state: PlayerState::Idle,
            path: PathBuf::new(),
            renderer: None,
            texture: None,
            shared: Arc::new(PlayerShared::new()),
            frame_rx: None,
            cmd_tx: None,
            worker: None,
            audio_output: None,
            _network: None,
        }
    }

    fn open_pipeline(
        &mut self,
        renderer: Arc<dyn Renderer>,
        path: &Path,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let network = init::acquire_network()?;
        let input = ffmpeg::format::input(&path.to_path_buf())
            .map_err(|e| anyhow!("failed to open {}: {}", path.display(), e))?;

        let video = match VideoDecoder::open(&input, width, height) {
            Ok(video) => Some(video),
            Err(e) => {
                debug!("No video path for {}: {:#}", path.display(), e);
                None
            }
        };

        // The audio path needs both a stream in the file and an output
        // device; losing either downgrades to silent playback.
        let mut audio_output = None;
        let audio = if input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .is_some()
        {
            match AudioOutput::open(Arc::clone(&self.shared)) {
                Ok((output, producer)) => {
                    match AudioDecoder::open(&input, output.params(), producer) {
                        Ok(decoder) => {
                            audio_output = Some(output);
                            Some(decoder)
                        }
                        Err(e) => {
                            debug!("No audio path for {}: {:#}", path.display(), e);
                            None
                        }
                    }
                }
                Err(e) => {
                    warn!("Audio device unavailable: {:#}", e);
                    None
                }
            }
        } else {
            debug!("No audio stream in {}, playing silently", path.display());
            None
        };

        if video.is_none() && audio.is_none() {
            return Err(anyhow!(
                "no playable video or audio stream in {}",
                path.display()
            ));
        }

        let texture = if video.is_some() {
            Some(
                renderer
                    .create_texture(width, height, PixelLayout::Rgb24)
                    .map_err(|e| anyhow!("failed to create video texture: {}", e))?,
            )
        } else {
            None
        };

        let (frame_tx, frame_rx) = channel::bounded(PENDING_FRAME_DEPTH);
        let (cmd_tx, cmd_rx) = channel::unbounded();
        let handle = MediaHandle::new(input, video, audio, Arc::clone(&self.shared));
        let worker = thread::Builder::new()
            .name("media-decode".to_string())
            .spawn(move || worker::decode_worker_main(handle, frame_tx, cmd_rx))
            .context("failed to spawn decode worker")?;

        self.path = path.to_path_buf();
        self.renderer = Some(renderer);
        self.texture = texture;
        self.frame_rx = Some(frame_rx);
        self.cmd_tx = Some(cmd_tx);
        self.worker = Some(worker);
        self.audio_output = audio_output;
        self._network = Some(network);
        Ok(())
    }

    /// Shut the pipeline down: stop the worker, join it, release the
    /// audio stream and texture.
    fn teardown(&mut self) {
        self.shared.set_playing(false);
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        self.frame_rx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.audio_output = None;
        self.texture = None;
        self.renderer = None;
        self._network = None;
        self.state = PlayerState::Idle;
    }
}

impl Default for FfmpegPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaBackend for FfmpegPlayer {
    fn setup(
        &mut self,
        renderer: Arc<dyn Renderer>,
        path: &Path,
        width: u32,
        height: u32,
    ) -> bool {
        self.teardown();

        if path.as_os_str().is_empty() || width == 0 || height == 0 {
            warn!(
                "Invalid setup parameters: path={}, {}x{}",
                path.display(),
                width,
                height
            );
            return false;
        }
        if let Err(e) = init::ensure_ffmpeg() {
            warn!("{:#}", e);
            return false;
        }

        match self.open_pipeline(renderer, path, width, height) {
            Ok(()) => {
                info!("Opened media {} ({}x{})", path.display(), width, height);
                self.state = PlayerState::Stopped;
                true
            }
            Err(e) => {
                warn!("Setup failed for {}: {:#}", path.display(), e);
                self.teardown();
                false
            }
        }
    }

    fn play(&mut self) {
        if self.state != PlayerState::Stopped {
            return;
        }
        self.shared.set_playing(true);
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(WorkerCommand::Play);
        }
        if let Some(audio) = &self.audio_output {
            audio.resume();
        }
        self.state = PlayerState::Playing;
        debug!("Playing {}", self.path.display());
    }

    fn stop(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        self.shared.set_playing(false);
        if let Some(tx) = &self.cmd_tx {
            let _ = tx.send(WorkerCommand::Stop);
        }
        if let Some(audio) = &self.audio_output {
            audio.pause();
        }
        self.state = PlayerState::Stopped;
        debug!("Stopped {}", self.path.display());
    }

    fn update(&mut self) {
        // Apply the newest pending frame; older staged frames are stale
        // the moment a newer one exists.
        if let Some(rx) = &self.frame_rx {
            let mut newest: Option<PendingFrame> = None;
            while let Ok(frame) = rx.try_recv() {
                newest = Some(frame);
            }
            if let (Some(frame), Some(texture), Some(renderer)) =
                (newest, self.texture.as_ref(), self.renderer.as_ref())
            {
                if frame.width != texture.width() || frame.height != texture.height() {
                    warn!(
                        "Staged frame is {}x{} but texture is {}x{}, dropping",
                        frame.width,
                        frame.height,
                        texture.width(),
                        texture.height()
                    );
                } else if let Err(e) = renderer.upload(texture, &frame.data, frame.pitch) {
                    warn!("Texture update failed: {}", e);
                }
            }
        }

        // The worker clears the playing flag when it gives up on an
        // unrecoverable stream; the last good frame stays on screen.
        if self.state == PlayerState::Playing && !self.shared.is_playing() {
            if let Some(audio) = &self.audio_output {
                audio.pause();
            }
            self.state = PlayerState::Stopped;
        }
    }

    fn texture(&self) -> Option<Texture> {
        self.texture.clone()
    }

    fn is_playing(&self) -> bool {
        self.state == PlayerState::Playing
    }

    fn set_volume(&mut self, volume: f32) {
        let gain = audio::volume_to_gain(volume);
        self.shared.set_gain(gain);
        debug!("Volume {} -> gain {:.3}", volume, gain);
    }

    fn set_mute(&mut self, mute: bool) {
        self.shared.set_muted(mute);
    }
}

impl Drop for FfmpegPlayer {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::SoftwareRenderer;

    #[test]
    fn test_setup_fails_cleanly_for_missing_file() {
        let renderer: Arc<dyn Renderer> = Arc::new(SoftwareRenderer::new());
        let mut player = FfmpegPlayer::new();
        assert!(!player.setup(
            renderer,
            Path::new("/nonexistent/table.mp4"),
            320,
            240
        ));
        assert!(!player.is_playing());
        assert!(player.texture().is_none());
    }

    #[test]
    fn test_setup_rejects_invalid_dimensions() {
        let renderer: Arc<dyn Renderer> = Arc::new(SoftwareRenderer::new());
        let mut player = FfmpegPlayer::new();
        assert!(!player.setup(Arc::clone(&renderer), Path::new("/t/a.mp4"), 0, 240));
        assert!(!player.setup(renderer, Path::new(""), 320, 240));
    }

    #[test]
    fn test_verbs_are_safe_before_setup() {
        let mut player = FfmpegPlayer::new();
        player.play();
        player.update();
        player.set_volume(50.0);
        player.set_mute(true);
        player.stop();
        assert!(!player.is_playing());
    }
}
