//! Decode worker.
//!
//! One worker thread per player owns the demuxer and both decoders. It
//! paces video decoding against a wall-clock playback clock, keeps the
//! audio FIFO topped up, loops the stream at end-of-file, and self-heals
//! from persistently corrupt regions with a forward seek.
//!
//! ```text
//! Orchestration thread            decode worker
//! ┌──────────────┐  commands   ┌──────────────────┐
//! │ play/stop    │ ──────────► │ clock-paced loop │
//! │ update()     │ ◄────────── │ demux → route    │
//! └──────────────┘   pending   │ decode → scale   │
//!                    frames    └──────────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender, TryRecvError, TrySendError};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::ffi;
use tracing::{debug, trace, warn};

use super::audio::{AudioDecoder, FIFO_TARGET_SECS, MAX_DECODE_ATTEMPTS};
use super::video::{DecodeStep, PendingFrame, VideoDecoder};
use super::PlayerShared;

/// Commands from the orchestration thread.
pub(crate) enum WorkerCommand {
    /// Begin decoding with a fresh clock.
    Play,
    /// Halt decoding and rewind to the beginning.
    Stop,
    /// Tear the worker down.
    Shutdown,
}

/// Forward distance of the self-healing seek after persistent errors.
const RECOVERY_SEEK_SECS: f64 = 2.0;
/// Packets buffered per stream while the other stream is being serviced.
const MAX_QUEUED_PACKETS: usize = 128;
/// Nap length while stopped or waiting out the frame interval.
const IDLE_WAIT: Duration = Duration::from_millis(10);

/// Single-owner per-file decode state. Lives entirely on the worker
/// thread; the shared flags are the only state visible outside it.
pub(crate) struct MediaHandle {
    input: ffmpeg::format::context::Input,
    video: Option<VideoDecoder>,
    audio: Option<AudioDecoder>,
    shared: Arc<PlayerShared>,
    video_packets: VecDeque<ffmpeg::Packet>,
    audio_packets: VecDeque<ffmpeg::Packet>,
    video_clock: f64,
    playback_start: Instant,
    needs_reset: bool,
    video_failed: bool,
}

pub(crate) fn decode_worker_main(
    mut handle: MediaHandle,
    frame_tx: Sender<PendingFrame>,
    cmd_rx: Receiver<WorkerCommand>,
) {
    debug!("Decode worker started");
    loop {
        match cmd_rx.try_recv() {
            Ok(WorkerCommand::Play) => {
                handle.reset_clock();
                debug!("Decode worker: play");
            }
            Ok(WorkerCommand::Stop) => {
                handle.rewind();
                debug!("Decode worker: stop");
            }
            Ok(WorkerCommand::Shutdown) => {
                debug!("Decode worker: shutdown");
                return;
            }
            Err(TryRecvError::Empty) => {}
            Err(TryRecvError::Disconnected) => {
                debug!("Decode worker: command channel closed, exiting");
                return;
            }
        }

        if !handle.shared.is_playing() {
            thread::sleep(IDLE_WAIT);
            continue;
        }

        if handle.needs_reset {
            // End of stream: exactly one seek back to the start, then
            // playback resumes (looping).
            handle.rewind();
        }

        handle.update_audio();
        if let Some(frame) = handle.update_video() {
            match frame_tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!("Pending frame dropped, renderer is behind");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("Decode worker: frame channel closed, exiting");
                    return;
                }
            }
        }

        handle.wait_for_next_frame();
    }
}

impl MediaHandle {
    pub fn new(
        input: ffmpeg::format::context::Input,
        video: Option<VideoDecoder>,
        audio: Option<AudioDecoder>,
        shared: Arc<PlayerShared>,
    ) -> Self {
        Self {
            input,
            video,
            audio,
            shared,
            video_packets: VecDeque::new(),
            audio_packets: VecDeque::new(),
            video_clock: 0.0,
            playback_start: Instant::now(),
            needs_reset: false,
            video_failed: false,
        }
    }

    fn reset_clock(&mut self) {
        self.video_clock = 0.0;
        self.playback_start = Instant::now();
        self.video_failed = false;
        if let Some(video) = &mut self.video {
            video.reset_error_counters();
        }
    }

    /// Seek every stream back to the beginning and flush codec state.
    fn rewind(&mut self) {
        if let Some(index) = self.video.as_ref().map(|v| v.stream_index()) {
            self.seek_stream(index, 0);
        }
        if let Some(index) = self.audio.as_ref().map(|a| a.stream_index()) {
            self.seek_stream(index, 0);
        }
        if let Some(video) = &mut self.video {
            video.flush();
        }
        if let Some(audio) = &mut self.audio {
            audio.flush();
        }
        self.video_packets.clear();
        self.audio_packets.clear();
        self.needs_reset = false;
        self.reset_clock();
    }

    /// Seek one stream to the keyframe at or before `timestamp` (stream
    /// time base units).
    fn seek_stream(&mut self, stream_index: usize, timestamp: i64) {
        let ret = unsafe {
            ffi::av_seek_frame(
                self.input.as_mut_ptr(),
                stream_index as i32,
                timestamp,
                ffi::AVSEEK_FLAG_BACKWARD,
            )
        };
        if ret < 0 {
            debug!("Seek failed for stream {} ({})", stream_index, ret);
        }
    }

    /// Self-healing forward seek after persistent decode errors, so a
    /// damaged region is skipped instead of replayed forever.
    fn recovery_seek(&mut self) {
        let (index, ts) = match &self.video {
            Some(video) => {
                let target = self.video_clock + RECOVERY_SEEK_SECS;
                (video.stream_index(), video.secs_to_pts(target))
            }
            None => return,
        };
        warn!(
            "Persistent video decode errors, seeking forward {:.1}s",
            RECOVERY_SEEK_SECS
        );
        self.seek_stream(index, ts);
        if let Some(video) = &mut self.video {
            video.flush();
        }
        if let Some(audio) = &mut self.audio {
            audio.flush();
        }
        self.video_packets.clear();
        self.audio_packets.clear();
        self.reset_clock();
    }

    /// Read the next packet from the container, queueing it under the
    /// stream it belongs to. Returns false at end of stream.
    fn read_packet(&mut self) -> bool {
        let next = self
            .input
            .packets()
            .next()
            .map(|(stream, packet)| (stream.index(), packet));
        match next {
            Some((index, packet)) => {
                if self.video.as_ref().map_or(false, |v| v.stream_index() == index) {
                    push_bounded(&mut self.video_packets, packet);
                } else if self
                    .audio
                    .as_ref()
                    .map_or(false, |a| a.stream_index() == index)
                {
                    push_bounded(&mut self.audio_packets, packet);
                }
                true
            }
            None => false,
        }
    }

    fn next_video_packet(&mut self) -> Option<ffmpeg::Packet> {
        loop {
            if let Some(packet) = self.video_packets.pop_front() {
                return Some(packet);
            }
            if !self.read_packet() {
                return None;
            }
        }
    }

    fn next_audio_packet(&mut self) -> Option<ffmpeg::Packet> {
        loop {
            if let Some(packet) = self.audio_packets.pop_front() {
                return Some(packet);
            }
            if !self.read_packet() {
                return None;
            }
        }
    }

    /// Decode and stage at most one video frame once the clock is due.
    fn update_video(&mut self) -> Option<PendingFrame> {
        if self.video.is_none() || self.video_failed {
            return None;
        }
        let elapsed = self.playback_start.elapsed().as_secs_f64();
        if self.video_clock > elapsed {
            return None;
        }

        loop {
            if !self.shared.is_playing() {
                return None;
            }
            let step = match &mut self.video {
                Some(video) => video.receive_frame(self.video_clock),
                None => return None,
            };
            match step {
                DecodeStep::Frame { frame, pts } => {
                    self.advance_clock(pts);
                    return Some(frame);
                }
                DecodeStep::NeedsInput => {
                    let packet = match self.next_video_packet() {
                        Some(packet) => packet,
                        None => {
                            trace!("Video stream reached end, rewinding");
                            self.needs_reset = true;
                            return None;
                        }
                    };
                    if let Some(video) = &mut self.video {
                        // A rejected packet was counted (and possibly
                        // flushed); keep feeding either way.
                        video.send_packet(&packet, self.video_clock);
                    }
                }
                DecodeStep::Skipped => {}
                DecodeStep::EndOfStream => {
                    self.needs_reset = true;
                    return None;
                }
                DecodeStep::Failed => {
                    warn!("Video decoding failed beyond recovery, stopping playback");
                    self.video_failed = true;
                    self.shared.set_playing(false);
                    return None;
                }
                DecodeStep::Recover => {
                    self.recovery_seek();
                    return None;
                }
            }
        }
    }

    /// Advance the clock by the frame's timestamp when it is monotonic
    /// and non-negative, else by the nominal frame interval. Containers
    /// with unreliable timestamps keep advancing instead of stalling.
    fn advance_clock(&mut self, pts: Option<f64>) {
        let frame_delay = self
            .video
            .as_ref()
            .map_or(1.0 / 30.0, |v| v.frame_delay());
        match pts {
            Some(t) if t >= 0.0 && t >= self.video_clock => self.video_clock = t,
            _ => self.video_clock += frame_delay,
        }
    }

    /// Keep the FIFO topped up to about a second of audio.
    fn update_audio(&mut self) {
        if self.audio.is_none() {
            return;
        }
        let mut attempts = 0;
        while attempts < MAX_DECODE_ATTEMPTS {
            let buffered = self
                .audio
                .as_ref()
                .map_or(f64::MAX, |a| a.buffered_secs());
            if buffered >= FIFO_TARGET_SECS || !self.shared.is_playing() {
                break;
            }
            if !self.decode_audio_frame() {
                // Stream end (or decode error): restart both streams from
                // the top, synchronized.
                self.needs_reset = true;
                break;
            }
            attempts += 1;
        }
    }

    /// Decode and buffer one audio frame. False on end of stream or a
    /// decode error.
    fn decode_audio_frame(&mut self) -> bool {
        loop {
            if !self.shared.is_playing() {
                return true;
            }
            match self.audio.as_mut().map(|a| a.receive_frame()) {
                Some(Ok(true)) => return true,
                Some(Ok(false)) => {}
                Some(Err(e)) => {
                    debug!("Audio decode stopped: {:#}", e);
                    return false;
                }
                None => return true,
            }
            let packet = match self.next_audio_packet() {
                Some(packet) => packet,
                None => return false,
            };
            if let Some(audio) = self.audio.as_mut() {
                if let Err(e) = audio.send_packet(&packet) {
                    debug!("Audio packet rejected: {:#}", e);
                    return false;
                }
            }
        }
    }

    /// Sleep until the next frame is due, bounded so commands stay
    /// responsive.
    fn wait_for_next_frame(&self) {
        let wait = match &self.video {
            Some(_) if !self.video_failed => {
                let elapsed = self.playback_start.elapsed().as_secs_f64();
                let due_in = self.video_clock - elapsed;
                if due_in <= 0.0 {
                    return;
                }
                Duration::from_secs_f64(due_in.min(IDLE_WAIT.as_secs_f64()))
            }
            _ => IDLE_WAIT,
        };
        thread::sleep(wait);
    }
}

fn push_bounded(queue: &mut VecDeque<ffmpeg::Packet>, packet: ffmpeg::Packet) {
    if queue.len() >= MAX_QUEUED_PACKETS {
        queue.pop_front();
    }
    queue.push_back(packet);
}
