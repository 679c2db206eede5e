//! Video stream decoding.
//!
//! Opens the codec with hardware acceleration when possible, converts
//! decoded frames to RGB24 at the requested output size, and tolerates
//! corrupt input through bounded skip/flush/recover policies.

use anyhow::{anyhow, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context as ScalingContext, Flags as ScalingFlags};
use ffmpeg_next::util::frame::video::Video as VideoFrame;
use tracing::{debug, trace, warn};

use super::hwaccel::{self, HwAccel};

/// Invalid or corrupt frames tolerated while the clock is still near zero.
const MAX_SKIP_FRAMES: u32 = 30;
/// Consecutive packet-send failures before the codec buffers are flushed.
const MAX_BAD_PACKETS: u32 = 5;
/// Clock window treated as playback warm-up.
const WARMUP_SECS: f64 = 1.0;

/// A decoded frame staged for texture upload: owned RGB24 pixels plus the
/// row pitch they were scaled with.
pub(crate) struct PendingFrame {
    pub data: Vec<u8>,
    pub pitch: usize,
    pub width: u32,
    pub height: u32,
}

/// Outcome of one receive attempt against the video codec.
pub(crate) enum DecodeStep {
    /// A renderable frame, with its presentation time in seconds when the
    /// container provided a usable timestamp.
    Frame {
        frame: PendingFrame,
        pts: Option<f64>,
    },
    /// The codec needs more packets.
    NeedsInput,
    EndOfStream,
    /// A bad frame was skipped; try again.
    Skipped,
    /// Too many invalid frames during warm-up; give up on this stream.
    Failed,
    /// Persistent receive errors; the caller should seek forward and flush.
    Recover,
}

pub(crate) struct VideoDecoder {
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    frame_delay: f64,
    out_width: u32,
    out_height: u32,
    scaler: Option<ScalingContext>,
    scaler_input: Option<(Pixel, u32, u32)>,
    hw: Option<HwAccel>,
    invalid_frames: u32,
    bad_packets: u32,
}

impl VideoDecoder {
    /// Open the best video stream of `input`, preferring hardware decode
    /// and falling back to software when the hardware open fails.
    pub fn open(
        input: &ffmpeg::format::context::Input,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("no video stream"))?;
        let stream_index = stream.index();
        let time_base = stream.time_base();
        let rate = stream.avg_frame_rate();
        let frame_delay = if rate.0 > 0 && rate.1 > 0 {
            rate.1 as f64 / rate.0 as f64
        } else {
            1.0 / 30.0
        };
        let parameters = stream.parameters();

        let (decoder, hw) = match hwaccel::open_decoder(parameters.clone()) {
            Ok((decoder, hw)) => {
                debug!("Hardware decode active ({})", hw.kind_name());
                (decoder, Some(hw))
            }
            Err(e) => {
                debug!("Hardware acceleration unavailable ({:#}); using software decode", e);
                let mut context = ffmpeg::codec::context::Context::from_parameters(parameters)?;
                hwaccel::apply_error_concealment(&mut context);
                (context.decoder().video()?, None)
            }
        };

        let mut this = Self {
            decoder,
            stream_index,
            time_base,
            frame_delay,
            out_width: width,
            out_height: height,
            scaler: None,
            scaler_input: None,
            hw,
            invalid_frames: 0,
            bad_packets: 0,
        };

        // Pre-build the scaler for the format frames are expected to carry:
        // the transfer format under hardware decode, the stream's native
        // format otherwise. It is rebuilt if the first real frame differs.
        let expected = match &this.hw {
            Some(hw) => hw.sw_format,
            None => this.decoder.format(),
        };
        let (in_w, in_h) = (this.decoder.width(), this.decoder.height());
        if expected != Pixel::None && in_w > 0 && in_h > 0 {
            if let Err(e) = this.ensure_scaler(expected, in_w, in_h) {
                debug!("Deferring scaler creation: {:#}", e);
            }
        }

        Ok(this)
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Nominal seconds between frames, from the stream's average rate.
    pub fn frame_delay(&self) -> f64 {
        self.frame_delay
    }

    /// Stream timestamp ticks to seconds.
    pub fn pts_to_secs(&self, pts: i64) -> f64 {
        pts as f64 * self.time_base.0 as f64 / self.time_base.1 as f64
    }

    /// Seconds to stream timestamp ticks.
    pub fn secs_to_pts(&self, secs: f64) -> i64 {
        if self.time_base.0 == 0 {
            return 0;
        }
        (secs * self.time_base.1 as f64 / self.time_base.0 as f64) as i64
    }

    /// Feed one packet to the codec. Returns false when the packet was
    /// rejected; rejection is counted and five in a row flush the codec,
    /// which un-wedges decoders stuck on a damaged keyframe.
    pub fn send_packet(&mut self, packet: &ffmpeg::Packet, video_clock: f64) -> bool {
        match self.decoder.send_packet(packet) {
            Ok(()) => {
                self.bad_packets = 0;
                true
            }
            Err(e) => {
                debug!("Error sending video packet: {}", e);
                self.bad_packets += 1;
                if video_clock < WARMUP_SECS {
                    self.invalid_frames += 1;
                }
                if self.bad_packets >= MAX_BAD_PACKETS {
                    debug!("Flushing video codec after {} bad packets", self.bad_packets);
                    self.decoder.flush();
                    self.bad_packets = 0;
                }
                false
            }
        }
    }

    /// Pull one frame out of the codec and convert it for upload.
    pub fn receive_frame(&mut self, video_clock: f64) -> DecodeStep {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return DecodeStep::NeedsInput
            }
            Err(ffmpeg::Error::Eof) => {
                self.reset_error_counters();
                return DecodeStep::EndOfStream;
            }
            Err(e) => {
                debug!("Error receiving video frame: {}", e);
                self.invalid_frames += 1;
                if self.invalid_frames >= MAX_SKIP_FRAMES {
                    self.reset_error_counters();
                    return DecodeStep::Recover;
                }
                return DecodeStep::Skipped;
            }
        }

        // Timestamps live on the decoded frame; capture before any transfer.
        let pts = frame.pts().map(|p| self.pts_to_secs(p));

        // Hardware frames sit in device memory; bring them down first.
        let frame = if hwaccel::is_hw_frame(&frame) {
            match hwaccel::transfer_to_software(&frame) {
                Ok(sw) => sw,
                Err(e) => {
                    debug!("Hardware frame transfer failed: {:#}", e);
                    return DecodeStep::Skipped;
                }
            }
        } else {
            frame
        };

        if frame.planes() == 0
            || frame.width() == 0
            || frame.height() == 0
            || frame.format() == Pixel::None
        {
            self.invalid_frames += 1;
            trace!(
                "Invalid frame ({}x{}, {:?}); skipping",
                frame.width(),
                frame.height(),
                frame.format()
            );
            if video_clock < WARMUP_SECS && self.invalid_frames < MAX_SKIP_FRAMES {
                return DecodeStep::Skipped;
            }
            warn!("Too many invalid frames, giving up on video stream");
            return DecodeStep::Failed;
        }

        match self.convert(&frame) {
            Ok(pending) => {
                self.invalid_frames = 0;
                DecodeStep::Frame {
                    frame: pending,
                    pts,
                }
            }
            Err(e) => {
                debug!("Frame conversion failed: {:#}", e);
                self.invalid_frames += 1;
                if self.invalid_frames >= MAX_SKIP_FRAMES {
                    self.reset_error_counters();
                    DecodeStep::Recover
                } else {
                    DecodeStep::Skipped
                }
            }
        }
    }

    /// Scale and convert a decoded frame into an RGB24 pending frame.
    fn convert(&mut self, frame: &VideoFrame) -> Result<PendingFrame> {
        self.ensure_scaler(frame.format(), frame.width(), frame.height())?;
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow!("scaler not initialized"))?;

        let mut rgb = VideoFrame::empty();
        scaler.run(frame, &mut rgb)?;
        Ok(PendingFrame {
            data: rgb.data(0).to_vec(),
            pitch: rgb.stride(0),
            width: rgb.width(),
            height: rgb.height(),
        })
    }

    /// (Re)build the scaler when the input geometry or format changes.
    fn ensure_scaler(&mut self, format: Pixel, width: u32, height: u32) -> Result<()> {
        if self.scaler_input == Some((format, width, height)) && self.scaler.is_some() {
            return Ok(());
        }
        self.scaler = Some(ScalingContext::get(
            format,
            width,
            height,
            Pixel::RGB24,
            self.out_width,
            self.out_height,
            ScalingFlags::BILINEAR,
        )?);
        self.scaler_input = Some((format, width, height));
        Ok(())
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
    }

    pub fn reset_error_counters(&mut self) {
        self.invalid_frames = 0;
        self.bad_packets = 0;
    }
}
