//! Audio stream decoding and output.
//!
//! The decode worker resamples audio to the output device's interleaved
//! f32 format and pushes it into a lock-free ring buffer; the device
//! callback drains the ring, applies gain, and never blocks — underruns
//! come out as silence, not stalls.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::frame::audio::Audio as AudioFrame;
use ffmpeg_next::ChannelLayout;
use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use tracing::{debug, trace, warn};

use super::PlayerShared;

/// Seconds of decoded audio the ring buffer can hold.
const FIFO_CAPACITY_SECS: usize = 2;
/// FIFO occupancy (seconds) the decode loop tops up to.
pub(crate) const FIFO_TARGET_SECS: f64 = 1.0;
/// Decode attempts per top-up pass.
pub(crate) const MAX_DECODE_ATTEMPTS: u32 = 5;

/// Sample layout negotiated with the output device.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AudioParams {
    pub rate: u32,
    pub channels: u16,
}

/// Convert a linear 0-100 volume into a perceptual gain in [0, 1].
///
/// `log10(9x + 1)` maps 0..=1 onto 0..=1 with most of the usable range
/// near the top, matching perceived loudness.
pub(crate) fn volume_to_gain(volume: f32) -> f32 {
    let normalized = (volume / 100.0).clamp(0.0, 1.0);
    if normalized <= 0.0 {
        return 0.0;
    }
    (normalized * 9.0 + 1.0).log10().clamp(0.0, 1.0)
}

/// Consumer half of the FIFO plus the shared playback flags; lives inside
/// the device callback.
pub(crate) struct AudioSink {
    consumer: HeapConsumer<f32>,
    shared: Arc<PlayerShared>,
}

impl AudioSink {
    /// Fill `out` exactly. Silence when stopped or muted, partial silence
    /// on underrun, gain applied per sample. Never blocks.
    pub fn fill(&mut self, out: &mut [f32]) {
        if !self.shared.is_playing() {
            // Discard whatever was decoded before the stop so the next
            // play does not burst stale audio.
            let pending = self.consumer.len();
            if pending > 0 {
                self.consumer.skip(pending);
            }
            out.fill(0.0);
            return;
        }
        if self.shared.is_muted() {
            out.fill(0.0);
            return;
        }

        let read = self.consumer.pop_slice(out);
        out[read..].fill(0.0);

        let gain = self.shared.gain();
        if gain <= 0.001 {
            out[..read].fill(0.0);
        } else if gain < 1.0 {
            for sample in &mut out[..read] {
                *sample *= gain;
            }
        }
    }
}

/// Platform audio output stream for one player.
pub(crate) struct AudioOutput {
    stream: cpal::Stream,
    params: AudioParams,
}

impl AudioOutput {
    /// Open the default output device and its callback stream, paused.
    /// Returns the producer half of the sample FIFO for the decode side.
    pub fn open(shared: Arc<PlayerShared>) -> Result<(Self, HeapProducer<f32>)> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow!("no default audio output device"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| anyhow!("no default output config: {}", e))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(anyhow!(
                "unsupported output sample format {:?}",
                supported.sample_format()
            ));
        }
        let config = cpal::StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };
        let params = AudioParams {
            rate: config.sample_rate.0,
            channels: config.channels,
        };

        let capacity = params.rate as usize * params.channels as usize * FIFO_CAPACITY_SECS;
        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
        let mut sink = AudioSink { consumer, shared };

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| sink.fill(data),
                |err| warn!("Audio stream error: {}", err),
                None,
            )
            .map_err(|e| anyhow!("failed to open audio stream: {}", e))?;
        // Streams start running; hold them until play().
        let _ = stream.pause();

        debug!(
            "Audio output open: {} Hz, {} channels",
            params.rate, params.channels
        );
        Ok((Self { stream, params }, producer))
    }

    pub fn params(&self) -> AudioParams {
        self.params
    }

    pub fn resume(&self) {
        if let Err(e) = self.stream.play() {
            warn!("Failed to resume audio stream: {}", e);
        }
    }

    pub fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            warn!("Failed to pause audio stream: {}", e);
        }
    }
}

/// Decoder and resampler feeding the FIFO; owned by the decode worker.
pub(crate) struct AudioDecoder {
    decoder: ffmpeg::decoder::Audio,
    stream_index: usize,
    resampler: ffmpeg::software::resampling::Context,
    producer: HeapProducer<f32>,
    params: AudioParams,
}

impl AudioDecoder {
    /// Open the best audio stream and a resampler targeting the device
    /// format.
    pub fn open(
        input: &ffmpeg::format::context::Input,
        params: AudioParams,
        producer: HeapProducer<f32>,
    ) -> Result<Self> {
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or_else(|| anyhow!("no audio stream"))?;
        let stream_index = stream.index();
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        let in_layout = if decoder.channel_layout().channels() > 0 {
            decoder.channel_layout()
        } else {
            ChannelLayout::STEREO
        };
        let resampler = ffmpeg::software::resampling::Context::get(
            decoder.format(),
            in_layout,
            decoder.rate(),
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Packed),
            ChannelLayout::default(params.channels as i32),
            params.rate,
        )?;

        Ok(Self {
            decoder,
            stream_index,
            resampler,
            producer,
            params,
        })
    }

    pub fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Seconds of decoded audio currently buffered.
    pub fn buffered_secs(&self) -> f64 {
        self.producer.len() as f64 / (self.params.rate as f64 * self.params.channels as f64)
    }

    pub fn send_packet(&mut self, packet: &ffmpeg::Packet) -> Result<()> {
        self.decoder
            .send_packet(packet)
            .map_err(|e| anyhow!("error sending audio packet: {}", e))
    }

    /// Pull, resample, and buffer one frame. `Ok(true)` means a frame was
    /// buffered; `Ok(false)` means the codec needs more input.
    pub fn receive_frame(&mut self) -> Result<bool> {
        let mut frame = AudioFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => {}
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {
                return Ok(false)
            }
            Err(ffmpeg::Error::Eof) => return Err(anyhow!("audio decoder reached end of stream")),
            Err(e) => return Err(anyhow!("error receiving audio frame: {}", e)),
        }

        let mut resampled = AudioFrame::empty();
        self.resampler
            .run(&frame, &mut resampled)
            .map_err(|e| anyhow!("audio resampling failed: {}", e))?;

        let samples = interleaved_samples(&resampled);
        // Never block the decode loop on a full FIFO; drop the overflow.
        let pushed = self.producer.push_slice(samples);
        if pushed < samples.len() {
            trace!("Audio FIFO full, dropped {} samples", samples.len() - pushed);
        }
        Ok(true)
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
    }
}

/// View a packed (interleaved) f32 frame as one contiguous sample slice.
fn interleaved_samples(frame: &AudioFrame) -> &[f32] {
    let count = frame.samples() * frame.channels() as usize;
    unsafe { std::slice::from_raw_parts((*frame.as_ptr()).data[0] as *const f32, count) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink_with_samples(samples: &[f32]) -> (AudioSink, Arc<PlayerShared>) {
        let shared = Arc::new(PlayerShared::new());
        let (mut producer, consumer) = HeapRb::<f32>::new(4096).split();
        producer.push_slice(samples);
        (
            AudioSink {
                consumer,
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    #[test]
    fn test_volume_to_gain_endpoints() {
        assert_eq!(volume_to_gain(0.0), 0.0);
        assert!((volume_to_gain(100.0) - 1.0).abs() < 1e-6);
        // Out-of-range input is clamped.
        assert_eq!(volume_to_gain(-5.0), 0.0);
        assert!((volume_to_gain(250.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_volume_to_gain_is_monotonic_and_log_shaped() {
        let mut last = 0.0;
        for v in 1..=100 {
            let gain = volume_to_gain(v as f32);
            assert!(gain > last, "gain not monotonic at {}", v);
            last = gain;
        }
        // Perceptual curve: the halfway point sits well above linear.
        assert!(volume_to_gain(50.0) > 0.7);
    }

    #[test]
    fn test_fill_is_silent_when_muted_and_keeps_fifo() {
        let (mut sink, shared) = sink_with_samples(&[0.5; 64]);
        shared.set_playing(true);
        shared.set_muted(true);

        let mut out = [1.0f32; 32];
        sink.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        // Muted playback does not consume the FIFO.
        assert_eq!(sink.consumer.len(), 64);
    }

    #[test]
    fn test_fill_pads_underrun_with_silence() {
        let (mut sink, shared) = sink_with_samples(&[0.25; 10]);
        shared.set_playing(true);
        shared.set_gain(1.0);

        let mut out = [1.0f32; 20];
        sink.fill(&mut out);
        assert!(out[..10].iter().all(|&s| (s - 0.25).abs() < 1e-6));
        assert!(out[10..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fill_applies_gain() {
        let (mut sink, shared) = sink_with_samples(&[0.8; 16]);
        shared.set_playing(true);
        shared.set_gain(0.5);

        let mut out = [0.0f32; 16];
        sink.fill(&mut out);
        assert!(out.iter().all(|&s| (s - 0.4).abs() < 1e-6));
    }

    #[test]
    fn test_fill_drains_fifo_when_stopped() {
        let (mut sink, shared) = sink_with_samples(&[0.5; 48]);
        shared.set_playing(false);

        let mut out = [1.0f32; 8];
        sink.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(sink.consumer.len(), 0);
    }

    #[test]
    fn test_fill_near_zero_gain_is_silent() {
        let (mut sink, shared) = sink_with_samples(&[0.9; 16]);
        shared.set_playing(true);
        shared.set_gain(0.0005);

        let mut out = [1.0f32; 16];
        sink.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
