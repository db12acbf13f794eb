// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Software AAC-LC encoder
//
// Turns interleaved little-endian PCM into raw AAC access units. Input is
// mixed to the output channel layout, resampled with rubato when the rates
// differ, then handed to fdk-aac. The encoder and the resampler both delay
// the signal; the sum is reported as the priming length so the container can
// skip it with an edit list.

use bytes::Bytes;
use fdk_aac::enc::{AudioObjectType, BitRate, ChannelMode, Encoder, EncoderParams, Transport};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::core::format::{aac_freq_index, AudioCodecType, AudioFormatDescription};
use crate::core::{CaptureError, Result};

/// Samples per channel in one AAC-LC access unit.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

/// Input frames per resampler chunk.
const RESAMPLE_CHUNK_FRAMES: usize = 1024;

/// Bits per second and channel when the settings leave the bitrate open.
const DEFAULT_BITRATE_PER_CHANNEL: u32 = 64_000;

/// PCM to AAC-LC encoder producing raw (non-ADTS) access units.
pub struct AacEncoder {
    encoder: Encoder,
    resampler: Option<PcmResampler>,
    input: AudioFormatDescription,
    output: AudioFormatDescription,
    frame_length: u32,
    priming: u32,
    input_frames: u64,
    units: u64,
    scratch: Vec<u8>,
}

impl AacEncoder {
    /// Encoder for `input` PCM producing AAC at `sample_rate` with up to two
    /// channels. A `bitrate` of zero picks 64 kbps per channel.
    pub fn new(
        input: &AudioFormatDescription,
        bitrate: u32,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self> {
        if input.codec != AudioCodecType::LinearPcm {
            return Err(CaptureError::Format("AAC encoder input must be linear PCM".into()));
        }
        if !matches!(input.bits_per_channel, 16 | 24 | 32) {
            return Err(CaptureError::NotSupported(format!(
                "{}-bit PCM input",
                input.bits_per_channel
            )));
        }
        if input.channels == 0 || input.sample_rate == 0 {
            return Err(CaptureError::Format(format!(
                "PCM input {} Hz x{} is empty",
                input.sample_rate, input.channels
            )));
        }
        if aac_freq_index(sample_rate).is_none() {
            return Err(CaptureError::Configuration(format!(
                "unsupported AAC sample rate {}",
                sample_rate
            )));
        }

        let channels = channels.clamp(1, 2);
        let bitrate = if bitrate == 0 {
            DEFAULT_BITRATE_PER_CHANNEL * channels as u32
        } else {
            bitrate
        };
        let encoder = Encoder::new(EncoderParams {
            bit_rate: BitRate::Cbr(bitrate),
            sample_rate,
            transport: Transport::Raw,
            channels: if channels == 1 {
                ChannelMode::Mono
            } else {
                ChannelMode::Stereo
            },
            audio_object_type: AudioObjectType::Mpeg4LowComplexity,
        })
        .map_err(|e| {
            CaptureError::Encoder(format!(
                "AAC encoder rejected {} Hz x{} @ {} bps: {}",
                sample_rate, channels, bitrate, e
            ))
        })?;
        let info = encoder
            .info()
            .map_err(|e| CaptureError::Encoder(format!("AAC encoder info unavailable: {}", e)))?;

        let config_len = (info.confSize as usize).min(info.confBuf.len());
        let config = Bytes::copy_from_slice(&info.confBuf[..config_len]);

        let resampler = if input.sample_rate != sample_rate {
            Some(PcmResampler::new(
                input.sample_rate,
                sample_rate,
                channels as usize,
            )?)
        } else {
            None
        };
        let resampler_delay = resampler.as_ref().map_or(0, |r| r.delay_frames());

        let output = AudioFormatDescription {
            codec: AudioCodecType::Aac,
            sample_rate,
            channels,
            bits_per_channel: 0,
            magic_cookie: Some(config),
        };

        tracing::debug!(
            input_rate = input.sample_rate,
            input_channels = input.channels,
            sample_rate,
            channels,
            bitrate,
            encoder_delay = info.nDelay,
            resampler_delay,
            "AAC encoder created"
        );

        Ok(Self {
            encoder,
            resampler,
            input: input.clone(),
            output,
            frame_length: info.frameLength.max(1),
            priming: info.nDelay + resampler_delay as u32,
            input_frames: 0,
            units: 0,
            scratch: vec![0; (info.maxOutBufBytes as usize).max(768 * channels as usize)],
        })
    }

    /// Description of the produced stream, AudioSpecificConfig as cookie.
    pub fn format(&self) -> &AudioFormatDescription {
        &self.output
    }

    /// Samples per channel covered by each access unit.
    pub fn frame_length(&self) -> u32 {
        self.frame_length
    }

    /// Leading output samples that precede the first input sample.
    pub fn priming_frames(&self) -> u32 {
        self.priming
    }

    /// Output samples that correspond to real input.
    pub fn valid_frames(&self) -> u64 {
        (self.input_frames as u128 * self.output.sample_rate as u128
            / self.input.sample_rate as u128) as u64
    }

    /// Access units emitted so far.
    pub fn units_emitted(&self) -> u64 {
        self.units
    }

    /// Encode one interleaved PCM buffer.
    pub fn encode(&mut self, pcm: &[u8]) -> Result<Vec<Bytes>> {
        let bytes_per_frame = self.input.bytes_per_frame();
        if pcm.len() % bytes_per_frame != 0 {
            return Err(CaptureError::Format(format!(
                "PCM buffer of {} bytes is not a whole number of {}-byte frames",
                pcm.len(),
                bytes_per_frame
            )));
        }
        self.input_frames += (pcm.len() / bytes_per_frame) as u64;

        let planar = self.mix_to_output(pcm);
        let planar = match self.resampler.as_mut() {
            Some(resampler) => resampler.push(&planar)?,
            None => planar,
        };
        self.encode_planar(&planar)
    }

    /// Drain the resampler and the encoder. Pads with silence until every
    /// valid input sample is covered by an emitted access unit.
    pub fn finish(&mut self) -> Result<Vec<Bytes>> {
        let tail = match self.resampler.as_mut() {
            Some(resampler) => resampler.flush()?,
            None => Vec::new(),
        };
        let mut units = if tail.is_empty() {
            Vec::new()
        } else {
            self.encode_planar(&tail)?
        };

        let needed = self.priming as u64 + self.valid_frames();
        let channels = self.output.channels as usize;
        let silence = vec![vec![0.0f32; self.frame_length as usize]; channels];
        let mut budget = needed / self.frame_length as u64 + 8;
        while self.units * (self.frame_length as u64) < needed && budget > 0 {
            units.extend(self.encode_planar(&silence)?);
            budget -= 1;
        }
        if self.units * (self.frame_length as u64) < needed {
            tracing::warn!(
                units = self.units,
                needed,
                "AAC encoder did not drain; trailing audio is cut short"
            );
        }
        Ok(units)
    }

    // Channel layout conversion happens before resampling so the resampler
    // only ever runs at the output channel count.
    fn mix_to_output(&self, pcm: &[u8]) -> Vec<Vec<f32>> {
        let input_channels = self.input.channels as usize;
        let output_channels = self.output.channels as usize;
        let bytes_per_sample = (self.input.bits_per_channel as usize).div_ceil(8);
        let frames = pcm.len() / (input_channels * bytes_per_sample);

        let mut planar = vec![Vec::with_capacity(frames); output_channels];
        let mut frame = vec![0.0f32; input_channels];
        for chunk in pcm.chunks_exact(input_channels * bytes_per_sample) {
            for (slot, sample) in frame.iter_mut().zip(chunk.chunks_exact(bytes_per_sample)) {
                *slot = sample_to_f32(sample);
            }
            match (output_channels, input_channels) {
                (1, _) => planar[0].push(frame.iter().sum::<f32>() / input_channels as f32),
                (_, 1) => {
                    planar[0].push(frame[0]);
                    planar[1].push(frame[0]);
                }
                _ => {
                    planar[0].push(frame[0]);
                    planar[1].push(frame[1]);
                }
            }
        }
        planar
    }

    fn encode_planar(&mut self, planar: &[Vec<f32>]) -> Result<Vec<Bytes>> {
        let frames = planar.first().map_or(0, |channel| channel.len());
        let mut interleaved = Vec::with_capacity(frames * planar.len());
        for index in 0..frames {
            for channel in planar {
                let scaled = (channel[index] * 32768.0).round();
                interleaved.push(scaled.clamp(-32768.0, 32767.0) as i16);
            }
        }

        let mut units = Vec::new();
        let mut offset = 0;
        while offset < interleaved.len() {
            let info = self
                .encoder
                .encode(&interleaved[offset..], &mut self.scratch)
                .map_err(|e| CaptureError::Encoder(format!("AAC encode failed: {}", e)))?;
            offset += info.input_consumed;
            if info.output_size > 0 {
                units.push(Bytes::copy_from_slice(&self.scratch[..info.output_size]));
                self.units += 1;
            }
            if info.input_consumed == 0 && info.output_size == 0 {
                tracing::warn!(
                    remaining = interleaved.len() - offset,
                    "AAC encoder made no progress, dropping input"
                );
                break;
            }
        }
        Ok(units)
    }
}

/// Little-endian signed integer sample of 2, 3 or 4 bytes, scaled to [-1, 1).
fn sample_to_f32(bytes: &[u8]) -> f32 {
    match bytes.len() {
        2 => i16::from_le_bytes([bytes[0], bytes[1]]) as f32 / 32768.0,
        3 => {
            let value = i32::from_le_bytes([0, bytes[0], bytes[1], bytes[2]]) >> 8;
            value as f32 / 8_388_608.0
        }
        4 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32 / 2_147_483_648.0,
        _ => 0.0,
    }
}

// ============================================================================
// RESAMPLING
// ============================================================================

/// Fixed-ratio resampler that accepts arbitrary buffer sizes.
struct PcmResampler {
    inner: SincFixedIn<f32>,
    pending: Vec<Vec<f32>>,
}

impl PcmResampler {
    fn new(from: u32, to: u32, channels: usize) -> Result<Self> {
        let parameters = SincInterpolationParameters {
            sinc_len: 128,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 128,
            window: WindowFunction::BlackmanHarris2,
        };
        let inner = SincFixedIn::<f32>::new(
            to as f64 / from as f64,
            2.0,
            parameters,
            RESAMPLE_CHUNK_FRAMES,
            channels,
        )
        .map_err(|e| {
            CaptureError::Encoder(format!(
                "failed to create {} -> {} Hz resampler: {:?}",
                from, to, e
            ))
        })?;
        Ok(Self {
            inner,
            pending: vec![Vec::new(); channels],
        })
    }

    fn delay_frames(&self) -> usize {
        self.inner.output_delay()
    }

    fn push(&mut self, planar: &[Vec<f32>]) -> Result<Vec<Vec<f32>>> {
        for (pending, channel) in self.pending.iter_mut().zip(planar) {
            pending.extend_from_slice(channel);
        }

        let mut output = vec![Vec::new(); self.pending.len()];
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending[0].len() < needed {
                break;
            }
            let chunk: Vec<Vec<f32>> = self
                .pending
                .iter_mut()
                .map(|pending| pending.drain(..needed).collect())
                .collect();
            let resampled = self
                .inner
                .process(&chunk, None)
                .map_err(|e| CaptureError::Encoder(format!("resampling failed: {:?}", e)))?;
            for (out, channel) in output.iter_mut().zip(resampled) {
                out.extend(channel);
            }
        }
        Ok(output)
    }

    // Completes the partial chunk and pushes one more chunk of silence so the
    // filter delay is flushed out.
    fn flush(&mut self) -> Result<Vec<Vec<f32>>> {
        let needed = self.inner.input_frames_next();
        let padding = needed - self.pending[0].len() % needed + needed;
        let silence = vec![vec![0.0f32; padding]; self.pending.len()];
        self.push(&silence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    fn tone(sample_rate: u32, channels: u16, frames: usize) -> Bytes {
        let mut pcm = BytesMut::with_capacity(frames * channels as usize * 2);
        for index in 0..frames {
            let phase = index as f64 * 2.0 * std::f64::consts::PI * 440.0 / sample_rate as f64;
            let value = (phase.sin() * 0.5 * i16::MAX as f64) as i16;
            for _ in 0..channels {
                pcm.put_i16_le(value);
            }
        }
        pcm.freeze()
    }

    #[test]
    fn mono_pcm_becomes_lc_access_units() {
        let input = AudioFormatDescription::linear_pcm(44_100, 1, 16);
        let mut encoder = AacEncoder::new(&input, 64_000, 44_100, 1).unwrap();
        assert_eq!(encoder.frame_length(), AAC_FRAME_SAMPLES);
        // AOT 2, 44.1 kHz, mono
        assert_eq!(encoder.format().magic_cookie.as_deref(), Some(&[0x12, 0x08][..]));

        let mut units = Vec::new();
        for _ in 0..43 {
            units.extend(encoder.encode(&tone(44_100, 1, 1024)).unwrap());
        }
        units.extend(encoder.finish().unwrap());

        assert_eq!(encoder.valid_frames(), 43 * 1024);
        assert_eq!(units.len() as u64, encoder.units_emitted());
        assert!(
            encoder.units_emitted() * 1024
                >= encoder.priming_frames() as u64 + encoder.valid_frames()
        );
        assert!(units.iter().all(|unit| !unit.is_empty()));
    }

    #[test]
    fn stereo_input_is_downmixed_and_resampled() {
        let input = AudioFormatDescription::linear_pcm(48_000, 2, 16);
        let mut encoder = AacEncoder::new(&input, 0, 44_100, 1).unwrap();
        assert_eq!(encoder.format().sample_rate, 44_100);
        assert_eq!(encoder.format().channels, 1);

        let mut produced = 0;
        for _ in 0..20 {
            produced += encoder.encode(&tone(48_000, 2, 960)).unwrap().len();
        }
        produced += encoder.finish().unwrap().len();

        // 20 * 960 frames at 48 kHz are 17640 frames at 44.1 kHz.
        assert_eq!(encoder.valid_frames(), 17_640);
        assert!(produced as u64 * 1024 >= 17_640 + encoder.priming_frames() as u64);
        assert!(encoder.priming_frames() > 0);
    }

    #[test]
    fn channel_count_is_capped_at_stereo() {
        let input = AudioFormatDescription::linear_pcm(48_000, 6, 16);
        let encoder = AacEncoder::new(&input, 128_000, 48_000, 6).unwrap();
        assert_eq!(encoder.format().channels, 2);
    }

    #[test]
    fn partial_frames_and_odd_depths_are_rejected() {
        let input = AudioFormatDescription::linear_pcm(44_100, 2, 16);
        let mut encoder = AacEncoder::new(&input, 0, 44_100, 2).unwrap();
        assert!(matches!(encoder.encode(&[0u8; 6]), Err(CaptureError::Format(_))));

        let eight_bit = AudioFormatDescription::linear_pcm(44_100, 1, 8);
        assert!(matches!(
            AacEncoder::new(&eight_bit, 0, 44_100, 1),
            Err(CaptureError::NotSupported(_))
        ));
        assert!(matches!(
            AacEncoder::new(&input, 0, 12_345, 1),
            Err(CaptureError::Configuration(_))
        ));
    }

    #[test]
    fn wide_samples_scale_to_unit_range() {
        assert_eq!(sample_to_f32(&i16::MIN.to_le_bytes()), -1.0);
        assert_eq!(sample_to_f32(&[0x00, 0x00, 0x40]), 0.5);
        assert_eq!(sample_to_f32(&(i32::MIN / 2).to_le_bytes()), -0.5);
    }
}
