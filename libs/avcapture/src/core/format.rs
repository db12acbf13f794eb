// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Media format descriptions.
//!
//! A [`FormatDescription`] travels with every [`TimedSample`](super::TimedSample)
//! and tells the sink which track the sample belongs to and how the container
//! must describe it. H.264 descriptions carry their parameter sets and a
//! prebuilt `avcC` extension atom, mirroring what platform encoders attach to
//! their output.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{CaptureError, Result};

/// Extension atom name for the H.264 decoder configuration record.
pub const AVCC_ATOM: &str = "avcC";

// ============================================================================
// MEDIA KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// VIDEO
// ============================================================================

/// Uncompressed pixel layouts produced by capture devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Bi-planar 4:2:0, full luma plane followed by interleaved CbCr.
    #[default]
    Nv12,
    Bgra32,
}

impl PixelFormat {
    /// Byte size of one tightly packed frame.
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Nv12 => pixels + pixels / 2,
            PixelFormat::Bgra32 => pixels * 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodecType {
    H264,
    Raw(PixelFormat),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoFormatDescription {
    pub codec: VideoCodecType,
    pub width: u32,
    pub height: u32,
    /// Parameter set NAL units (SPS/PPS) in the order the encoder reported them.
    pub parameter_sets: Vec<Bytes>,
    /// Length-prefix width of NAL units in sample payloads (0 for raw video).
    pub nal_unit_header_length: u8,
    pub extension_atoms: BTreeMap<String, Bytes>,
}

impl VideoFormatDescription {
    pub fn raw(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            codec: VideoCodecType::Raw(pixel_format),
            width,
            height,
            parameter_sets: Vec::new(),
            nal_unit_header_length: 0,
            extension_atoms: BTreeMap::new(),
        }
    }

    /// Build an H.264 description from raw SPS/PPS NAL units.
    ///
    /// The `avcC` extension atom is derived from the parameter sets.
    pub fn h264(
        width: u32,
        height: u32,
        parameter_sets: Vec<Bytes>,
        nal_unit_header_length: u8,
    ) -> Result<Self> {
        if !(1..=4).contains(&nal_unit_header_length) {
            return Err(CaptureError::Format(format!(
                "NAL unit header length must be 1-4, got {}",
                nal_unit_header_length
            )));
        }

        let mut extension_atoms = BTreeMap::new();
        let (sps, pps): (Vec<Bytes>, Vec<Bytes>) = parameter_sets
            .iter()
            .filter(|ps| !ps.is_empty())
            .cloned()
            .partition(|ps| ps[0] & 0x1F == 7);
        if let Ok(record) =
            AvcDecoderConfigurationRecord::from_parameter_sets(&sps, &pps, nal_unit_header_length)
        {
            extension_atoms.insert(AVCC_ATOM.to_string(), record.to_bytes());
        }

        Ok(Self {
            codec: VideoCodecType::H264,
            width,
            height,
            parameter_sets,
            nal_unit_header_length,
            extension_atoms,
        })
    }

    /// Build an H.264 description from an `avcC` record.
    pub fn h264_from_avcc(width: u32, height: u32, avcc: Bytes) -> Result<Self> {
        let record = AvcDecoderConfigurationRecord::parse(&avcc)?;
        let mut parameter_sets = record.sps.clone();
        parameter_sets.extend(record.pps.iter().cloned());

        let mut extension_atoms = BTreeMap::new();
        extension_atoms.insert(AVCC_ATOM.to_string(), avcc);

        Ok(Self {
            codec: VideoCodecType::H264,
            width,
            height,
            parameter_sets,
            nal_unit_header_length: record.nal_unit_length(),
            extension_atoms,
        })
    }

    pub fn is_h264(&self) -> bool {
        self.codec == VideoCodecType::H264
    }
}

/// Query interface over anything that can report H.264 parameter sets.
///
/// Index-addressed to match how platform format descriptions expose them.
pub trait H264ParameterSetSource {
    /// Returns `(parameter_set_count, nal_unit_header_length)`.
    fn h264_parameter_set_info(&self) -> Result<(usize, u8)>;

    fn h264_parameter_set_at(&self, index: usize) -> Result<&[u8]>;

    /// Precomputed container-specific configuration blob, if attached.
    fn extension_atom(&self, name: &str) -> Option<Bytes>;
}

impl H264ParameterSetSource for VideoFormatDescription {
    fn h264_parameter_set_info(&self) -> Result<(usize, u8)> {
        if !self.is_h264() {
            return Err(CaptureError::Format(
                "format description is not H.264".into(),
            ));
        }
        Ok((self.parameter_sets.len(), self.nal_unit_header_length))
    }

    fn h264_parameter_set_at(&self, index: usize) -> Result<&[u8]> {
        self.parameter_sets
            .get(index)
            .map(|ps| ps.as_ref())
            .ok_or_else(|| {
                CaptureError::Format(format!(
                    "parameter set index {} out of range ({} available)",
                    index,
                    self.parameter_sets.len()
                ))
            })
    }

    fn extension_atom(&self, name: &str) -> Option<Bytes> {
        self.extension_atoms.get(name).cloned()
    }
}

// ============================================================================
// AUDIO
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodecType {
    /// MPEG-4 AAC; the magic cookie holds the AudioSpecificConfig.
    Aac,
    /// Interleaved signed little-endian PCM.
    LinearPcm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioFormatDescription {
    pub codec: AudioCodecType,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_channel: u16,
    pub magic_cookie: Option<Bytes>,
}

impl AudioFormatDescription {
    pub fn linear_pcm(sample_rate: u32, channels: u16, bits_per_channel: u16) -> Self {
        Self {
            codec: AudioCodecType::LinearPcm,
            sample_rate,
            channels,
            bits_per_channel,
            magic_cookie: None,
        }
    }

    /// AAC-LC description with a generated AudioSpecificConfig cookie.
    pub fn aac(sample_rate: u32, channels: u16) -> Self {
        let cookie = aac_freq_index(sample_rate).map(|freq_index| {
            // audioObjectType(5) | samplingFrequencyIndex(4) | channelConfiguration(4) | 000
            let config: u16 = (2 << 11) | ((freq_index as u16) << 7) | ((channels & 0x0F) << 3);
            Bytes::copy_from_slice(&config.to_be_bytes())
        });
        Self {
            codec: AudioCodecType::Aac,
            sample_rate,
            channels,
            bits_per_channel: 0,
            magic_cookie: cookie,
        }
    }

    /// Bytes per interleaved PCM frame (0 for compressed formats).
    pub fn bytes_per_frame(&self) -> usize {
        match self.codec {
            AudioCodecType::LinearPcm => {
                self.channels as usize * (self.bits_per_channel as usize).div_ceil(8)
            }
            AudioCodecType::Aac => 0,
        }
    }
}

/// MPEG-4 sampling frequency index for `sample_rate`.
pub fn aac_freq_index(sample_rate: u32) -> Option<u8> {
    const RATES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];
    RATES
        .iter()
        .position(|&rate| rate == sample_rate)
        .map(|index| index as u8)
}

// ============================================================================
// FORMAT DESCRIPTION
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FormatDescription {
    Video(VideoFormatDescription),
    Audio(AudioFormatDescription),
}

impl FormatDescription {
    pub fn media_kind(&self) -> MediaKind {
        match self {
            FormatDescription::Video(_) => MediaKind::Video,
            FormatDescription::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn as_video(&self) -> Option<&VideoFormatDescription> {
        match self {
            FormatDescription::Video(video) => Some(video),
            FormatDescription::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&AudioFormatDescription> {
        match self {
            FormatDescription::Audio(audio) => Some(audio),
            FormatDescription::Video(_) => None,
        }
    }

    /// True when the description carries compressed media.
    pub fn is_compressed(&self) -> bool {
        match self {
            FormatDescription::Video(video) => video.is_h264(),
            FormatDescription::Audio(audio) => audio.codec == AudioCodecType::Aac,
        }
    }
}

impl From<VideoFormatDescription> for FormatDescription {
    fn from(video: VideoFormatDescription) -> Self {
        FormatDescription::Video(video)
    }
}

impl From<AudioFormatDescription> for FormatDescription {
    fn from(audio: AudioFormatDescription) -> Self {
        FormatDescription::Audio(audio)
    }
}

// ============================================================================
// AVC DECODER CONFIGURATION RECORD
// ============================================================================

/// ISO/IEC 14496-15 `AVCDecoderConfigurationRecord` (the `avcC` box payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcDecoderConfigurationRecord {
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    pub length_size_minus_one: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcDecoderConfigurationRecord {
    /// Profile, compatibility and level are read from the first SPS.
    pub fn from_parameter_sets(
        sps: &[Bytes],
        pps: &[Bytes],
        nal_unit_header_length: u8,
    ) -> Result<Self> {
        let first = sps
            .first()
            .ok_or_else(|| CaptureError::Format("avcC requires at least one SPS".into()))?;
        if first.len() < 4 {
            return Err(CaptureError::Format(format!(
                "SPS too short for avcC ({} bytes)",
                first.len()
            )));
        }
        if !(1..=4).contains(&nal_unit_header_length) {
            return Err(CaptureError::Format(format!(
                "invalid NAL unit header length {}",
                nal_unit_header_length
            )));
        }

        Ok(Self {
            profile_indication: first[1],
            profile_compatibility: first[2],
            level_indication: first[3],
            length_size_minus_one: nal_unit_header_length - 1,
            sps: sps.to_vec(),
            pps: pps.to_vec(),
        })
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let truncated = || CaptureError::Format("truncated avcC record".into());

        if buf.remaining() < 6 {
            return Err(truncated());
        }
        let version = buf.get_u8();
        if version != 1 {
            return Err(CaptureError::Format(format!(
                "unsupported avcC version {}",
                version
            )));
        }
        let profile_indication = buf.get_u8();
        let profile_compatibility = buf.get_u8();
        let level_indication = buf.get_u8();
        let length_size_minus_one = buf.get_u8() & 0x03;

        let sps_count = (buf.get_u8() & 0x1F) as usize;
        let sps = read_parameter_sets(&mut buf, sps_count).ok_or_else(truncated)?;

        if !buf.has_remaining() {
            return Err(truncated());
        }
        let pps_count = buf.get_u8() as usize;
        let pps = read_parameter_sets(&mut buf, pps_count).ok_or_else(truncated)?;

        Ok(Self {
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_minus_one,
            sps,
            pps,
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u8(1);
        out.put_u8(self.profile_indication);
        out.put_u8(self.profile_compatibility);
        out.put_u8(self.level_indication);
        out.put_u8(0xFC | (self.length_size_minus_one & 0x03));
        out.put_u8(0xE0 | (self.sps.len() as u8 & 0x1F));
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        out.freeze()
    }

    pub fn nal_unit_length(&self) -> u8 {
        self.length_size_minus_one + 1
    }
}

fn read_parameter_sets(buf: &mut &[u8], count: usize) -> Option<Vec<Bytes>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if buf.remaining() < 2 {
            return None;
        }
        let len = buf.get_u16() as usize;
        if buf.remaining() < len {
            return None;
        }
        sets.push(Bytes::copy_from_slice(&buf[..len]));
        buf.advance(len);
    }
    Some(sets)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: &[u8] = &[0x67, 0x4D, 0x40, 0x1F, 0xE8, 0x80];
    const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];

    #[test]
    fn avcc_record_survives_parse() {
        let record = AvcDecoderConfigurationRecord::from_parameter_sets(
            &[Bytes::from_static(SPS)],
            &[Bytes::from_static(PPS)],
            4,
        )
        .unwrap();
        assert_eq!(record.profile_indication, 0x4D);
        assert_eq!(record.level_indication, 0x1F);

        let bytes = record.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[4], 0xFF);

        let parsed = AvcDecoderConfigurationRecord::parse(&bytes).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(parsed.nal_unit_length(), 4);
    }

    #[test]
    fn truncated_avcc_is_rejected() {
        let record = AvcDecoderConfigurationRecord::from_parameter_sets(
            &[Bytes::from_static(SPS)],
            &[Bytes::from_static(PPS)],
            4,
        )
        .unwrap();
        let bytes = record.to_bytes();
        let err = AvcDecoderConfigurationRecord::parse(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(matches!(err, CaptureError::Format(_)));
    }

    #[test]
    fn h264_description_carries_avcc_atom() {
        let desc = VideoFormatDescription::h264(
            640,
            480,
            vec![Bytes::from_static(SPS), Bytes::from_static(PPS)],
            4,
        )
        .unwrap();
        assert_eq!(desc.h264_parameter_set_info().unwrap(), (2, 4));
        assert_eq!(desc.h264_parameter_set_at(1).unwrap(), PPS);
        assert!(desc.h264_parameter_set_at(2).is_err());
        assert!(desc.extension_atom(AVCC_ATOM).is_some());

        let raw = VideoFormatDescription::raw(PixelFormat::Nv12, 640, 480);
        assert!(raw.h264_parameter_set_info().is_err());
    }

    #[test]
    fn aac_cookie_encodes_lc_profile() {
        let desc = AudioFormatDescription::aac(44_100, 1);
        // AOT 2, freq index 4, mono
        assert_eq!(desc.magic_cookie.as_deref(), Some(&[0x12, 0x08][..]));
        assert_eq!(AudioFormatDescription::linear_pcm(48_000, 2, 16).bytes_per_frame(), 4);
    }
}
