// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// MP4 / QuickTime asset writer
//
// `AssetWriter` backend writing `ftyp`, one growing `mdat` and, at finalize,
// the `moov` index. Tracks are registered up front but only described once
// their first sample arrives, so the sample entry can come from the sample's
// own format description.
//
// Media handling per track:
// - H.264 and AAC input is stored as is.
// - Raw NV12/BGRA video is stored as uncompressed frames, or run through an
//   embedded H.264 encoder when the input asked for H.264 output.
// - 16-bit PCM is stored as `sowt`, or encoded to AAC-LC when the input asked
//   for AAC output.
//
// Compressed tracks hold back one sample: a sample's duration is only known
// once the next one shows up. Every track gets an edit list placing its first
// sample at its offset from the session start.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::asset_writer::{
    AssetWriter, AssetWriterFactory, AssetWriterInput, FileType, FinishCompletion, WriterStatus,
};
use super::movie::{self, SampleEntry, SampleTable, TrackLayout};
use super::settings::OutputSettings;
use crate::core::codec::nal::{contains_idr, to_four_byte_prefixes};
use crate::core::codec::{
    default_session_factory, nal_unit_type, AacEncoder, CompressionSessionFactory,
    EncodedOutputHandler, EncoderConfig, HardwareEncoder, NalUnitType, AAC_FRAME_SAMPLES,
};
use crate::core::format::{
    AudioCodecType, AudioFormatDescription, AvcDecoderConfigurationRecord, FormatDescription,
    VideoCodecType, VideoFormatDescription, AVCC_ATOM,
};
use crate::core::sample::VideoFrame;
use crate::core::{CaptureError, MediaKind, MediaTime, Result, TimedSample};

/// Video track timescale.
const VIDEO_TIMESCALE: u32 = 90_000;

/// Creates [`Mp4AssetWriter`]s.
#[derive(Clone)]
pub struct Mp4AssetWriterFactory {
    session_factory: Arc<dyn CompressionSessionFactory>,
}

impl Default for Mp4AssetWriterFactory {
    fn default() -> Self {
        Self {
            session_factory: default_session_factory(),
        }
    }
}

impl Mp4AssetWriterFactory {
    /// Use `session_factory` for inputs that encode raw video to H.264.
    pub fn with_session_factory(session_factory: Arc<dyn CompressionSessionFactory>) -> Self {
        Self { session_factory }
    }
}

impl std::fmt::Debug for Mp4AssetWriterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp4AssetWriterFactory").finish_non_exhaustive()
    }
}

impl AssetWriterFactory for Mp4AssetWriterFactory {
    fn create(&self, path: &Path, file_type: FileType) -> Result<Box<dyn AssetWriter>> {
        Ok(Box::new(
            Mp4AssetWriter::create(path, file_type)?
                .with_session_factory(Arc::clone(&self.session_factory)),
        ))
    }
}

pub struct Mp4AssetWriter {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
    session_factory: Arc<dyn CompressionSessionFactory>,
    encoders: Vec<Arc<Mutex<EncoderSlot>>>,
}

struct Inner {
    status: WriterStatus,
    error: Option<String>,
    file_type: FileType,
    file: Option<BufWriter<File>>,
    /// Offset of the `mdat` header.
    mdat_start: u64,
    /// Offset of the next byte written.
    position: u64,
    /// Track that wrote the most recent bytes, for chunk grouping.
    last_writer: Option<usize>,
    session_start: Option<MediaTime>,
    tracks: Vec<Track>,
    next_track_id: u32,
}

struct Track {
    kind: MediaKind,
    settings: Option<OutputSettings>,
    media: Option<TrackMedia>,
    pending: Option<PendingSample>,
    last_duration: u32,
    samples_written: u64,
}

/// A track's container state, created from its first sample.
struct TrackMedia {
    track_id: u32,
    timescale: u32,
    entry: SampleEntry,
    table: SampleTable,
    /// Ticks between session start and the first sample.
    start_offset: u64,
    started: bool,
    storage: Storage,
}

enum Storage {
    /// One container sample per appended sample.
    Samples,
    /// Interleaved PCM, one container sample per frame.
    PcmFrames { frame_size: u32 },
    /// PCM encoded to AAC before it is stored.
    EncodeAac(Box<AacEncoder>),
}

#[derive(Clone, Copy)]
enum Route {
    HoldBack,
    Pcm(u32),
    EncodeAac,
}

impl Storage {
    fn route(&self) -> Route {
        match self {
            Storage::Samples => Route::HoldBack,
            Storage::PcmFrames { frame_size } => Route::Pcm(*frame_size),
            Storage::EncodeAac(_) => Route::EncodeAac,
        }
    }
}

struct PendingSample {
    start: u64,
    bytes: Bytes,
    is_sync: bool,
    declared_duration: Option<u32>,
}

impl Mp4AssetWriter {
    /// Create the output file and write the container header.
    pub fn create(path: &Path, file_type: FileType) -> Result<Self> {
        let mut file = BufWriter::new(File::create(path)?);
        let ftyp = movie::file_type_atom(file_type)?;
        file.write_all(&ftyp)?;
        file.write_all(&movie::media_data_header(0))?;
        let mdat_start = ftyp.len() as u64;

        tracing::debug!(path = %path.display(), ?file_type, "MP4 writer created");

        Ok(Self {
            path: path.to_path_buf(),
            inner: Arc::new(Mutex::new(Inner {
                status: WriterStatus::Unknown,
                error: None,
                file_type,
                file: Some(file),
                mdat_start,
                position: mdat_start + movie::MDAT_HEADER_SIZE,
                last_writer: None,
                session_start: None,
                tracks: Vec::new(),
                next_track_id: 1,
            })),
            session_factory: default_session_factory(),
            encoders: Vec::new(),
        })
    }

    /// Use `session_factory` for inputs that encode raw video to H.264.
    pub fn with_session_factory(
        mut self,
        session_factory: Arc<dyn CompressionSessionFactory>,
    ) -> Self {
        self.session_factory = session_factory;
        self
    }

    /// Samples written to the container for `kind` so far.
    ///
    /// Counts stored access units, frames and PCM buffers as appended, not
    /// the per-frame entries of a PCM track.
    pub fn samples_written(&self, kind: MediaKind) -> u64 {
        self.inner
            .lock()
            .tracks
            .iter()
            .filter(|track| track.kind == kind)
            .map(|track| track.samples_written)
            .sum()
    }
}

impl AssetWriter for Mp4AssetWriter {
    fn path(&self) -> &Path {
        &self.path
    }

    fn status(&self) -> WriterStatus {
        self.inner.lock().status
    }

    fn error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    fn add_input(
        &mut self,
        kind: MediaKind,
        settings: Option<OutputSettings>,
    ) -> Result<Box<dyn AssetWriterInput>> {
        let mut inner = self.inner.lock();
        if inner.status != WriterStatus::Unknown {
            return Err(CaptureError::InvalidState(format!(
                "cannot add {} input once writer is {}",
                kind, inner.status
            )));
        }
        if inner.tracks.iter().any(|track| track.kind == kind) {
            return Err(CaptureError::InvalidState(format!(
                "{} input already registered",
                kind
            )));
        }

        inner.tracks.push(Track {
            kind,
            settings,
            media: None,
            pending: None,
            last_duration: 0,
            samples_written: 0,
        });
        let index = inner.tracks.len() - 1;

        let encoder = Arc::new(Mutex::new(EncoderSlot::Idle));
        self.encoders.push(Arc::clone(&encoder));

        Ok(Box::new(Mp4AssetWriterInput {
            inner: Arc::clone(&self.inner),
            index,
            kind,
            real_time: false,
            encoder,
            session_factory: Arc::clone(&self.session_factory),
        }))
    }

    fn start_writing(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.status {
            WriterStatus::Unknown => {
                inner.status = WriterStatus::Writing;
                Ok(())
            }
            status => Err(CaptureError::InvalidState(format!(
                "cannot start writing from status {}",
                status
            ))),
        }
    }

    fn start_session(&mut self, at: MediaTime) {
        let mut inner = self.inner.lock();
        if inner.session_start.is_none() {
            inner.session_start = Some(at);
        }
    }

    fn finish_writing(&mut self, completion: FinishCompletion) {
        let completion = Arc::new(Mutex::new(Some(completion)));
        let inner = Arc::clone(&self.inner);
        let encoders = self.encoders.clone();
        let path = self.path.clone();
        let thread_completion = Arc::clone(&completion);
        let spawned = std::thread::Builder::new()
            .name("mp4-finalize".to_string())
            .spawn(move || {
                let status = finalize(&inner, &encoders, &path);
                if let Some(completion) = thread_completion.lock().take() {
                    completion(status);
                }
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn finalize thread, finalizing inline");
            let status = finalize(&self.inner, &self.encoders, &self.path);
            if let Some(completion) = completion.lock().take() {
                completion(status);
            }
        }
    }
}

/// Drain the embedded encoders, then write the index.
fn finalize(
    inner: &Mutex<Inner>,
    encoders: &[Arc<Mutex<EncoderSlot>>],
    path: &Path,
) -> WriterStatus {
    // Encoder output locks `inner`, so encoders close before it is taken.
    for slot in encoders {
        slot.lock().close();
    }
    inner.lock().finalize(path)
}

impl Inner {
    fn fail(&mut self, error: &CaptureError) {
        if self.status != WriterStatus::Failed {
            tracing::error!(%error, "MP4 writer failed");
        }
        self.status = WriterStatus::Failed;
        self.error.get_or_insert_with(|| error.to_string());
    }

    /// Session start for a sample that may be written now; `None` when the
    /// sample precedes the session and is dropped.
    fn accept(&self, sample: &TimedSample) -> Result<Option<MediaTime>> {
        if self.status != WriterStatus::Writing {
            return Err(CaptureError::InvalidState(format!(
                "append while writer is {}",
                self.status
            )));
        }
        let session_start = self
            .session_start
            .ok_or_else(|| CaptureError::InvalidState("append before start_session".into()))?;
        if sample.pts() < session_start {
            tracing::debug!(
                kind = %sample.kind(),
                pts = %sample.pts(),
                session_start = %session_start,
                "Dropping sample before session start"
            );
            return Ok(None);
        }
        Ok(Some(session_start))
    }

    /// Settings for raw video that should go through the embedded encoder.
    fn encoder_config(&self, index: usize, sample: &TimedSample) -> Option<EncoderConfig> {
        let video = sample.format()?.as_video()?;
        let VideoCodecType::Raw(_) = video.codec else {
            return None;
        };
        match self.tracks[index].settings {
            Some(OutputSettings::H264 { width, height, .. }) => {
                let (width, height) = if width == 0 || height == 0 {
                    (video.width, video.height)
                } else {
                    (width, height)
                };
                // Samples carry no decode timestamps, so B-frames stay off.
                Some(EncoderConfig::new(width, height).with_frame_reordering(false))
            }
            _ => None,
        }
    }

    fn append(&mut self, index: usize, sample: &TimedSample) -> Result<()> {
        let Some(session_start) = self.accept(sample)? else {
            return Ok(());
        };
        let format = sample
            .format()
            .ok_or_else(|| CaptureError::Format("sample has no format description".into()))?;

        if self.tracks[index].media.is_none() {
            self.add_track(index, format)?;
        }
        let Some(media) = self.tracks[index].media.as_mut() else {
            return Ok(());
        };
        let offset = sample
            .pts()
            .checked_sub(&session_start)
            .map(|delta| delta.convert_scale(media.timescale).max(0) as u64)
            .unwrap_or(0);
        if !media.started {
            media.started = true;
            media.start_offset = offset;
        }

        match media.storage.route() {
            Route::HoldBack => self.hold_back(index, sample, format, offset),
            Route::Pcm(frame_size) => self.write_pcm(index, sample.payload(), frame_size),
            Route::EncodeAac => self.encode_audio(index, sample.payload()),
        }
    }

    fn hold_back(
        &mut self,
        index: usize,
        sample: &TimedSample,
        format: &FormatDescription,
        offset: u64,
    ) -> Result<()> {
        let (bytes, is_sync) = match format {
            FormatDescription::Video(video) if video.is_h264() => {
                let bytes = to_four_byte_prefixes(sample.payload(), video.nal_unit_header_length);
                let is_sync = contains_idr(&bytes, 4);
                (bytes, is_sync)
            }
            _ => (sample.payload().clone(), true),
        };
        let track = &mut self.tracks[index];
        let Some(media) = track.media.as_ref() else {
            return Ok(());
        };
        let timescale = media.timescale;
        let declared_duration = sample
            .duration()
            .map(|d| d.convert_scale(timescale).clamp(0, u32::MAX as i64) as u32);

        let next = PendingSample {
            start: offset,
            bytes,
            is_sync,
            declared_duration,
        };
        if let Some(previous) = track.pending.replace(next) {
            let duration = offset
                .saturating_sub(previous.start)
                .clamp(1, u32::MAX as u64) as u32;
            self.write_sample(index, previous, duration)?;
            self.tracks[index].last_duration = duration;
        }
        Ok(())
    }

    fn write_pcm(&mut self, index: usize, pcm: &Bytes, frame_size: u32) -> Result<()> {
        if pcm.len() % frame_size as usize != 0 {
            return Err(CaptureError::Format(format!(
                "PCM buffer of {} bytes is not a whole number of {}-byte frames",
                pcm.len(),
                frame_size
            )));
        }
        let frames = (pcm.len() / frame_size as usize) as u32;
        let (offset, continues) = self.write_media(index, pcm)?;
        let track = &mut self.tracks[index];
        if let Some(media) = track.media.as_mut() {
            media.table.push_frames(offset, frames, frame_size, continues);
        }
        track.samples_written += 1;
        Ok(())
    }

    fn encode_audio(&mut self, index: usize, pcm: &Bytes) -> Result<()> {
        let units = match self.tracks[index].media.as_mut().map(|m| &mut m.storage) {
            Some(Storage::EncodeAac(encoder)) => encoder.encode(pcm)?,
            _ => return Ok(()),
        };
        self.write_access_units(index, units)
    }

    fn write_access_units(&mut self, index: usize, units: Vec<Bytes>) -> Result<()> {
        for unit in units {
            let (offset, continues) = self.write_media(index, &unit)?;
            let track = &mut self.tracks[index];
            if let Some(media) = track.media.as_mut() {
                media
                    .table
                    .push(offset, unit.len() as u32, AAC_FRAME_SAMPLES, true, continues);
            }
            track.samples_written += 1;
        }
        Ok(())
    }

    fn write_sample(&mut self, index: usize, sample: PendingSample, duration: u32) -> Result<()> {
        let (offset, continues) = self.write_media(index, &sample.bytes)?;
        let track = &mut self.tracks[index];
        if let Some(media) = track.media.as_mut() {
            media.table.push(
                offset,
                sample.bytes.len() as u32,
                duration,
                sample.is_sync,
                continues,
            );
        }
        track.samples_written += 1;
        Ok(())
    }

    /// Append `bytes` to `mdat`. Returns their offset and whether they extend
    /// the track's current chunk.
    fn write_media(&mut self, index: usize, bytes: &[u8]) -> Result<(u64, bool)> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::InvalidState("writer already finalized".into()))?;
        file.write_all(bytes)?;
        let offset = self.position;
        self.position += bytes.len() as u64;
        let continues = self.last_writer == Some(index);
        self.last_writer = Some(index);
        Ok((offset, continues))
    }

    fn add_track(&mut self, index: usize, format: &FormatDescription) -> Result<()> {
        let settings = self.tracks[index].settings.clone();
        let (entry, timescale, storage) = match format {
            FormatDescription::Video(video) => {
                (video_entry(video, settings.as_ref())?, VIDEO_TIMESCALE, Storage::Samples)
            }
            FormatDescription::Audio(audio) => audio_track(audio, settings.as_ref())?,
        };
        if entry.media_kind() != self.tracks[index].kind {
            return Err(CaptureError::Format(format!(
                "{} format on {} input",
                entry.media_kind(),
                self.tracks[index].kind
            )));
        }

        let track_id = self.next_track_id;
        self.next_track_id += 1;
        let track = &mut self.tracks[index];
        tracing::debug!(track_id, kind = %track.kind, timescale, ?entry, "Track added");
        track.media = Some(TrackMedia {
            track_id,
            timescale,
            entry,
            table: SampleTable::default(),
            start_offset: 0,
            started: false,
            storage,
        });
        Ok(())
    }

    fn finalize(&mut self, path: &Path) -> WriterStatus {
        if self.status == WriterStatus::Failed {
            self.file = None;
            return self.status;
        }

        if let Err(e) = self.finalize_inner() {
            self.fail(&e);
            self.file = None;
            return self.status;
        }

        self.status = WriterStatus::Completed;
        tracing::info!(
            path = %path.display(),
            tracks = self.tracks.iter().filter(|t| t.media.is_some()).count(),
            bytes = self.position,
            "MP4 file finalized"
        );
        self.status
    }

    fn finalize_inner(&mut self) -> Result<()> {
        for index in 0..self.tracks.len() {
            let track = &mut self.tracks[index];
            if let Some(pending) = track.pending.take() {
                let duration = pending
                    .declared_duration
                    .filter(|&d| d > 0)
                    .or((track.last_duration > 0).then_some(track.last_duration))
                    .unwrap_or(match track.kind {
                        MediaKind::Audio => AAC_FRAME_SAMPLES,
                        MediaKind::Video => VIDEO_TIMESCALE / 30,
                    });
                self.write_sample(index, pending, duration)?;
            }

            let tail = match self.tracks[index].media.as_mut().map(|m| &mut m.storage) {
                Some(Storage::EncodeAac(encoder)) => encoder.finish()?,
                _ => Vec::new(),
            };
            self.write_access_units(index, tail)?;
        }

        let layouts: Vec<TrackLayout<'_>> = self
            .tracks
            .iter()
            .filter_map(|track| track.media.as_ref())
            .filter(|media| media.table.sample_count() > 0)
            .map(|media| {
                let (media_start, presentation) = match &media.storage {
                    Storage::EncodeAac(encoder) => {
                        (encoder.priming_frames() as u64, encoder.valid_frames())
                    }
                    _ => (0, media.table.media_duration()),
                };
                TrackLayout {
                    track_id: media.track_id,
                    timescale: media.timescale,
                    entry: &media.entry,
                    table: &media.table,
                    start_offset: media.start_offset,
                    media_start,
                    presentation,
                }
            })
            .collect();
        let moov = movie::movie_atom(self.file_type, &layouts);

        let Some(mut file) = self.file.take() else {
            return Err(CaptureError::InvalidState("writer already finalized".into()));
        };
        let payload = self.position - self.mdat_start - movie::MDAT_HEADER_SIZE;
        file.seek(SeekFrom::Start(self.mdat_start))?;
        file.write_all(&movie::media_data_header(payload))?;
        file.seek(SeekFrom::Start(self.position))?;
        file.write_all(&moov)?;
        file.flush()?;
        self.position += moov.len() as u64;
        Ok(())
    }
}

fn video_entry(
    video: &VideoFormatDescription,
    settings: Option<&OutputSettings>,
) -> Result<SampleEntry> {
    let (width, height) = match settings {
        Some(OutputSettings::H264 { width, height, .. }) if video.width == 0 => (*width, *height),
        _ => (video.width, video.height),
    };
    match video.codec {
        VideoCodecType::Raw(pixel_format) => Ok(SampleEntry::RawVideo {
            pixel_format,
            width,
            height,
        }),
        VideoCodecType::H264 => {
            let mut record = match video.extension_atoms.get(AVCC_ATOM) {
                Some(avcc) => AvcDecoderConfigurationRecord::parse(avcc)?,
                None => {
                    let of_type = |wanted: NalUnitType| -> Vec<Bytes> {
                        video
                            .parameter_sets
                            .iter()
                            .filter(|ps| !ps.is_empty() && nal_unit_type(ps[0]) == wanted)
                            .cloned()
                            .collect()
                    };
                    AvcDecoderConfigurationRecord::from_parameter_sets(
                        &of_type(NalUnitType::Sps),
                        &of_type(NalUnitType::Pps),
                        4,
                    )?
                }
            };
            if record.sps.is_empty() || record.pps.is_empty() {
                return Err(CaptureError::Format(
                    "H.264 track needs both SPS and PPS".into(),
                ));
            }
            // Payloads are rewritten with 4-byte length prefixes.
            record.length_size_minus_one = 3;
            Ok(SampleEntry::Avc {
                width,
                height,
                avcc: record.to_bytes(),
            })
        }
    }
}

fn audio_track(
    audio: &AudioFormatDescription,
    settings: Option<&OutputSettings>,
) -> Result<(SampleEntry, u32, Storage)> {
    let aac_settings = match settings {
        Some(OutputSettings::Aac {
            bitrate,
            sample_rate,
            channels,
        }) => Some((*bitrate, *sample_rate, *channels)),
        _ => None,
    };

    match (audio.codec, aac_settings) {
        (AudioCodecType::Aac, settings) => {
            let config = match &audio.magic_cookie {
                Some(cookie) => cookie.clone(),
                None => AudioFormatDescription::aac(audio.sample_rate, audio.channels)
                    .magic_cookie
                    .ok_or_else(|| {
                        CaptureError::Format(format!(
                            "unsupported AAC sample rate {}",
                            audio.sample_rate
                        ))
                    })?,
            };
            let entry = SampleEntry::Aac {
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                bitrate: settings.map(|(bitrate, _, _)| bitrate).unwrap_or(0),
                config,
            };
            Ok((entry, audio.sample_rate.max(1), Storage::Samples))
        }
        (AudioCodecType::LinearPcm, Some((bitrate, sample_rate, channels))) => {
            let encoder = AacEncoder::new(audio, bitrate, sample_rate, channels)?;
            let output = encoder.format();
            let sample_rate = output.sample_rate;
            let entry = SampleEntry::Aac {
                sample_rate,
                channels: output.channels,
                bitrate,
                config: output.magic_cookie.clone().unwrap_or_default(),
            };
            Ok((entry, sample_rate, Storage::EncodeAac(Box::new(encoder))))
        }
        (AudioCodecType::LinearPcm, None) => {
            if audio.bits_per_channel != 16 {
                return Err(CaptureError::NotSupported(format!(
                    "{}-bit PCM passthrough; only 16-bit PCM is stored uncompressed",
                    audio.bits_per_channel
                )));
            }
            let rate_fits = (1..=u16::MAX as u32).contains(&audio.sample_rate);
            if !rate_fits || audio.channels == 0 {
                return Err(CaptureError::NotSupported(format!(
                    "PCM passthrough at {} Hz x{}",
                    audio.sample_rate, audio.channels
                )));
            }
            let entry = SampleEntry::Pcm {
                sample_rate: audio.sample_rate,
                channels: audio.channels,
            };
            let frame_size = audio.bytes_per_frame() as u32;
            Ok((entry, audio.sample_rate, Storage::PcmFrames { frame_size }))
        }
    }
}

// ============================================================================
// EMBEDDED ENCODER
// ============================================================================

enum EncoderSlot {
    Idle,
    Active(HardwareEncoder),
    /// No encoder available; raw frames are stored instead.
    Raw,
    Closed,
}

impl EncoderSlot {
    fn close(&mut self) {
        if let EncoderSlot::Active(encoder) = self {
            encoder.close();
        }
        *self = EncoderSlot::Closed;
    }
}

fn encoded_output(inner: Arc<Mutex<Inner>>, index: usize) -> EncodedOutputHandler {
    let handler: EncodedOutputHandler = Arc::new(move |sample, _status, _flags| {
        let mut inner = inner.lock();
        if let Err(e) = inner.append(index, &sample) {
            if matches!(e, CaptureError::Io(_) | CaptureError::Mp4(_)) {
                inner.fail(&e);
            } else {
                tracing::warn!(error = %e, pts = %sample.pts(), "Encoded video sample not written");
            }
        }
    });
    handler
}

// ============================================================================
// TRACK INPUT
// ============================================================================

struct Mp4AssetWriterInput {
    inner: Arc<Mutex<Inner>>,
    index: usize,
    kind: MediaKind,
    real_time: bool,
    encoder: Arc<Mutex<EncoderSlot>>,
    session_factory: Arc<dyn CompressionSessionFactory>,
}

impl Mp4AssetWriterInput {
    fn append_direct(&self, sample: &TimedSample) -> Result<()> {
        let mut inner = self.inner.lock();
        let result = inner.append(self.index, sample);
        if let Err(e) = &result {
            // Container and I/O errors are unrecoverable; format problems are per sample.
            if matches!(e, CaptureError::Io(_) | CaptureError::Mp4(_)) {
                inner.fail(e);
            }
        }
        result
    }

    fn encode(&self, sample: &TimedSample, config: EncoderConfig) -> Result<()> {
        let mut slot = self.encoder.lock();
        if let EncoderSlot::Idle = *slot {
            let encoder = HardwareEncoder::new(
                config,
                self.session_factory.as_ref(),
                encoded_output(Arc::clone(&self.inner), self.index),
                None,
            );
            *slot = if encoder.is_inert() {
                tracing::warn!("H.264 encoder unavailable, storing uncompressed video");
                EncoderSlot::Raw
            } else {
                EncoderSlot::Active(encoder)
            };
        }

        if let EncoderSlot::Raw = *slot {
            drop(slot);
            return self.append_direct(sample);
        }
        let EncoderSlot::Active(encoder) = &mut *slot else {
            return Err(CaptureError::InvalidState("video input is finishing".into()));
        };
        let Some(video) = sample.format().and_then(|f| f.as_video()) else {
            return Ok(());
        };
        let VideoCodecType::Raw(pixel_format) = video.codec else {
            return Ok(());
        };
        let frame = VideoFrame::new(
            video.width,
            video.height,
            pixel_format,
            sample.payload().clone(),
        )?;
        encoder.encode(&frame, sample.timing());
        Ok(())
    }
}

impl AssetWriterInput for Mp4AssetWriterInput {
    fn media_kind(&self) -> MediaKind {
        self.kind
    }

    fn expects_media_data_in_real_time(&self) -> bool {
        self.real_time
    }

    fn set_expects_media_data_in_real_time(&mut self, real_time: bool) {
        self.real_time = real_time;
    }

    fn is_ready_for_more_media_data(&self) -> bool {
        // Writes go straight to a buffered file; there is no internal queue to fill.
        self.inner.lock().status == WriterStatus::Writing
    }

    fn append(&mut self, sample: TimedSample) -> Result<()> {
        if sample.kind() != self.kind {
            return Err(CaptureError::Format(format!(
                "{} sample appended to {} input",
                sample.kind(),
                self.kind
            )));
        }

        let config = {
            let inner = self.inner.lock();
            if inner.accept(&sample)?.is_none() {
                return Ok(());
            }
            inner.encoder_config(self.index, &sample)
        };
        match config {
            Some(config) => self.encode(&sample, config),
            None => self.append_direct(&sample),
        }
    }
}
