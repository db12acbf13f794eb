// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// QuickTime / MPEG-4 movie atoms
//
// Everything the asset writer needs to describe what it put in `mdat`:
// per-track sample tables built up while writing, sample entries for each
// supported media type, and the `moov` atom built from both at finalize.
//
// Layout written:
//
//   ftyp
//   mdat (64-bit size, patched at finalize)
//   moov
//     mvhd
//     trak*
//       tkhd
//       edts/elst   empty edit for the track's start offset, then the media
//       mdia
//         mdhd, hdlr
//         minf
//           vmhd | smhd, dinf/dref
//           stbl: stsd, stts, stss (H.264 only), stsc, stsz, co64

use bytes::{BufMut, Bytes, BytesMut};
use mp4::{FourCC, FtypBox, WriteBox};

use super::asset_writer::FileType;
use crate::core::format::{MediaKind, PixelFormat};
use crate::core::Result;

/// Movie-level timescale (ticks per second).
pub(crate) const MOVIE_TIMESCALE: u32 = 1000;

/// Bytes in the `mdat` header written before any sample data.
pub(crate) const MDAT_HEADER_SIZE: u64 = 16;

/// Packed ISO-639-2 code for "und".
const LANGUAGE_UNDETERMINED: u16 = 0x55C4;

const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

// ============================================================================
// ATOM BUILDER
// ============================================================================

/// Big-endian atom writer. Sizes are patched when an atom is closed.
#[derive(Default)]
pub(crate) struct Atoms {
    buf: BytesMut,
    open: Vec<usize>,
}

impl Atoms {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, kind: &[u8; 4]) -> &mut Self {
        self.open.push(self.buf.len());
        self.buf.put_u32(0);
        self.buf.put_slice(kind);
        self
    }

    /// Atom with the version/flags word of a full box.
    pub(crate) fn begin_full(&mut self, kind: &[u8; 4], version: u8, flags: u32) -> &mut Self {
        self.begin(kind);
        self.buf.put_u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        self
    }

    pub(crate) fn end(&mut self) -> &mut Self {
        if let Some(start) = self.open.pop() {
            let size = (self.buf.len() - start) as u32;
            self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        }
        self
    }

    pub(crate) fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub(crate) fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16(value);
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32(value);
        self
    }

    pub(crate) fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64(value);
        self
    }

    pub(crate) fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    pub(crate) fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    pub(crate) fn finish(self) -> Bytes {
        debug_assert!(self.open.is_empty(), "unclosed atom");
        self.buf.freeze()
    }
}

/// `ftyp` for `file_type`.
pub(crate) fn file_type_atom(file_type: FileType) -> Result<Bytes> {
    let ftyp = match file_type {
        FileType::QuickTimeMovie => FtypBox {
            major_brand: "qt  ".parse()?,
            minor_version: 0x2005_0300,
            compatible_brands: vec!["qt  ".parse()?],
        },
        FileType::Mpeg4 => FtypBox {
            major_brand: "isom".parse()?,
            minor_version: 512,
            compatible_brands: ["isom", "iso2", "avc1", "mp41"]
                .iter()
                .map(|brand| brand.parse::<FourCC>())
                .collect::<std::result::Result<_, _>>()?,
        },
    };
    let mut out = Vec::new();
    ftyp.write_box(&mut out)?;
    Ok(Bytes::from(out))
}

/// `mdat` header with a 64-bit size field, `payload` bytes long.
pub(crate) fn media_data_header(payload: u64) -> [u8; MDAT_HEADER_SIZE as usize] {
    let mut header = [0u8; MDAT_HEADER_SIZE as usize];
    header[..4].copy_from_slice(&1u32.to_be_bytes());
    header[4..8].copy_from_slice(b"mdat");
    header[8..].copy_from_slice(&(payload + MDAT_HEADER_SIZE).to_be_bytes());
    header
}

// ============================================================================
// SAMPLE ENTRIES
// ============================================================================

/// Codec description of a track, one per `stsd`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SampleEntry {
    Avc {
        width: u32,
        height: u32,
        avcc: Bytes,
    },
    RawVideo {
        pixel_format: PixelFormat,
        width: u32,
        height: u32,
    },
    Aac {
        sample_rate: u32,
        channels: u16,
        bitrate: u32,
        config: Bytes,
    },
    /// Signed little-endian 16-bit PCM (`sowt`).
    Pcm { sample_rate: u32, channels: u16 },
}

impl SampleEntry {
    pub(crate) fn media_kind(&self) -> MediaKind {
        match self {
            SampleEntry::Avc { .. } | SampleEntry::RawVideo { .. } => MediaKind::Video,
            SampleEntry::Aac { .. } | SampleEntry::Pcm { .. } => MediaKind::Audio,
        }
    }

    pub(crate) fn dimensions(&self) -> (u32, u32) {
        match self {
            SampleEntry::Avc { width, height, .. }
            | SampleEntry::RawVideo { width, height, .. } => (*width, *height),
            SampleEntry::Aac { .. } | SampleEntry::Pcm { .. } => (0, 0),
        }
    }

    fn write(&self, atoms: &mut Atoms, track_id: u32) {
        match self {
            SampleEntry::Avc {
                width,
                height,
                avcc,
            } => {
                atoms.begin(b"avc1");
                visual_entry_fields(atoms, *width, *height, "AVC Coding", 0x0018);
                atoms.begin(b"avcC").bytes(avcc).end();
                atoms.end();
            }
            SampleEntry::RawVideo {
                pixel_format,
                width,
                height,
            } => {
                let (fourcc, depth) = match pixel_format {
                    PixelFormat::Nv12 => (b"420v", 0x0018),
                    PixelFormat::Bgra32 => (b"BGRA", 0x0020),
                };
                atoms.begin(fourcc);
                visual_entry_fields(atoms, *width, *height, "", depth);
                atoms.end();
            }
            SampleEntry::Aac {
                sample_rate,
                channels,
                bitrate,
                config,
            } => {
                atoms.begin(b"mp4a");
                sound_entry_fields(atoms, *channels, 16, *sample_rate);
                write_esds(atoms, track_id, *bitrate, config);
                atoms.end();
            }
            SampleEntry::Pcm {
                sample_rate,
                channels,
            } => {
                atoms.begin(b"sowt");
                sound_entry_fields(atoms, *channels, 16, *sample_rate);
                atoms.end();
            }
        }
    }
}

fn visual_entry_fields(atoms: &mut Atoms, width: u32, height: u32, compressor: &str, depth: u16) {
    let mut name = [0u8; 32];
    let len = compressor.len().min(31);
    name[0] = len as u8;
    name[1..=len].copy_from_slice(&compressor.as_bytes()[..len]);

    atoms
        .zeros(6)
        .u16(1) // data reference index
        .zeros(16) // version, revision, vendor, temporal and spatial quality
        .u16(width.min(u16::MAX as u32) as u16)
        .u16(height.min(u16::MAX as u32) as u16)
        .u32(0x0048_0000) // 72 dpi
        .u32(0x0048_0000)
        .u32(0) // data size
        .u16(1) // frames per sample
        .bytes(&name)
        .u16(depth)
        .u16(0xFFFF); // no colour table
}

// Version 0 sound description; its 16.16 rate field tops out below 65536 Hz.
fn sound_entry_fields(atoms: &mut Atoms, channels: u16, sample_size: u16, sample_rate: u32) {
    let rate = if sample_rate <= u16::MAX as u32 {
        sample_rate << 16
    } else {
        0
    };
    atoms
        .zeros(6)
        .u16(1) // data reference index
        .zeros(8) // version, revision, vendor
        .u16(channels)
        .u16(sample_size)
        .u32(0) // compression id, packet size
        .u32(rate);
}

fn write_esds(atoms: &mut Atoms, track_id: u32, bitrate: u32, config: &[u8]) {
    let mut decoder_config = Vec::with_capacity(13 + config.len() + 2);
    decoder_config.push(0x40); // MPEG-4 audio
    decoder_config.push((0x05 << 2) | 0x01); // audio stream
    decoder_config.extend_from_slice(&[0, 0, 0]); // buffer size
    decoder_config.extend_from_slice(&bitrate.to_be_bytes()); // max
    decoder_config.extend_from_slice(&bitrate.to_be_bytes()); // average
    put_descriptor(&mut decoder_config, 0x05, config);

    let mut es = Vec::with_capacity(decoder_config.len() + 16);
    es.extend_from_slice(&(track_id.min(u16::MAX as u32) as u16).to_be_bytes());
    es.push(0); // flags
    put_descriptor(&mut es, 0x04, &decoder_config);
    put_descriptor(&mut es, 0x06, &[0x02]);

    let mut body = Vec::with_capacity(es.len() + 5);
    put_descriptor(&mut body, 0x03, &es);
    atoms.begin_full(b"esds", 0, 0).bytes(&body).end();
}

fn put_descriptor(out: &mut Vec<u8>, tag: u8, body: &[u8]) {
    out.push(tag);
    let size = body.len() as u32;
    let width = match size {
        0..=0x7F => 1,
        0x80..=0x3FFF => 2,
        0x4000..=0x1F_FFFF => 3,
        _ => 4,
    };
    for index in (0..width).rev() {
        let mut byte = ((size >> (7 * index)) & 0x7F) as u8;
        if index > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
    out.extend_from_slice(body);
}

// ============================================================================
// SAMPLE TABLES
// ============================================================================

/// Run of consecutive samples stored back to back in `mdat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Chunk {
    offset: u64,
    samples: u32,
}

/// Per-track index of everything written to `mdat`.
#[derive(Debug, Default)]
pub(crate) struct SampleTable {
    /// `(count, delta)` runs.
    durations: Vec<(u32, u32)>,
    sizes: Vec<u32>,
    /// Size shared by every sample, for PCM.
    constant_size: Option<u32>,
    count: u32,
    /// 1-based numbers of sync samples.
    sync: Vec<u32>,
    chunks: Vec<Chunk>,
    media_duration: u64,
}

impl SampleTable {
    /// Record one sample written at `offset`. `continues_chunk` is true when
    /// nothing else was written since this track's previous sample.
    pub(crate) fn push(
        &mut self,
        offset: u64,
        size: u32,
        duration: u32,
        is_sync: bool,
        continues_chunk: bool,
    ) {
        self.count += 1;
        self.sizes.push(size);
        if is_sync {
            self.sync.push(self.count);
        }
        self.push_duration(1, duration);
        self.push_chunk(offset, 1, continues_chunk);
    }

    /// Record `frames` fixed-size PCM frames of one tick each.
    pub(crate) fn push_frames(
        &mut self,
        offset: u64,
        frames: u32,
        frame_size: u32,
        continues_chunk: bool,
    ) {
        if frames == 0 {
            return;
        }
        self.constant_size = Some(frame_size);
        self.count += frames;
        self.push_duration(frames, 1);
        self.push_chunk(offset, frames, continues_chunk);
    }

    pub(crate) fn sample_count(&self) -> u32 {
        self.count
    }

    /// Sum of all sample durations, in the track's timescale.
    pub(crate) fn media_duration(&self) -> u64 {
        self.media_duration
    }

    fn push_duration(&mut self, count: u32, delta: u32) {
        self.media_duration += count as u64 * delta as u64;
        match self.durations.last_mut() {
            Some((run, last)) if *last == delta => *run += count,
            _ => self.durations.push((count, delta)),
        }
    }

    fn push_chunk(&mut self, offset: u64, samples: u32, continues_chunk: bool) {
        match self.chunks.last_mut() {
            Some(chunk) if continues_chunk => chunk.samples += samples,
            _ => self.chunks.push(Chunk { offset, samples }),
        }
    }

    fn write(&self, atoms: &mut Atoms, entry: &SampleEntry, track_id: u32) {
        atoms.begin(b"stbl");

        atoms.begin_full(b"stsd", 0, 0).u32(1);
        entry.write(atoms, track_id);
        atoms.end();

        atoms.begin_full(b"stts", 0, 0).u32(self.durations.len() as u32);
        for (count, delta) in &self.durations {
            atoms.u32(*count).u32(*delta);
        }
        atoms.end();

        if matches!(entry, SampleEntry::Avc { .. }) {
            atoms.begin_full(b"stss", 0, 0).u32(self.sync.len() as u32);
            for number in &self.sync {
                atoms.u32(*number);
            }
            atoms.end();
        }

        // Runs of chunks with the same sample count share one entry.
        let mut runs: Vec<(u32, u32)> = Vec::new();
        for (index, chunk) in self.chunks.iter().enumerate() {
            if runs.last().is_none_or(|(_, samples)| *samples != chunk.samples) {
                runs.push((index as u32 + 1, chunk.samples));
            }
        }
        atoms.begin_full(b"stsc", 0, 0).u32(runs.len() as u32);
        for (first_chunk, samples) in runs {
            atoms.u32(first_chunk).u32(samples).u32(1);
        }
        atoms.end();

        atoms.begin_full(b"stsz", 0, 0);
        match self.constant_size {
            Some(size) => {
                atoms.u32(size).u32(self.count);
            }
            None => {
                atoms.u32(0).u32(self.count);
                for size in &self.sizes {
                    atoms.u32(*size);
                }
            }
        }
        atoms.end();

        atoms.begin_full(b"co64", 0, 0).u32(self.chunks.len() as u32);
        for chunk in &self.chunks {
            atoms.u64(chunk.offset);
        }
        atoms.end();

        atoms.end();
    }
}

// ============================================================================
// MOVIE
// ============================================================================

/// Everything `moov` needs to know about one finished track.
pub(crate) struct TrackLayout<'a> {
    pub track_id: u32,
    pub timescale: u32,
    pub entry: &'a SampleEntry,
    pub table: &'a SampleTable,
    /// Delay between session start and the track's first sample, track timescale.
    pub start_offset: u64,
    /// First media time to present (encoder priming), track timescale.
    pub media_start: u64,
    /// Presented media length, track timescale.
    pub presentation: u64,
}

impl TrackLayout<'_> {
    fn empty_edit(&self) -> u64 {
        rescale(self.start_offset, self.timescale, MOVIE_TIMESCALE)
    }

    fn media_edit(&self) -> u64 {
        rescale(self.presentation, self.timescale, MOVIE_TIMESCALE)
    }

    /// Track duration in the movie timescale, leading gap included.
    fn duration(&self) -> u64 {
        self.empty_edit() + self.media_edit()
    }
}

/// `value` ticks at `from` expressed at `to`, rounded down.
pub(crate) fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

fn clamp_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Build `moov` for `tracks`.
pub(crate) fn movie_atom(file_type: FileType, tracks: &[TrackLayout<'_>]) -> Bytes {
    let duration = tracks.iter().map(TrackLayout::duration).max().unwrap_or(0);
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;

    let mut atoms = Atoms::new();
    atoms.begin(b"moov");

    atoms
        .begin_full(b"mvhd", 0, 0)
        .u32(0) // creation time
        .u32(0) // modification time
        .u32(MOVIE_TIMESCALE)
        .u32(clamp_u32(duration))
        .u32(0x0001_0000) // rate 1.0
        .u16(0x0100) // volume 1.0
        .zeros(10);
    for value in UNITY_MATRIX {
        atoms.u32(value);
    }
    atoms.zeros(24).u32(next_track_id).end();

    for track in tracks {
        write_track(&mut atoms, file_type, track);
    }

    atoms.end();
    atoms.finish()
}

fn write_track(atoms: &mut Atoms, file_type: FileType, track: &TrackLayout<'_>) {
    let kind = track.entry.media_kind();
    let (width, height) = track.entry.dimensions();

    atoms.begin(b"trak");

    // Enabled, in movie, in preview.
    atoms
        .begin_full(b"tkhd", 0, 0x0000_0007)
        .u32(0)
        .u32(0)
        .u32(track.track_id)
        .u32(0)
        .u32(clamp_u32(track.duration()))
        .zeros(8)
        .u16(0) // layer
        .u16(0) // alternate group
        .u16(if kind == MediaKind::Audio { 0x0100 } else { 0 })
        .u16(0);
    for value in UNITY_MATRIX {
        atoms.u32(value);
    }
    atoms.u32(width << 16).u32(height << 16).end();

    let empty_edit = track.empty_edit();
    atoms
        .begin(b"edts")
        .begin_full(b"elst", 0, 0)
        .u32(if empty_edit > 0 { 2 } else { 1 });
    if empty_edit > 0 {
        atoms.u32(clamp_u32(empty_edit)).u32(u32::MAX).u16(1).u16(0);
    }
    atoms
        .u32(clamp_u32(track.media_edit()))
        .u32(clamp_u32(track.media_start))
        .u16(1)
        .u16(0)
        .end()
        .end();

    atoms.begin(b"mdia");
    atoms
        .begin_full(b"mdhd", 0, 0)
        .u32(0)
        .u32(0)
        .u32(track.timescale)
        .u32(clamp_u32(track.table.media_duration()))
        .u16(LANGUAGE_UNDETERMINED)
        .u16(0)
        .end();

    let (handler, name): (&[u8; 4], &str) = match kind {
        MediaKind::Video => (b"vide", "VideoHandler"),
        MediaKind::Audio => (b"soun", "SoundHandler"),
    };
    let component_type: &[u8; 4] = match file_type {
        FileType::QuickTimeMovie => b"mhlr",
        FileType::Mpeg4 => &[0; 4],
    };
    atoms
        .begin_full(b"hdlr", 0, 0)
        .bytes(component_type)
        .bytes(handler)
        .zeros(12)
        .bytes(name.as_bytes())
        .u8(0)
        .end();

    atoms.begin(b"minf");
    match kind {
        MediaKind::Video => {
            atoms.begin_full(b"vmhd", 0, 1).zeros(8).end();
        }
        MediaKind::Audio => {
            atoms.begin_full(b"smhd", 0, 0).zeros(4).end();
        }
    }
    atoms
        .begin(b"dinf")
        .begin_full(b"dref", 0, 0)
        .u32(1)
        .begin_full(b"url ", 0, 1) // media is in this file
        .end()
        .end()
        .end();
    track.table.write(atoms, track.entry, track.track_id);
    atoms.end(); // minf

    atoms.end(); // mdia
    atoms.end(); // trak
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(bytes: &[u8], at: usize) -> u32 {
        u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    fn find(bytes: &[u8], kind: &[u8; 4]) -> Option<usize> {
        bytes.windows(4).position(|window| window == kind).map(|at| at - 4)
    }

    #[test]
    fn nested_atoms_get_their_sizes() {
        let mut atoms = Atoms::new();
        atoms.begin(b"moov").begin(b"free").u32(7).end().end();
        let bytes = atoms.finish();
        assert_eq!(bytes.len(), 20);
        assert_eq!(read_u32(&bytes, 0), 20);
        assert_eq!(read_u32(&bytes, 8), 12);
    }

    #[test]
    fn chunks_break_when_other_tracks_interleave() {
        let mut table = SampleTable::default();
        table.push(100, 10, 3000, true, false);
        table.push(110, 10, 3000, false, true);
        table.push(200, 10, 3003, false, false);
        assert_eq!(table.sample_count(), 3);
        assert_eq!(table.media_duration(), 9003);
        assert_eq!(table.durations, vec![(2, 3000), (1, 3003)]);
        assert_eq!(
            table.chunks,
            vec![
                Chunk {
                    offset: 100,
                    samples: 2
                },
                Chunk {
                    offset: 200,
                    samples: 1
                }
            ]
        );
        assert_eq!(table.sync, vec![1]);
    }

    #[test]
    fn pcm_frames_share_one_size() {
        let mut table = SampleTable::default();
        table.push_frames(0, 1024, 2, false);
        table.push_frames(2048, 1024, 2, true);
        assert_eq!(table.sample_count(), 2048);
        assert_eq!(table.media_duration(), 2048);
        assert_eq!(table.constant_size, Some(2));
        assert_eq!(table.durations, vec![(2048, 1)]);
        assert_eq!(table.chunks.len(), 1);
    }

    #[test]
    fn offset_track_gets_an_empty_edit() {
        let entry = SampleEntry::Pcm {
            sample_rate: 44_100,
            channels: 1,
        };
        let mut table = SampleTable::default();
        table.push_frames(40, 44_100, 2, false);
        let layout = TrackLayout {
            track_id: 1,
            timescale: 44_100,
            entry: &entry,
            table: &table,
            start_offset: 22_050,
            media_start: 0,
            presentation: 44_100,
        };
        let moov = movie_atom(FileType::QuickTimeMovie, &[layout]);

        let elst = find(&moov, b"elst").unwrap();
        assert_eq!(read_u32(&moov, elst + 12), 2);
        assert_eq!(read_u32(&moov, elst + 16), 500);
        assert_eq!(read_u32(&moov, elst + 20), u32::MAX);
        assert_eq!(read_u32(&moov, elst + 28), 1000);
        assert_eq!(read_u32(&moov, elst + 32), 0);

        let mvhd = find(&moov, b"mvhd").unwrap();
        assert_eq!(read_u32(&moov, mvhd + 24), 1500);
        assert!(find(&moov, b"sowt").is_some());
        assert!(find(&moov, b"stss").is_none());
    }

    #[test]
    fn descriptor_lengths_grow_past_one_byte() {
        let mut out = Vec::new();
        put_descriptor(&mut out, 0x05, &[0u8; 200]);
        assert_eq!(&out[..3], &[0x05, 0x81, 0x48]);
        assert_eq!(out.len(), 203);
    }

    #[test]
    fn media_data_header_counts_itself() {
        let header = media_data_header(100);
        assert_eq!(read_u32(&header, 0), 1);
        assert_eq!(&header[4..8], b"mdat");
        assert_eq!(u64::from_be_bytes(header[8..].try_into().unwrap()), 116);
    }
}
