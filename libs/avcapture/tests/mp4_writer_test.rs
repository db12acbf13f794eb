// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end tests writing real containers with the MP4 asset writer.

mod common;

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use avcapture::{
    AacEncoder, AssetWriter, AudioFormatDescription, FileSink, FileType, MediaKind, MediaTime,
    Mp4AssetWriter, Mp4AssetWriterFactory, PixelFormat, SinkStatus, UnsupportedSessionFactory,
    VideoWriterSettings, WriterSettings, WriterStatus, AAC_PRESET_BITRATE, AAC_PRESET_CHANNELS,
    AAC_PRESET_SAMPLE_RATE,
};
use common::{
    audio_sample, h264_format, nv12_sample, pcm_sample, status_channel, video_sample,
    InlineEncoderFactory, PCM_FRAMES,
};

const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

struct Contents {
    brand: mp4::FourCC,
    tracks: Vec<(mp4::TrackType, u32)>,
}

impl Contents {
    fn samples(&self, track_type: mp4::TrackType) -> Option<u32> {
        self.tracks
            .iter()
            .find(|(kind, _)| *kind == track_type)
            .map(|(_, count)| *count)
    }
}

fn open_movie(path: &Path) -> mp4::Mp4Reader<BufReader<File>> {
    let file = File::open(path).unwrap();
    let size = file.metadata().unwrap().len();
    mp4::Mp4Reader::read_header(BufReader::new(file), size).unwrap()
}

fn read_back(path: &Path) -> Contents {
    let reader = open_movie(path);
    let tracks = reader
        .tracks()
        .values()
        .map(|track| (track.track_type().unwrap(), track.sample_count()))
        .collect();
    Contents {
        brand: *reader.major_brand(),
        tracks,
    }
}

fn track_id(reader: &mp4::Mp4Reader<BufReader<File>>, track_type: mp4::TrackType) -> u32 {
    reader
        .tracks()
        .values()
        .find(|track| track.track_type().unwrap() == track_type)
        .map(|track| track.track_id())
        .unwrap()
}

/// `(segment_duration, media_time)` of every edit of the track.
fn edits(reader: &mp4::Mp4Reader<BufReader<File>>, track_type: mp4::TrackType) -> Vec<(u64, u64)> {
    let track = &reader.tracks()[&track_id(reader, track_type)];
    track
        .trak
        .edts
        .as_ref()
        .and_then(|edts| edts.elst.as_ref())
        .map(|elst| {
            elst.entries
                .iter()
                .map(|entry| (entry.segment_duration, entry.media_time))
                .collect()
        })
        .unwrap_or_default()
}

/// Empty edit marker in a version 0 edit list.
const EMPTY_EDIT: u64 = u32::MAX as u64;

fn wait_finished(statuses: &crossbeam_channel::Receiver<(SinkStatus, avcapture::StatusInfo)>) {
    loop {
        let (status, info) = statuses.recv_timeout(FINISH_TIMEOUT).unwrap();
        assert!(!status.is_failure(), "{status}: {:?}", info.error);
        if status == SinkStatus::Finished {
            assert_eq!(info.writer_status, Some(WriterStatus::Completed));
            return;
        }
    }
}

#[test]
fn audio_and_video_land_in_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.mp4");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        Some(WriterSettings::compressed()),
        Some(VideoWriterSettings::new(true, 320, 240)),
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    assert_eq!(statuses.recv().unwrap().0, SinkStatus::Initialized);

    let format = h264_format(320, 240);
    for frame in 0..60 {
        sink.append(video_sample(frame, 30, &format));
        if frame < 40 {
            sink.append(audio_sample(frame * 23));
        }
    }
    sink.finish(false);

    let (status, info) = statuses.recv_timeout(FINISH_TIMEOUT).unwrap();
    assert_eq!(status, SinkStatus::Finished);
    assert_eq!(info.writer_status, Some(WriterStatus::Completed));
    assert_eq!(info.file_path.as_deref(), Some(path.as_path()));

    let contents = read_back(&path);
    assert_eq!(contents.brand, "isom".parse().unwrap());
    assert_eq!(contents.samples(mp4::TrackType::Video), Some(60));
    assert_eq!(contents.samples(mp4::TrackType::Audio), Some(40));
}

#[test]
fn out_of_order_video_is_filtered_before_the_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("video.mp4");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        None,
        Some(VideoWriterSettings::new(true, 320, 240)),
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    let format = h264_format(320, 240);

    for frame in [0, 1, 2, 1, 3, 0, 4] {
        sink.append(video_sample(frame, 30, &format));
    }
    assert_eq!(sink.stats().track(MediaKind::Video).late, 2);
    sink.finish(false);

    let finished = statuses
        .iter()
        .find(|(status, _)| *status == SinkStatus::Finished);
    assert!(finished.is_some());

    let contents = read_back(&path);
    assert_eq!(contents.samples(mp4::TrackType::Video), Some(5));
    assert_eq!(contents.samples(mp4::TrackType::Audio), None);
}

#[test]
fn mov_extension_writes_quicktime_brand() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("recording.mov");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        Some(WriterSettings::compressed()),
        None,
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    for millis in [0, 23, 46] {
        sink.append(audio_sample(millis));
    }
    sink.finish(false);
    let finished = statuses
        .iter()
        .find(|(status, _)| *status == SinkStatus::Finished);
    assert!(finished.is_some());

    let contents = read_back(&path);
    assert_eq!(contents.brand, "qt  ".parse().unwrap());
    assert_eq!(contents.samples(mp4::TrackType::Audio), Some(3));
}

#[test]
fn pcm_and_nv12_are_stored_uncompressed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("raw.mov");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        Some(WriterSettings::passthrough()),
        Some(VideoWriterSettings::new(false, 16, 16)),
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    for index in 0..10 {
        sink.append(nv12_sample(index, 30, 16, 16));
        sink.append(pcm_sample(index));
    }
    let stats = sink.stats();
    for kind in [MediaKind::Audio, MediaKind::Video] {
        assert_eq!(stats.track(kind).accepted, 10);
        assert_eq!(stats.track(kind).dropped(), 0);
    }
    sink.finish(false);
    wait_finished(&statuses);

    let mut reader = open_movie(&path);
    let audio = track_id(&reader, mp4::TrackType::Audio);
    let video = track_id(&reader, mp4::TrackType::Video);
    // One container sample per PCM frame.
    assert_eq!(reader.sample_count(audio).unwrap(), 10 * PCM_FRAMES as u32);
    assert_eq!(reader.sample_count(video).unwrap(), 10);
    assert_eq!(reader.tracks()[&audio].timescale(), 44_100);

    let frame = reader.read_sample(video, 4).unwrap().unwrap();
    assert_eq!(frame.bytes.len(), PixelFormat::Nv12.frame_size(16, 16));
    assert!(frame.bytes.iter().all(|&luma| luma == 3));
    let pcm = reader.read_sample(audio, 2).unwrap().unwrap();
    assert_eq!(&pcm.bytes[..], &pcm_sample(0).payload()[2..4]);

    let bytes = std::fs::read(&path).unwrap();
    for fourcc in [b"sowt", b"420v"] {
        assert!(bytes.windows(4).any(|window| window == fourcc));
    }
}

#[test]
fn pcm_is_encoded_to_aac_when_compression_is_requested() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.mp4");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        Some(WriterSettings::compressed()),
        None,
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    for index in 0..10 {
        sink.append(pcm_sample(index));
    }
    assert_eq!(sink.stats().track(MediaKind::Audio).accepted, 10);
    sink.finish(false);
    wait_finished(&statuses);

    let reference = AacEncoder::new(
        &AudioFormatDescription::linear_pcm(44_100, 1, 16),
        AAC_PRESET_BITRATE,
        AAC_PRESET_SAMPLE_RATE,
        AAC_PRESET_CHANNELS,
    )
    .unwrap();
    let reader = open_movie(&path);
    let id = track_id(&reader, mp4::TrackType::Audio);
    let track = &reader.tracks()[&id];
    let mp4a = track.trak.mdia.minf.stbl.stsd.mp4a.as_ref().unwrap();
    assert_eq!(mp4a.channelcount, 1);
    assert_eq!(track.timescale(), 44_100);
    // Every input frame plus the encoder delay is covered.
    let needed = 10 * PCM_FRAMES as u64 + reference.priming_frames() as u64;
    assert!(track.sample_count() as u64 * 1024 >= needed);
    // The media edit skips the encoder delay and presents exactly the input.
    assert_eq!(
        edits(&reader, mp4::TrackType::Audio),
        vec![(10 * PCM_FRAMES as u64 * 1000 / 44_100, reference.priming_frames() as u64)]
    );
}

#[test]
fn late_starting_track_is_offset_by_an_empty_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offset.mp4");
    let (callback, statuses) = status_channel();
    let mut sink = FileSink::new(
        &path,
        Some(WriterSettings::compressed()),
        Some(VideoWriterSettings::new(true, 320, 240)),
        &Mp4AssetWriterFactory::default(),
        callback,
    );
    let format = h264_format(320, 240);
    for frame in 0..30 {
        sink.append(video_sample(frame, 30, &format));
        if frame >= 15 {
            sink.append(audio_sample(frame * 1000 / 30));
        }
    }
    sink.finish(false);
    wait_finished(&statuses);

    let reader = open_movie(&path);
    let audio = edits(&reader, mp4::TrackType::Audio);
    assert_eq!(audio.len(), 2);
    assert_eq!(audio[0], (500, EMPTY_EDIT));
    assert_eq!(audio[1].1, 0);
    assert_eq!(edits(&reader, mp4::TrackType::Video), vec![(1000, 0)]);
}

#[test]
fn samples_before_the_session_are_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trimmed.mp4");
    let mut writer = Mp4AssetWriter::create(&path, FileType::Mpeg4).unwrap();
    let mut input = writer.add_input(MediaKind::Audio, None).unwrap();
    writer.start_writing().unwrap();
    writer.start_session(MediaTime::new(1, 1));

    input.append(audio_sample(500)).unwrap();
    assert_eq!(writer.samples_written(MediaKind::Audio), 0);
    for millis in [1000, 1023, 1046] {
        input.append(audio_sample(millis)).unwrap();
    }
    // The newest sample is held back until its duration is known.
    assert_eq!(writer.samples_written(MediaKind::Audio), 2);

    let (sender, done) = crossbeam_channel::bounded(1);
    writer.finish_writing(Box::new(move |status| {
        let _ = sender.send(status);
    }));
    assert_eq!(done.recv_timeout(FINISH_TIMEOUT).unwrap(), WriterStatus::Completed);

    let reader = open_movie(&path);
    assert_eq!(reader.tracks()[&1].sample_count(), 3);
    assert_eq!(edits(&reader, mp4::TrackType::Audio).len(), 1);
}

#[test]
fn raw_video_is_encoded_when_h264_is_requested() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("encoded.mp4");
    let (callback, statuses) = status_channel();
    let factory = Mp4AssetWriterFactory::with_session_factory(Arc::new(InlineEncoderFactory));
    let mut sink = FileSink::new(
        &path,
        None,
        Some(VideoWriterSettings::new(true, 16, 16)),
        &factory,
        callback,
    );
    for frame in 0..12 {
        sink.append(nv12_sample(frame, 30, 16, 16));
    }
    sink.finish(false);
    wait_finished(&statuses);

    let mut reader = open_movie(&path);
    let id = track_id(&reader, mp4::TrackType::Video);
    let track = &reader.tracks()[&id];
    let avc1 = track.trak.mdia.minf.stbl.stsd.avc1.as_ref().unwrap();
    assert_eq!((avc1.width, avc1.height), (16, 16));
    assert_eq!(avc1.avcc.sequence_parameter_sets[0].bytes, common::SPS);
    assert_eq!(track.sample_count(), 12);

    let sample = reader.read_sample(id, 7).unwrap().unwrap();
    assert!(sample.is_sync);
    assert_eq!(&sample.bytes[..], &[0, 0, 0, 2, 0x65, 6]);
}

#[test]
fn unavailable_encoder_stores_raw_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fallback.mov");
    let (callback, statuses) = status_channel();
    let factory =
        Mp4AssetWriterFactory::with_session_factory(Arc::new(UnsupportedSessionFactory));
    let mut sink = FileSink::new(
        &path,
        None,
        Some(VideoWriterSettings::new(true, 16, 16)),
        &factory,
        callback,
    );
    for frame in 0..5 {
        sink.append(nv12_sample(frame, 30, 16, 16));
    }
    assert_eq!(sink.stats().track(MediaKind::Video).append_failed, 0);
    sink.finish(false);
    wait_finished(&statuses);

    let contents = read_back(&path);
    assert_eq!(contents.samples(mp4::TrackType::Video), Some(5));
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.windows(4).any(|window| window == b"420v"));
}

#[test]
fn inputs_cannot_be_added_after_writing_starts() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer =
        Mp4AssetWriter::create(&dir.path().join("late.mp4"), FileType::Mpeg4).unwrap();
    writer.add_input(MediaKind::Audio, None).unwrap();
    assert!(writer.add_input(MediaKind::Audio, None).is_err());
    writer.start_writing().unwrap();
    assert!(writer.add_input(MediaKind::Video, None).is_err());
    assert!(writer.start_writing().is_err());
}
