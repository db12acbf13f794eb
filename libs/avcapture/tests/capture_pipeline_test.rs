// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Capture sources driven by the synthetic devices, end to end.

mod common;

use parking_lot::Mutex;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use avcapture::{
    AudioCaptureSource, CaptureOption, CaptureOutput, CaptureService, CaptureSession,
    CaptureSource, DeviceFormat, MediaKind, MediaTime, Mp4AssetWriterFactory, PixelFormat,
    RecordingConfig, RecordingController, SinkStatus, TestPatternCamera, TestToneMicrophone,
    TimedSample, UnsupportedSessionFactory, VideoCaptureSource,
};
use common::{status_channel, InlineEncoderFactory, RecordingWriterFactory, PPS, SPS};

const DEADLINE: Duration = Duration::from_secs(10);

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < DEADLINE {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct Collector {
    samples: Mutex<Vec<TimedSample>>,
    geometry: Mutex<Vec<(u32, u32)>>,
}

impl Collector {
    fn count(&self, kind: MediaKind) -> usize {
        self.samples.lock().iter().filter(|s| s.kind() == kind).count()
    }
}

impl CaptureOutput for Collector {
    fn on_sample(&self, sample: TimedSample) {
        self.samples.lock().push(sample);
    }

    fn on_video_geometry(&self, width: u32, height: u32) {
        self.geometry.lock().push((width, height));
    }
}

fn small_camera() -> TestPatternCamera {
    TestPatternCamera::new().with_formats(vec![DeviceFormat::Video {
        width: 64,
        height: 48,
        max_frame_rate: 30,
        pixel_format: PixelFormat::Nv12,
    }])
}

#[test]
fn raw_video_and_audio_reach_the_output_in_order() {
    let session = CaptureSession::new()
        .with_device(Arc::new(small_camera().unpaced().with_max_frames(45)))
        .with_device(Arc::new(TestToneMicrophone::default().unpaced().with_max_buffers(20)));
    let collector = Arc::new(Collector::default());
    let mut service = CaptureService::new(session)
        .with_source(Box::new(VideoCaptureSource::new()))
        .with_source(Box::new(AudioCaptureSource::new()));
    service.set_output(collector.clone());

    assert!(service.start().unwrap());
    assert!(service.is_running());
    assert!(wait_until(|| {
        collector.count(MediaKind::Video) == 45 && collector.count(MediaKind::Audio) == 20
    }));
    service.stop();
    assert!(!service.is_running());

    assert_eq!(*collector.geometry.lock(), vec![(64, 48)]);
    let samples = collector.samples.lock();
    for kind in [MediaKind::Video, MediaKind::Audio] {
        let pts: Vec<_> = samples.iter().filter(|s| s.kind() == kind).map(|s| s.pts()).collect();
        assert!(pts.windows(2).all(|pair| pair[0] < pair[1]), "{kind} out of order");
    }
    let video = samples.iter().find(|s| s.kind() == MediaKind::Video).unwrap();
    assert_eq!(video.payload().len(), PixelFormat::Nv12.frame_size(64, 48));
    assert!(!video.format().unwrap().is_compressed());
}

#[test]
fn encoded_video_publishes_parameter_sets() {
    let mut session = CaptureSession::new().with_device(Arc::new(
        small_camera().unpaced().with_max_frames(10),
    ));
    let collector = Arc::new(Collector::default());
    let mut source = VideoCaptureSource::with_session_factory(Arc::new(InlineEncoderFactory));
    source.apply_option(CaptureOption::EncodeVideo(true));
    source.set_output(collector.clone());

    assert!(source.configure(&mut session).unwrap());
    source.start().unwrap();
    assert!(wait_until(|| collector.count(MediaKind::Video) == 10));
    source.stop();

    let sets = source.parameter_sets().unwrap();
    assert_eq!(sets.sps().map(|b| &b[..]), Some(SPS));
    assert_eq!(sets.pps().map(|b| &b[..]), Some(PPS));
    let samples = collector.samples.lock();
    assert!(samples.iter().all(|s| s.format().is_some_and(|f| f.is_compressed())));
}

#[test]
fn unavailable_encoder_falls_back_to_raw_video() {
    let mut session = CaptureSession::new().with_device(Arc::new(
        small_camera().unpaced().with_max_frames(5),
    ));
    let collector = Arc::new(Collector::default());
    let mut source = VideoCaptureSource::with_session_factory(Arc::new(UnsupportedSessionFactory));
    source.apply_option(CaptureOption::EncodeVideo(true));
    source.set_output(collector.clone());

    assert!(source.configure(&mut session).unwrap());
    source.start().unwrap();
    assert!(wait_until(|| collector.count(MediaKind::Video) == 5));
    source.stop();

    assert!(source.parameter_sets().is_none());
    assert!(collector
        .samples
        .lock()
        .iter()
        .all(|s| s.format().is_some_and(|f| !f.is_compressed())));
}

#[test]
fn recording_controller_records_live_capture() {
    let factory = RecordingWriterFactory::default();
    let dir = tempfile::tempdir().unwrap();
    let config = RecordingConfig::default()
        .with_output_dir(dir.path())
        .with_compression(false, false);
    let controller = Arc::new(RecordingController::new(config, Arc::new(factory.clone())).unwrap());

    let session = CaptureSession::new()
        .with_device(Arc::new(small_camera()))
        .with_device(Arc::new(TestToneMicrophone::default()));
    let mut service = CaptureService::new(session)
        .with_source(Box::new(VideoCaptureSource::new()))
        .with_source(Box::new(AudioCaptureSource::new()));
    service.set_output(controller.clone());
    assert!(service.start().unwrap());

    controller.set_recording(true).unwrap();
    assert!(wait_until(|| {
        let log = factory.log.lock();
        !log.appended_pts(MediaKind::Video).is_empty()
            && !log.appended_pts(MediaKind::Audio).is_empty()
    }));
    service.stop();
    controller.set_recording(false).unwrap();
    controller.flush();

    let log = factory.log.lock();
    assert_eq!(log.created, vec![dir.path().join("recording.mov")]);
    assert_eq!(log.inputs, vec![(MediaKind::Audio, None), (MediaKind::Video, None)]);
    assert_eq!(log.finish_calls, 1);
    assert!(log.session_start.is_some());
}

/// Forwards to a recording controller, noting every sample forwarded while a
/// recording is active. Holding `forwarded` keeps the recording state fixed.
struct RecordingTee {
    controller: Arc<RecordingController>,
    forwarded: Mutex<Vec<(MediaKind, MediaTime)>>,
}

impl RecordingTee {
    fn count(&self, kind: MediaKind) -> usize {
        self.forwarded.lock().iter().filter(|(k, _)| *k == kind).count()
    }
}

impl CaptureOutput for RecordingTee {
    fn on_sample(&self, sample: TimedSample) {
        let mut forwarded = self.forwarded.lock();
        if self.controller.is_recording() {
            forwarded.push((sample.kind(), sample.pts()));
        }
        self.controller.on_sample(sample);
    }

    fn on_video_geometry(&self, width: u32, height: u32) {
        self.controller.on_video_geometry(width, height);
    }
}

/// Milliseconds of the leading empty edit, 0 when the track starts at once.
fn leading_gap_ms(track: &mp4::Mp4Track) -> u64 {
    let entries = track
        .trak
        .edts
        .as_ref()
        .and_then(|edts| edts.elst.as_ref())
        .map(|elst| elst.entries.as_slice())
        .unwrap_or_default();
    match entries {
        [gap, _] if gap.media_time == u32::MAX as u64 => gap.segment_duration,
        _ => 0,
    }
}

fn open_movie(path: &Path) -> mp4::Mp4Reader<BufReader<File>> {
    let file = File::open(path).unwrap();
    let size = file.metadata().unwrap().len();
    mp4::Mp4Reader::read_header(BufReader::new(file), size).unwrap()
}

#[test]
fn default_recording_of_live_capture_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let (listener, statuses) = status_channel();
    let config = RecordingConfig::default().with_output_dir(dir.path());
    let controller = Arc::new(
        RecordingController::new(config, Arc::new(Mp4AssetWriterFactory::default()))
            .unwrap()
            .with_listener(listener),
    );
    let tee = Arc::new(RecordingTee {
        controller: Arc::clone(&controller),
        forwarded: Mutex::default(),
    });

    let session = CaptureSession::new()
        .with_device(Arc::new(small_camera()))
        .with_device(Arc::new(TestToneMicrophone::default()));
    let mut service = CaptureService::new(session)
        .with_source(Box::new(VideoCaptureSource::new()))
        .with_source(Box::new(AudioCaptureSource::new()));
    service.set_output(tee.clone());
    assert!(service.start().unwrap());
    std::thread::sleep(Duration::from_millis(100));

    {
        let _forwarding = tee.forwarded.lock();
        controller.set_recording(true).unwrap();
    }
    assert!(wait_until(|| {
        tee.count(MediaKind::Video) >= 15 && tee.count(MediaKind::Audio) >= 15
    }));
    {
        let _forwarding = tee.forwarded.lock();
        controller.set_recording(false).unwrap();
    }
    service.stop();
    controller.flush();

    let finished = statuses
        .iter()
        .map(|(status, _)| status)
        .find(|status| *status == SinkStatus::Finished || status.is_failure());
    assert_eq!(finished, Some(SinkStatus::Finished));

    // The first forwarded sample opens the session; earlier samples of the
    // other kind are dropped, so each track starts at its first later sample.
    let forwarded = tee.forwarded.lock();
    let session_start = forwarded[0].1;
    let first = |kind: MediaKind| {
        forwarded
            .iter()
            .find(|(k, pts)| *k == kind && *pts >= session_start)
            .map(|(_, pts)| *pts)
            .unwrap()
    };
    let expected_gap_ms = |kind: MediaKind| {
        first(kind).checked_sub(&session_start).unwrap().seconds() * 1000.0
    };

    let reader = open_movie(&dir.path().join("recording.mov"));
    assert_eq!(reader.major_brand(), &"qt  ".parse().unwrap());
    let track = |track_type: mp4::TrackType| {
        reader
            .tracks()
            .values()
            .find(|track| track.track_type().unwrap() == track_type)
            .unwrap()
    };

    let audio = track(mp4::TrackType::Audio);
    assert!(audio.sample_count() > 0);
    assert!(audio.trak.mdia.minf.stbl.stsd.mp4a.is_some());
    let gap = leading_gap_ms(audio) as f64;
    assert!((gap - expected_gap_ms(MediaKind::Audio)).abs() <= 1.0);

    let video = track(mp4::TrackType::Video);
    assert!(video.sample_count() > 0);
    let gap = leading_gap_ms(video) as f64;
    assert!((gap - expected_gap_ms(MediaKind::Video)).abs() <= 1.0);
}

#[test]
fn reconfigure_applies_new_options() {
    let session = CaptureSession::new().with_device(Arc::new(
        TestPatternCamera::new().unpaced().with_max_frames(3),
    ));
    let collector = Arc::new(Collector::default());
    let mut service =
        CaptureService::new(session).with_source(Box::new(VideoCaptureSource::new()));
    service.set_output(collector.clone());

    assert!(service.start().unwrap());
    assert!(wait_until(|| collector.count(MediaKind::Video) == 3));

    service.apply_option(
        MediaKind::Video,
        CaptureOption::FrameDimensions {
            width: 640,
            height: 480,
        },
    );
    service.reconfigure().unwrap();
    assert!(service.is_running());
    assert!(wait_until(|| collector.count(MediaKind::Video) == 6));
    service.stop();

    assert_eq!(*collector.geometry.lock(), vec![(1280, 720), (640, 480)]);
}
