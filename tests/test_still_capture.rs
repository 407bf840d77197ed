//! Integration tests for single-shot still capture
//!
//! Runs the whole controller on the recording platform: node setup, the
//! still-to-encoder connection, buffer recycling through the encoder output
//! pool, metadata tags and the destination handling.

mod common;

use std::time::Duration;

use common::assertions::{assert_jpeg, assert_jpeg_file, tags};
use common::mock_platform::{EncoderFault, RecordingPlatform, SensorFault};
use common::test_configs::{small_config, SMALL_HEIGHT, SMALL_WIDTH};
use still_capture::config::{BufferRequest, CameraControl, ImageEffect};
use still_capture::{capture_still_with, ImageEncoding, StillConfig, StillSession};
use still_encode::jpeg;

#[test]
fn test_single_shot_waits_for_timeout_and_writes_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let platform = RecordingPlatform::new();
    let config = small_config(dir.path(), "still.jpg");

    let summary = capture_still_with(config, platform.clone()).unwrap();

    assert_eq!(platform.sleeps(), vec![Duration::from_millis(5000)]);
    assert_eq!(summary.frames_attempted, 1);
    assert_eq!(summary.frames_captured, 1);
    assert_eq!(summary.files, vec![dir.path().join("still.jpg")]);
    let bytes = assert_jpeg_file(&dir.path().join("still.jpg"), SMALL_WIDTH, SMALL_HEIGHT);
    assert_eq!(bytes.len() as u64, summary.bytes_written);
}

#[test]
fn test_single_small_buffer_is_recycled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "recycled.jpg");
    config.width = 1296;
    config.height = 972;
    config.set_quality(100);
    config.encoder_buffers = BufferRequest { count: Some(1), size: Some(16 * 1024) };

    let mut session = StillSession::builder()
        .config(config)
        .platform(RecordingPlatform::new())
        .build()
        .unwrap();
    let summary = session.run().unwrap();

    assert_eq!(summary.frames_captured, 1);
    assert_eq!(session.pool_stats(), Some((1, 1)));
    let bytes = assert_jpeg_file(&dir.path().join("recycled.jpg"), 1296, 972);
    assert_eq!(bytes.len() as u64, summary.bytes_written);
}

#[test]
fn test_tags_follow_system_tags_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let platform = RecordingPlatform::new();
    let mut config = small_config(dir.path(), "tags.jpg");
    config.add_exif_tag("EXIF.UserComment=A");
    config.add_exif_tag("IFD0.Artist=B");
    config.add_exif_tag("IFD0.Copyright=C");

    capture_still_with(config, platform).unwrap();

    let bytes = assert_jpeg_file(&dir.path().join("tags.jpg"), SMALL_WIDTH, SMALL_HEIGHT);
    assert_eq!(
        tags(&bytes),
        vec![
            "IFD0.Model=RP_OV5647",
            "IFD0.Make=RaspberryPi",
            "EXIF.DateTimeDigitized=2024:06:01:12:30:45",
            "EXIF.DateTimeOriginal=2024:06:01:12:30:45",
            "EXIF.UserComment=A",
            "IFD0.Artist=B",
            "IFD0.Copyright=C",
        ]
    );
}

#[test]
fn test_bad_tag_does_not_abort_frame() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "badtag.jpg");
    config.add_exif_tag("no separator");
    config.add_exif_tag("EXIF.UserComment=kept");

    let summary = capture_still_with(config, RecordingPlatform::new()).unwrap();

    assert_eq!(summary.frames_captured, 1);
    let bytes = assert_jpeg_file(&dir.path().join("badtag.jpg"), SMALL_WIDTH, SMALL_HEIGHT);
    let written = tags(&bytes);
    assert_eq!(written.len(), 5);
    assert_eq!(written[4], "EXIF.UserComment=kept");
}

#[test]
fn test_quality_above_maximum_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "q.jpg");
    config.set_quality(150);
    assert_eq!(config.quality, 100);

    let summary = capture_still_with(config, RecordingPlatform::new()).unwrap();
    assert_eq!(summary.frames_captured, 1);
}

#[test]
fn test_out_of_range_quality_set_directly_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "direct.jpg");
    config.quality = 150;

    let mut session = StillSession::builder()
        .config(config)
        .platform(RecordingPlatform::new())
        .build()
        .unwrap();
    assert_eq!(session.config().quality, 100);

    let summary = session.run().unwrap();
    assert_eq!(summary.frames_captured, 1);
    assert_jpeg_file(&dir.path().join("direct.jpg"), SMALL_WIDTH, SMALL_HEIGHT);
}

#[test]
fn test_stdout_output_is_only_image_bytes() {
    let platform = RecordingPlatform::new();
    let mut config = StillConfig {
        width: SMALL_WIDTH,
        height: SMALL_HEIGHT,
        output: Some("-".to_string()),
        verbose: true,
        ..StillConfig::default()
    };
    config.preview.want_preview = false;
    assert!(!config.effective_verbose());

    let summary = capture_still_with(config, platform.clone()).unwrap();

    assert_eq!(summary.frames_captured, 1);
    assert!(summary.files.is_empty());
    assert!(platform.opened().is_empty());
    let bytes = platform.stdout.bytes();
    assert_jpeg(&bytes, SMALL_WIDTH, SMALL_HEIGHT);
    assert_eq!(bytes.len() as u64, summary.bytes_written);
}

#[test]
fn test_raw_capture_appends_bayer_block() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "raw.jpg");
    config.want_raw = true;

    capture_still_with(config, RecordingPlatform::new()).unwrap();

    let bytes = assert_jpeg_file(&dir.path().join("raw.jpg"), SMALL_WIDTH, SMALL_HEIGHT);
    let (_, raw) = jpeg::split_raw_block(&bytes);
    assert_eq!(raw.map(<[u8]>::len), Some((SMALL_WIDTH * SMALL_HEIGHT) as usize));
}

#[test]
fn test_thumbnail_embedded_unless_disabled() {
    let dir = tempfile::tempdir().unwrap();
    capture_still_with(small_config(dir.path(), "thumb.jpg"), RecordingPlatform::new()).unwrap();
    let bytes = std::fs::read(dir.path().join("thumb.jpg")).unwrap();
    let thumbnail = jpeg::read_thumbnail(&bytes).expect("thumbnail missing");
    let decoded = image::load_from_memory(thumbnail).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 48));

    let mut config = small_config(dir.path(), "nothumb.jpg");
    config.thumbnail = still_capture::config::parse_thumbnail("none");
    capture_still_with(config, RecordingPlatform::new()).unwrap();
    let bytes = std::fs::read(dir.path().join("nothumb.jpg")).unwrap();
    assert!(jpeg::read_thumbnail(&bytes).is_none());
}

#[test]
fn test_other_encodings() {
    let dir = tempfile::tempdir().unwrap();
    for encoding in [ImageEncoding::Png, ImageEncoding::Bmp, ImageEncoding::Gif] {
        let name = format!("still.{encoding}");
        let mut config = small_config(dir.path(), &name);
        config.encoding = encoding;
        let summary = capture_still_with(config, RecordingPlatform::new()).unwrap();
        assert_eq!(summary.frames_captured, 1, "{encoding}");

        let decoded = image::open(dir.path().join(&name)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (SMALL_WIDTH, SMALL_HEIGHT));
    }
}

#[test]
fn test_camera_controls_reach_sensor() {
    let dir = tempfile::tempdir().unwrap();
    let platform = RecordingPlatform::new();
    let mut config = small_config(dir.path(), "neg.jpg");
    config.camera.image_effect = ImageEffect::Negative;
    config.camera.brightness = 70;

    capture_still_with(config, platform.clone()).unwrap();

    let applied = platform.applied();
    assert!(applied.contains(&CameraControl::Effect(ImageEffect::Negative)));
    assert!(applied.contains(&CameraControl::Brightness(70)));
}

#[test]
fn test_no_output_captures_nothing() {
    let platform = RecordingPlatform::new();
    let mut config = StillConfig { width: SMALL_WIDTH, height: SMALL_HEIGHT, ..StillConfig::default() };
    config.preview.want_preview = false;

    let summary = capture_still_with(config, platform.clone()).unwrap();

    assert_eq!(summary.frames_attempted, 1);
    assert_eq!(summary.frames_captured, 0);
    assert!(platform.opened().is_empty());
}

#[test]
fn test_sensor_failure_fails_frame_without_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let platform = RecordingPlatform::with_sensor_fault(SensorFault::Capture);

    let summary = capture_still_with(small_config(dir.path(), "x.jpg"), platform).unwrap();

    assert_eq!(summary.frames_failed, 1);
    assert_eq!(summary.frames_captured, 0);
    assert!(summary.files.is_empty());
}

#[test]
fn test_encode_failure_fails_frame() {
    let dir = tempfile::tempdir().unwrap();
    let platform = RecordingPlatform::with_encoder_fault(EncoderFault::Encode);

    let summary = capture_still_with(small_config(dir.path(), "x.jpg"), platform).unwrap();

    assert_eq!(summary.frames_failed, 1);
    assert_eq!(summary.frames_captured, 0);
}

#[test]
fn test_preview_connected_when_wanted() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config(dir.path(), "preview.jpg");
    config.preview.want_preview = true;

    let mut session = StillSession::builder()
        .config(config)
        .platform(RecordingPlatform::new())
        .build()
        .unwrap();
    let summary = session.run().unwrap();

    assert_eq!(summary.frames_captured, 1);
    assert_eq!(session.graph().node_count(), 0);
    assert_eq!(session.graph().connection_count(), 0);
}
