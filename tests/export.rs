//! End-to-end export over frames stored on disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flipbook::config::AppConfig;
use flipbook::entities::{FrameSequence, ImageSource, NormRect, Overlay, TextStyle, TrimWindow};
use flipbook::export::{Destination, EncodedOutput, ExportRequest, OutputTarget, SizePreset, Verdict};
use flipbook::{EditSession, ExportError};
use image::{Rgba, RgbaImage};

/// Write `n` 48x32 frames: flat background with a moving block.
fn write_frames(dir: &Path, n: usize) -> Vec<PathBuf> {
    (0..n)
        .map(|i| {
            let mut img = RgbaImage::from_pixel(48, 32, Rgba([30, 60, 90, 255]));
            let x0 = (i as u32 * 3) % 40;
            for y in 8..24 {
                for x in x0..x0 + 8 {
                    img.put_pixel(x, y, Rgba([230, 200, 40, 255]));
                }
            }
            let path = dir.join(format!("frame_{:03}.png", i));
            img.save(&path).unwrap();
            path
        })
        .collect()
}

fn session_over(paths: Vec<PathBuf>) -> EditSession {
    let duration = Duration::from_millis(100 * paths.len() as u64);
    let seq = FrameSequence::from_images(paths.into_iter().map(ImageSource::Disk).collect(), duration);
    let config = AppConfig {
        workers: Some(2),
        ..Default::default()
    };
    EditSession::new(seq, config).unwrap()
}

fn count_gif_frames(bytes: &[u8]) -> usize {
    let mut decoder = gif::DecodeOptions::new().read_info(bytes).unwrap();
    let mut count = 0;
    while decoder.read_next_frame().unwrap().is_some() {
        count += 1;
    }
    count
}

#[test]
fn test_sticker_export_to_file() {
    let frames = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let session = session_over(write_frames(frames.path(), 12));
    let dest = out_dir.path().join("sticker.gif");

    let request = ExportRequest::new(TrimWindow::full(session.sequence()));
    let outcome = session
        .export(request, Destination::Sticker, SizePreset::Large, OutputTarget::File(dest.clone()))
        .unwrap();

    assert!(outcome.calibration.is_accepted());
    assert_eq!(outcome.report.config.pixel_size.width, 320);
    assert_eq!(outcome.report.frames_written, 12);
    assert_eq!(outcome.report.frames_dropped, 0);

    let bytes = fs::read(&dest).unwrap();
    assert_eq!(bytes.len() as u64, outcome.report.output.byte_len());
    assert!(bytes.len() as u64 <= outcome.calibration.budget);
    assert_eq!(count_gif_frames(&bytes), 12);

    // Only the finished file remains, no partial temp file
    let names: Vec<_> = fs::read_dir(out_dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names, vec![std::ffi::OsString::from("sticker.gif")]);
}

#[test]
fn test_trimmed_reverse_export_with_overlays() {
    let frames = tempfile::tempdir().unwrap();
    let mut session = session_over(write_frames(frames.path(), 10));
    let sticker_path = frames.path().join("sticker.png");
    RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 200])).save(&sticker_path).unwrap();

    let overlay_window = TrimWindow::new(Duration::from_millis(300), Duration::from_millis(600)).unwrap();
    session.add_overlay(Overlay::sticker(
        ImageSource::Disk(sticker_path),
        NormRect::new(0.1, 0.1, 0.3, 0.3),
        overlay_window,
    ));
    session.add_overlay(Overlay::text(
        TextStyle::new("hi"),
        NormRect::new(0.05, 0.7, 0.9, 0.25),
        overlay_window,
    ));

    let mut request =
        ExportRequest::new(TrimWindow::new(Duration::from_millis(200), Duration::from_millis(700)).unwrap());
    request.direction = flipbook::PlayDirection::Backward;
    let outcome = session
        .export(request, Destination::Message, SizePreset::Medium, OutputTarget::Memory)
        .unwrap();

    // 0.5 s at 10 fps, both ends included
    assert_eq!(outcome.report.frames_written, 6);
    assert_eq!(outcome.report.delay, Duration::from_millis(100));
    assert_eq!(outcome.report.config.pixel_size.width, 400);
}

#[test]
fn test_same_input_same_bytes() {
    let frames = tempfile::tempdir().unwrap();
    let session = session_over(write_frames(frames.path(), 8));
    let run = || {
        let request = ExportRequest::new(TrimWindow::full(session.sequence()));
        session
            .export(request, Destination::Sticker, SizePreset::Small, OutputTarget::Memory)
            .unwrap()
            .report
            .output
    };
    assert_eq!(run(), run());
}

#[test]
fn test_missing_frame_is_dropped_not_fatal() {
    let frames = tempfile::tempdir().unwrap();
    let mut paths = write_frames(frames.path(), 6);
    fs::remove_file(&paths[3]).unwrap();
    paths[3] = frames.path().join("frame_003.png");
    let session = session_over(paths);

    let request = ExportRequest::new(TrimWindow::full(session.sequence()));
    let outcome = session
        .export(request, Destination::Sticker, SizePreset::Large, OutputTarget::Memory)
        .unwrap();
    assert_eq!(outcome.report.frames_written, 5);
    assert_eq!(outcome.report.frames_dropped, 1);
}

#[test]
fn test_missing_first_frame_is_dropped_not_fatal() {
    let frames = tempfile::tempdir().unwrap();
    let paths = write_frames(frames.path(), 6);
    fs::remove_file(frames.path().join("frame_000.png")).unwrap();
    let session = session_over(paths);

    let request = ExportRequest::new(TrimWindow::full(session.sequence()));
    let outcome = session
        .export(request, Destination::Sticker, SizePreset::Large, OutputTarget::Memory)
        .unwrap();
    assert!(outcome.calibration.is_accepted());
    assert_eq!(outcome.report.frames_written, 5);
    assert_eq!(outcome.report.frames_dropped, 1);
    match &outcome.report.output {
        EncodedOutput::Memory(bytes) => assert_eq!(count_gif_frames(bytes), 5),
        other => panic!("expected in-memory output, got {:?}", other),
    }
}

#[test]
fn test_session_end_cancels_export() {
    let frames = tempfile::tempdir().unwrap();
    let out_dir = tempfile::tempdir().unwrap();
    let mut session = session_over(write_frames(frames.path(), 6));
    let dest = out_dir.path().join("never.gif");
    let job = session.prepare_export(
        ExportRequest::new(TrimWindow::full(session.sequence())),
        Destination::Share,
        SizePreset::Large,
        OutputTarget::File(dest.clone()),
    );

    session.on_session_end();
    let err = job.run().unwrap_err();
    assert!(matches!(err, ExportError::Cancelled));
    assert!(!dest.exists());
}

#[test]
fn test_calibrate_only_reports_rounds() {
    let frames = tempfile::tempdir().unwrap();
    let session = session_over(write_frames(frames.path(), 10));
    let calibration = session
        .prepare_export(
            ExportRequest::new(TrimWindow::full(session.sequence())),
            Destination::Share,
            SizePreset::Large,
            OutputTarget::Memory,
        )
        .calibrate()
        .unwrap();

    assert_eq!(calibration.verdict, Verdict::Accepted { round: 0 });
    assert_eq!(calibration.rounds.len(), 1);
    assert!(calibration.rounds[0].estimate <= calibration.budget);
}
