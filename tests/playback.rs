//! Playback through an edit session: looping over a trim window, prefetch and
//! edits while playing.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use flipbook::config::AppConfig;
use flipbook::entities::{FrameSequence, ImageSource, TrimWindow};
use flipbook::{EditSession, PlayDirection};

const TICK: Duration = Duration::from_millis(101);

fn session(n: usize) -> EditSession {
    let sources = (0..n).map(|i| ImageSource::solid([i as u8 * 10, 0, 0, 255], 16, 16)).collect();
    let seq = FrameSequence::from_images(sources, Duration::from_millis(100 * n as u64));
    let mut config = AppConfig {
        workers: Some(2),
        ..Default::default()
    };
    config.cache.reserve_gb = 0.0;
    EditSession::new(seq, config).unwrap()
}

/// Tick `count` times, one frame interval apart, collecting index changes.
fn run(session: &mut EditSession, start: Instant, count: u32) -> Vec<usize> {
    (1..=count).filter_map(|k| session.tick(start + TICK * k)).collect()
}

#[test]
fn test_loops_inside_trim_window() {
    let mut s = session(10);
    let t0 = Instant::now();
    {
        let (player, seq) = s.player_mut();
        let window = TrimWindow::new(Duration::from_millis(300), Duration::from_millis(600)).unwrap();
        player.set_trim(seq, Some(window));
        player.play(seq, t0);
    }
    assert_eq!(s.player().current_index(), 3);
    assert_eq!(run(&mut s, t0, 6), vec![4, 5, 6, 3, 4, 5]);
}

#[test]
fn test_backward_without_loop_stops_at_start() {
    let mut s = session(5);
    let t0 = Instant::now();
    {
        let (player, seq) = s.player_mut();
        player.seek(seq, Duration::from_millis(200));
        player.set_direction(PlayDirection::Backward);
        player.set_loop_enabled(false);
        player.play(seq, t0);
    }
    assert_eq!(run(&mut s, t0, 4), vec![1, 0]);
    assert!(s.player().is_paused());
}

#[test]
fn test_edit_while_playing_keeps_position_valid() {
    let mut s = session(6);
    let t0 = Instant::now();
    {
        let (player, seq) = s.player_mut();
        player.seek(seq, Duration::from_millis(500));
        player.play(seq, t0);
    }
    s.edit(|seq| {
        seq.set_active(4, false)?;
        seq.set_active(5, false)
    })
    .unwrap();

    // 4 active frames left; position pulled back into range
    assert!(s.player().current_index() < 4);
    assert!(!s.player().is_paused());
    let steps = run(&mut s, t0, 8);
    assert!(steps.iter().all(|&i| i < 4));
}

#[test]
fn test_playback_request_prefetches_ahead() {
    let mut s = session(10);
    let got = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&got);
    s.request_current_frame(Box::new(move |r| *sink.borrow_mut() = Some(r.map(|img| img.width()))))
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while s.retriever().playback_cache().len() < 10 && Instant::now() < deadline {
        s.retriever_mut().wait(Duration::from_millis(50));
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(*got.borrow(), Some(Ok(16))));
    assert_eq!(s.retriever().playback_cache().len(), 10);
}

#[test]
fn test_thumbnail_requests_use_general_cache() {
    let mut s = session(4);
    let got = Rc::new(RefCell::new(Vec::new()));
    for i in 0..4 {
        let sink = Rc::clone(&got);
        s.request_image(
            i,
            Some(flipbook::entities::PixelSize::square(8)),
            Box::new(move |r| sink.borrow_mut().push(r.map(|img| img.width()).ok())),
        )
        .unwrap();
    }
    s.retriever_mut().wait(Duration::from_secs(5));

    assert_eq!(got.borrow().len(), 4);
    assert!(got.borrow().iter().all(|w| *w == Some(8)));
    assert_eq!(s.retriever().general_cache().len(), 4);
    assert!(s.retriever().playback_cache().is_empty());
}
