//! Asynchronous frame retrieval with two bounded caches
//!
//! **Why**: Decoding happens on `Workers`, but callers (preview loop, thumbnail
//! grid) live on one consumer thread and must see results there, in order,
//! never after they cancelled.
//!
//! # Flow
//!
//! 1. `request_*` checks the cache; a hit invokes the callback immediately.
//! 2. A miss schedules a decode job under the current epoch and records the
//!    callback as pending.
//! 3. The job sends its result over a channel.
//! 4. `pump()` (consumer thread) inserts into the cache and invokes the callback
//!    only if the request is still pending.
//!
//! `cancel()` forgets the callback, so a late result is cached but not
//! delivered. `invalidate()` bumps the epoch: queued jobs are skipped, results
//! already in the channel are dropped, both caches are cleared.
//!
//! # Caches
//!
//! - **playback**: keyed by image identity, warmed `prefetch_window` frames
//!   ahead in the play direction
//! - **general**: keyed by `ThumbKey` (frame index + optional target size)

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use log::{debug, trace, warn};

use crate::core::cache_man::CacheManager;
use crate::core::frame_cache::BoundedCache;
use crate::core::player::PlayDirection;
use crate::core::workers::Workers;
use crate::entities::frame::ImageSource;
use crate::entities::geometry::PixelSize;
use crate::entities::sequence::FrameSequence;
use crate::error::{EditError, FrameError};

/// Handle returned by every request, usable with `cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

/// General cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThumbKey {
    pub index: usize,
    pub size: Option<PixelSize>,
}

pub type ImageResult = Result<Arc<RgbaImage>, FrameError>;

/// Invoked on the consumer thread.
pub type Callback = Box<dyn FnOnce(ImageResult)>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheSlot {
    Playback(ImageSource),
    General(ThumbKey),
}

struct Completion {
    /// None for prefetch
    id: Option<RequestId>,
    slot: CacheSlot,
    epoch: u64,
    result: ImageResult,
}

/// Sizes for the two caches and the prefetch window.
#[derive(Debug, Clone, Copy)]
pub struct RetrieverSettings {
    pub playback_capacity: usize,
    pub general_capacity: usize,
    pub prefetch_window: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            playback_capacity: 10,
            general_capacity: 50,
            prefetch_window: 9,
        }
    }
}

fn decode(source: &ImageSource, target: Option<PixelSize>) -> ImageResult {
    let image = source.load()?;
    let image = match target {
        Some(size) if (size.width, size.height) != image.dimensions() => {
            imageops::resize(&image, size.width.max(1), size.height.max(1), FilterType::Triangle)
        }
        _ => image,
    };
    Ok(Arc::new(image))
}

pub struct FrameRetriever {
    workers: Arc<Workers>,
    manager: Arc<CacheManager>,
    playback: Arc<BoundedCache<ImageSource>>,
    general: Arc<BoundedCache<ThumbKey>>,
    pending: HashMap<RequestId, Callback>,
    /// Prefetch jobs not yet completed, to avoid re-queueing the same frame every tick
    in_flight: HashSet<CacheSlot>,
    next_id: u64,
    tx: Sender<Completion>,
    rx: Receiver<Completion>,
    prefetch_window: usize,
}

impl FrameRetriever {
    pub fn new(workers: Arc<Workers>, manager: Arc<CacheManager>, settings: RetrieverSettings) -> Self {
        let (tx, rx) = unbounded();
        debug!(
            "FrameRetriever: playback={} general={} prefetch={}",
            settings.playback_capacity, settings.general_capacity, settings.prefetch_window
        );
        Self {
            playback: Arc::new(BoundedCache::new(
                "playback",
                settings.playback_capacity,
                Arc::clone(&manager),
            )),
            general: Arc::new(BoundedCache::new(
                "general",
                settings.general_capacity,
                Arc::clone(&manager),
            )),
            workers,
            manager,
            pending: HashMap::new(),
            in_flight: HashSet::new(),
            next_id: 0,
            tx,
            rx,
            prefetch_window: settings.prefetch_window,
        }
    }

    pub fn playback_cache(&self) -> &BoundedCache<ImageSource> {
        &self.playback
    }

    pub fn general_cache(&self) -> &BoundedCache<ThumbKey> {
        &self.general
    }

    /// Number of callbacks still waiting for delivery.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn next_request_id(&mut self) -> RequestId {
        self.next_id += 1;
        RequestId(self.next_id)
    }

    /// Image of frame `index` (any frame, active or not), optionally resized.
    pub fn request_image(
        &mut self,
        seq: &FrameSequence,
        index: usize,
        target: Option<PixelSize>,
        callback: Callback,
    ) -> Result<RequestId, EditError> {
        let frame = seq.frames().get(index).ok_or(EditError::IndexOutOfRange {
            index,
            len: seq.len(),
        })?;
        let id = self.next_request_id();
        let key = ThumbKey { index, size: target };

        if let Some(image) = self.general.get(&key) {
            trace!("General cache hit: {:?}", key);
            callback(Ok(image));
            return Ok(id);
        }

        self.pending.insert(id, callback);
        self.schedule(Some(id), CacheSlot::General(key), frame.image.clone(), target);
        Ok(id)
    }

    /// Image of the active frame `active_index` for playback, plus best-effort
    /// prefetch of the next frames in `direction` (wrapping).
    pub fn request_playback(
        &mut self,
        seq: &FrameSequence,
        active_index: usize,
        direction: PlayDirection,
        callback: Callback,
    ) -> Result<RequestId, EditError> {
        let frame = seq.active_frame(active_index).ok_or(EditError::IndexOutOfRange {
            index: active_index,
            len: seq.active_count(),
        })?;
        let id = self.next_request_id();
        let source = frame.image.clone();

        match self.playback.get(&source) {
            Some(image) => {
                trace!("Playback cache hit: active {}", active_index);
                callback(Ok(image));
            }
            None => {
                self.pending.insert(id, callback);
                self.schedule(Some(id), CacheSlot::Playback(source.clone()), source, None);
            }
        }

        self.prefetch(seq, active_index, direction);
        Ok(id)
    }

    fn prefetch(&mut self, seq: &FrameSequence, from: usize, direction: PlayDirection) {
        let count = seq.active_count();
        if count < 2 {
            return;
        }
        let window = self.prefetch_window.min(count - 1);
        let mut queued = 0;
        for step in 1..=window {
            let idx = match direction {
                PlayDirection::Forward => (from + step) % count,
                PlayDirection::Backward => (from + count - step % count) % count,
            };
            let Some(frame) = seq.active_frame(idx) else {
                continue;
            };
            let slot = CacheSlot::Playback(frame.image.clone());
            if self.in_flight.contains(&slot) || self.playback.contains(&frame.image) {
                continue;
            }
            self.in_flight.insert(slot.clone());
            self.schedule(None, slot, frame.image.clone(), None);
            queued += 1;
        }
        if queued > 0 {
            trace!("Prefetch from active {} ({:?}): {} queued", from, direction, queued);
        }
    }

    fn schedule(&self, id: Option<RequestId>, slot: CacheSlot, source: ImageSource, target: Option<PixelSize>) {
        let epoch = self.manager.current_epoch();
        let tx = self.tx.clone();
        let playback = Arc::clone(&self.playback);
        let general = Arc::clone(&self.general);

        self.workers.execute_with_epoch(epoch, move || {
            // Check before decode: another request may have filled the slot
            let cached = match &slot {
                CacheSlot::Playback(key) => playback.get(key),
                CacheSlot::General(key) => general.get(key),
            };
            let result = match cached {
                Some(image) => Ok(image),
                None => decode(&source, target),
            };
            let _ = tx.send(Completion { id, slot, epoch, result });
        });
    }

    /// Stop delivery for `id`. Returns false if it was already delivered or cancelled.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        let removed = self.pending.remove(&id).is_some();
        if removed {
            trace!("Request {:?} cancelled", id);
        }
        removed
    }

    /// Drop everything: queued jobs, undelivered results, pending callbacks and
    /// both caches.
    pub fn invalidate(&mut self) {
        let epoch = self.manager.increment_epoch();
        let dropped = self.pending.len();
        self.pending.clear();
        self.in_flight.clear();
        while self.rx.try_recv().is_ok() {}
        self.playback.clear();
        self.general.clear();
        debug!("FrameRetriever invalidated (epoch {}, {} callbacks dropped)", epoch, dropped);
    }

    fn complete(&mut self, completion: Completion) -> bool {
        let Completion { id, slot, epoch, result } = completion;
        self.in_flight.remove(&slot);
        if epoch != self.manager.current_epoch() {
            return false;
        }

        match &result {
            Ok(image) => match &slot {
                CacheSlot::Playback(key) => self.playback.insert(key.clone(), Arc::clone(image)),
                CacheSlot::General(key) => self.general.insert(*key, Arc::clone(image)),
            },
            Err(e) if id.is_none() => warn!("Prefetch failed: {}", e),
            Err(_) => {}
        }

        match id.and_then(|id| self.pending.remove(&id)) {
            Some(callback) => {
                callback(result);
                true
            }
            None => false,
        }
    }

    /// Deliver every completed result. Call from the consumer thread.
    /// Returns the number of callbacks invoked.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(completion) = self.rx.try_recv() {
            if self.complete(completion) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Pump until no callback is pending or `timeout` elapses.
    pub fn wait(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut delivered = self.pump();
        while !self.pending.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(completion) => {
                    if self.complete(completion) {
                        delivered += 1;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn retriever(settings: RetrieverSettings) -> FrameRetriever {
        let manager = Arc::new(CacheManager::with_limit(usize::MAX));
        let workers = Arc::new(Workers::new(2, manager.epoch_ref()).unwrap());
        FrameRetriever::new(workers, manager, settings)
    }

    fn seq(n: usize) -> FrameSequence {
        let sources = (0..n).map(|i| ImageSource::solid([i as u8, 0, 0, 255], 8, 8)).collect();
        FrameSequence::from_images(sources, Duration::from_millis(100 * n as u64))
    }

    type Log = Rc<RefCell<Vec<ImageResult>>>;

    fn recorder(log: &Log) -> Callback {
        let log = Rc::clone(log);
        Box::new(move |r| log.borrow_mut().push(r))
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn test_request_image_delivers_resized() {
        let s = seq(3);
        let mut r = retriever(RetrieverSettings::default());
        let log: Log = Rc::default();
        r.request_image(&s, 1, Some(PixelSize::new(4, 2)), recorder(&log)).unwrap();
        assert_eq!(r.wait(WAIT), 1);

        let got = log.borrow();
        let img = got[0].as_ref().unwrap();
        assert_eq!(img.dimensions(), (4, 2));
        assert_eq!(img.get_pixel(0, 0).0[0], 1);
    }

    #[test]
    fn test_cache_hit_is_synchronous() {
        let s = seq(3);
        let mut r = retriever(RetrieverSettings::default());
        let log: Log = Rc::default();
        r.request_image(&s, 0, None, recorder(&log)).unwrap();
        r.wait(WAIT);
        assert_eq!(log.borrow().len(), 1);

        r.request_image(&s, 0, None, recorder(&log)).unwrap();
        // Delivered without pumping
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_cancelled_request_never_delivered() {
        let s = seq(3);
        let mut r = retriever(RetrieverSettings::default());
        let log: Log = Rc::default();
        let id = r.request_image(&s, 2, None, recorder(&log)).unwrap();
        assert!(r.cancel(id));
        assert!(!r.cancel(id));

        std::thread::sleep(Duration::from_millis(50));
        r.pump();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_invalidate_drops_callbacks_and_caches() {
        let s = seq(3);
        let mut r = retriever(RetrieverSettings::default());
        let log: Log = Rc::default();
        r.request_image(&s, 0, None, recorder(&log)).unwrap();
        r.wait(WAIT);
        r.request_image(&s, 1, None, recorder(&log)).unwrap();
        r.invalidate();

        std::thread::sleep(Duration::from_millis(50));
        r.pump();
        assert_eq!(log.borrow().len(), 1);
        assert!(r.general_cache().is_empty());
        assert_eq!(r.pending_count(), 0);
    }

    #[test]
    fn test_playback_prefetch_warms_ahead() {
        let s = seq(20);
        let mut r = retriever(RetrieverSettings {
            playback_capacity: 10,
            general_capacity: 50,
            prefetch_window: 3,
        });
        let log: Log = Rc::default();
        r.request_playback(&s, 5, PlayDirection::Forward, recorder(&log)).unwrap();
        r.wait(WAIT);

        // Prefetch results arrive without callbacks
        let deadline = Instant::now() + WAIT;
        while r.playback_cache().len() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            r.pump();
        }
        for i in 5..=8 {
            let src = &s.active_frame(i).unwrap().image;
            assert!(r.playback_cache().contains(src), "frame {} not cached", i);
        }
        assert!(!r.playback_cache().contains(&s.active_frame(4).unwrap().image));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_backward_prefetch_wraps() {
        let s = seq(6);
        let mut r = retriever(RetrieverSettings {
            playback_capacity: 10,
            general_capacity: 10,
            prefetch_window: 2,
        });
        let log: Log = Rc::default();
        r.request_playback(&s, 0, PlayDirection::Backward, recorder(&log)).unwrap();
        r.wait(WAIT);
        let deadline = Instant::now() + WAIT;
        while r.playback_cache().len() < 3 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
            r.pump();
        }
        assert!(r.playback_cache().contains(&s.active_frame(5).unwrap().image));
        assert!(r.playback_cache().contains(&s.active_frame(4).unwrap().image));
    }

    #[test]
    fn test_decode_failure_reaches_callback() {
        let s = FrameSequence::from_images(
            vec![ImageSource::Disk("/definitely/missing/frame.png".into())],
            Duration::from_secs(1),
        );
        let mut r = retriever(RetrieverSettings::default());
        let log: Log = Rc::default();
        r.request_image(&s, 0, None, recorder(&log)).unwrap();
        r.wait(WAIT);
        assert!(log.borrow()[0].is_err());
    }

    #[test]
    fn test_out_of_range() {
        let s = seq(2);
        let mut r = retriever(RetrieverSettings::default());
        let err = r.request_image(&s, 7, None, Box::new(|_| {})).unwrap_err();
        assert_eq!(err, EditError::IndexOutOfRange { index: 7, len: 2 });
    }
}
