//! Edit session: owns everything one editing session touches
//!
//! **Why**: No process-wide singletons. The sequence, caches, worker pool,
//! player and overlays live here and are passed explicitly to whatever
//! needs them.
//!
//! # Snapshots
//!
//! The sequence is held as `Arc<FrameSequence>`. `edit()` works on a private
//! copy and swaps it in only on success, so an export that captured the
//! previous `Arc` keeps reading a complete, unchanging sequence.
//!
//! # Lifecycle
//!
//! `on_session_end()` cancels running exports/calibrations, drops every
//! queued retrieval and pending callback, and clears both caches.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::cache_man::CacheManager;
use crate::core::cancel::CancelToken;
use crate::core::player::Player;
use crate::core::retriever::{Callback, FrameRetriever, RequestId};
use crate::core::workers::Workers;
use crate::entities::geometry::PixelSize;
use crate::entities::overlay::Overlay;
use crate::entities::sequence::FrameSequence;
use crate::error::{EditError, ExportError};
use crate::export::calibrate::{Calibration, GeneratorProbe, SizeCalibrator};
use crate::export::compositor::{ExportReport, ExportRequest, GifGenerator, sample_count};
use crate::export::config::{Destination, ExportConfig, SizePreset};
use crate::export::encoder::{EncoderFactory, GifEncoderFactory, OutputTarget};
use crate::export::source::{FrameSource, SequenceSource};

/// Result of a calibrated export.
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub calibration: Calibration,
    pub report: ExportReport,
}

pub struct EditSession {
    config: AppConfig,
    seq: Arc<FrameSequence>,
    manager: Arc<CacheManager>,
    retriever: FrameRetriever,
    player: Player,
    overlays: Vec<Overlay>,
    cancel: CancelToken,
    factory: Arc<dyn EncoderFactory>,
}

impl EditSession {
    /// Start a session over `seq`. Spawns the worker pool.
    pub fn new(seq: FrameSequence, config: AppConfig) -> io::Result<Self> {
        let manager = Arc::new(CacheManager::new(config.cache.mem_fraction, config.cache.reserve_gb));
        let threads = config.workers.unwrap_or_else(Workers::default_threads);
        let workers = Arc::new(Workers::new(threads, manager.epoch_ref())?);
        let retriever = FrameRetriever::new(workers, Arc::clone(&manager), config.cache.retriever_settings());
        let factory: Arc<dyn EncoderFactory> = Arc::new(GifEncoderFactory {
            quantize_speed: config.export.quantize_speed,
        });

        info!(
            "Session started: {} frames ({} active), {:?}",
            seq.len(),
            seq.active_count(),
            seq.duration()
        );

        Ok(Self {
            config,
            seq: Arc::new(seq),
            manager,
            retriever,
            player: Player::new(),
            overlays: Vec::new(),
            cancel: CancelToken::new(),
            factory,
        })
    }

    pub fn with_encoder_factory(mut self, factory: Arc<dyn EncoderFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current sequence snapshot.
    pub fn sequence(&self) -> &Arc<FrameSequence> {
        &self.seq
    }

    pub fn cache_manager(&self) -> &CacheManager {
        &self.manager
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // === Editing ===

    /// Apply `f` to a copy of the sequence and commit it only if `f` succeeds.
    ///
    /// On commit, cached images are invalidated and the player re-validates its
    /// position against the new sequence.
    pub fn edit<R, F>(&mut self, f: F) -> Result<R, EditError>
    where
        F: FnOnce(&mut FrameSequence) -> Result<R, EditError>,
    {
        let mut scratch = (*self.seq).clone();
        let result = f(&mut scratch)?;
        self.seq = Arc::new(scratch);
        self.retriever.invalidate();
        self.player.resync(&self.seq, Instant::now());
        debug!(
            "Edit committed: {} frames ({} active)",
            self.seq.len(),
            self.seq.active_count()
        );
        Ok(result)
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    pub fn add_overlay(&mut self, overlay: Overlay) -> Uuid {
        let id = overlay.id;
        self.overlays.push(overlay);
        id
    }

    pub fn remove_overlay(&mut self, id: Uuid) -> Option<Overlay> {
        let pos = self.overlays.iter().position(|o| o.id == id)?;
        Some(self.overlays.remove(pos))
    }

    /// Overlays shown at `t`, in drawing order.
    pub fn visible_overlays(&self, t: Duration) -> Vec<&Overlay> {
        self.overlays.iter().filter(|o| o.visible_at(t)).collect()
    }

    // === Playback ===

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> (&mut Player, &FrameSequence) {
        (&mut self.player, &*self.seq)
    }

    /// Drive playback from the host loop. Returns the new active index when it changed.
    pub fn tick(&mut self, now: Instant) -> Option<usize> {
        self.player.update(&self.seq, now)
    }

    /// Request the image under the playhead (with prefetch in the play direction).
    pub fn request_current_frame(&mut self, callback: Callback) -> Result<RequestId, EditError> {
        self.retriever.request_playback(
            &self.seq,
            self.player.current_index(),
            self.player.direction(),
            callback,
        )
    }

    /// Request a (thumbnail) image of frame `index`.
    pub fn request_image(
        &mut self,
        index: usize,
        target: Option<PixelSize>,
        callback: Callback,
    ) -> Result<RequestId, EditError> {
        self.retriever.request_image(&self.seq, index, target, callback)
    }

    pub fn retriever(&self) -> &FrameRetriever {
        &self.retriever
    }

    pub fn retriever_mut(&mut self) -> &mut FrameRetriever {
        &mut self.retriever
    }

    // === Export ===

    /// Capture everything an export needs. The job owns the current snapshot,
    /// so later edits do not affect it; it can run on another thread.
    ///
    /// Session overlays are always composited, below the request's own overlays.
    pub fn prepare_export(
        &self,
        mut request: ExportRequest,
        destination: Destination,
        preset: SizePreset,
        target: OutputTarget,
    ) -> ExportJob {
        if !self.overlays.is_empty() {
            let own = std::mem::take(&mut request.overlays);
            request.overlays = self.overlays.iter().cloned().chain(own).collect();
        }
        ExportJob {
            seq: Arc::clone(&self.seq),
            request,
            destination,
            preset,
            target,
            factory: Arc::clone(&self.factory),
            cancel: self.cancel.clone(),
            config: self.config.clone(),
            require_budget: false,
        }
    }

    /// Calibrate and export on the current snapshot, session overlays included.
    pub fn export(
        &self,
        request: ExportRequest,
        destination: Destination,
        preset: SizePreset,
        target: OutputTarget,
    ) -> Result<ExportOutcome, ExportError> {
        self.prepare_export(request, destination, preset, target).run()
    }

    /// Export with a config chosen by the caller, skipping calibration.
    pub fn export_with_config(
        &self,
        request: &ExportRequest,
        config: &ExportConfig,
        target: &OutputTarget,
    ) -> Result<ExportReport, ExportError> {
        let source = SequenceSource::new(Arc::clone(&self.seq));
        self.generator_for(&self.config).generate(&source, request, config, target)
    }

    fn generator_for(&self, config: &AppConfig) -> GifGenerator {
        GifGenerator::new(Arc::clone(&self.factory))
            .with_cancel(self.cancel.clone())
            .with_chunk_size(config.export.chunk_size)
    }

    // === Lifecycle ===

    /// Cancel all in-flight work and drop every cached image.
    pub fn on_session_end(&mut self) {
        self.cancel.cancel();
        self.retriever.invalidate();
        self.player.pause();
        info!("Session ended");
    }
}

/// A self-contained export: snapshot, request, destination and output.
pub struct ExportJob {
    seq: Arc<FrameSequence>,
    request: ExportRequest,
    destination: Destination,
    preset: SizePreset,
    target: OutputTarget,
    factory: Arc<dyn EncoderFactory>,
    cancel: CancelToken,
    config: AppConfig,
    require_budget: bool,
}

impl ExportJob {
    pub fn sequence(&self) -> &Arc<FrameSequence> {
        &self.seq
    }

    pub fn request(&self) -> &ExportRequest {
        &self.request
    }

    /// Fail with `BudgetUnattainable` instead of exporting the fallback config.
    pub fn require_budget(mut self, required: bool) -> Self {
        self.require_budget = required;
        self
    }

    /// Calibrate against the destination budget, then run the full export.
    pub fn run(self) -> Result<ExportOutcome, ExportError> {
        let generator = self.generator();
        let source = SequenceSource::new(Arc::clone(&self.seq));
        let mut calibration = self.calibrate_with(&generator, &source)?;
        if self.require_budget {
            calibration = calibration.ensure_within_budget()?;
        }
        let report = generator.generate(&source, &self.request, &calibration.config, &self.target)?;
        Ok(ExportOutcome { calibration, report })
    }

    /// Calibration only: which config the budget allows, without writing output.
    pub fn calibrate(&self) -> Result<Calibration, ExportError> {
        let source = SequenceSource::new(Arc::clone(&self.seq));
        self.calibrate_with(&self.generator(), &source)
    }

    fn generator(&self) -> GifGenerator {
        GifGenerator::new(Arc::clone(&self.factory))
            .with_cancel(self.cancel.clone())
            .with_chunk_size(self.config.export.chunk_size)
    }

    fn calibrate_with(&self, generator: &GifGenerator, source: &SequenceSource) -> Result<Calibration, ExportError> {
        if !self.request.trim.is_valid_for(&self.seq) {
            return Err(ExportError::InvalidConfig(format!(
                "trim window {:?}..{:?} outside sequence of {:?}",
                self.request.trim.left(),
                self.request.trim.right(),
                self.seq.duration()
            )));
        }

        let source_size = source
            .source_size()
            .map_err(|e| ExportError::InvalidConfig(format!("cannot read source frame: {}", e)))?;
        let initial = ExportConfig::initial(
            &self.destination,
            self.request.crop,
            source_size,
            self.request.speed,
            self.config.export.output_fps,
        )?;
        let total = sample_count(&self.request.trim, initial.samples_per_second);

        let probe = GeneratorProbe {
            generator,
            source,
            request: &self.request,
        };
        SizeCalibrator::new(probe, self.config.calibration)
            .with_cancel(self.cancel.clone())
            .calibrate(initial, total, &self.destination, self.preset)
    }
}
