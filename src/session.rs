//! Frame delivery and the per-frame tracking loop around a [`Tracker`]

use crate::config::SessionConfig;
use crate::logging::{new_correlation_id, FrameSpan, TrackingMetrics};
use crate::pipeline::Extraction;
use crate::tracker::{ExtractFailure, Tracker};
use crate::utils::image_conversion::scale_image;
use image::GrayImage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

struct Slot {
    frame: Option<GrayImage>,
    consumer_turn: bool,
}

/// Single-writer/single-reader frame exchange.
///
/// The capture side may only write when the consumer has taken the previous
/// frame, and never waits: if the slot is busy the frame is dropped.
pub struct FrameHandoff {
    slot: Mutex<Slot>,
}

impl Default for FrameHandoff {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameHandoff {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                consumer_turn: false,
            }),
        }
    }

    /// Hand a captured frame over. Returns false if the frame was dropped.
    pub fn offer(&self, frame: GrayImage) -> bool {
        let Some(mut slot) = self.slot.try_lock() else {
            return false;
        };
        if slot.consumer_turn {
            return false;
        }
        slot.frame = Some(frame);
        slot.consumer_turn = true;
        true
    }

    /// Take the pending frame, if the capture side has delivered one
    pub fn take(&self) -> Option<GrayImage> {
        let mut slot = self.slot.lock();
        if !slot.consumer_turn {
            return None;
        }
        slot.consumer_turn = false;
        slot.frame.take()
    }

    pub fn has_pending(&self) -> bool {
        self.slot.lock().consumer_turn
    }
}

/// Result of one tracking step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    NoFrame,
    Tracked(Box<Extraction>),
    Lost(Option<ExtractFailure>),
}

impl StepOutcome {
    pub fn is_tracked(&self) -> bool {
        matches!(self, StepOutcome::Tracked(_))
    }
}

/// Owns a trained tracker and drives it with handed-off frames
pub struct TrackingSession {
    tracker: Tracker,
    handoff: Arc<FrameHandoff>,
    config: SessionConfig,
    frame_index: u64,
    last_frame: Option<GrayImage>,
    last_extraction: Option<Extraction>,
    metrics: TrackingMetrics,
}

impl TrackingSession {
    pub fn new(tracker: Tracker, config: SessionConfig) -> Self {
        Self {
            tracker,
            handoff: Arc::new(FrameHandoff::new()),
            config,
            frame_index: 0,
            last_frame: None,
            last_extraction: None,
            metrics: TrackingMetrics::new(),
        }
    }

    /// Shared handle for the capture side
    pub fn handoff(&self) -> Arc<FrameHandoff> {
        Arc::clone(&self.handoff)
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    pub fn last_frame(&self) -> Option<&GrayImage> {
        self.last_frame.as_ref()
    }

    /// Most recent successful extraction, kept across lost frames
    pub fn last_extraction(&self) -> Option<&Extraction> {
        self.last_extraction.as_ref()
    }

    pub fn metrics(&self) -> &TrackingMetrics {
        &self.metrics
    }

    /// Process the pending frame, if any
    pub fn step(&mut self) -> StepOutcome {
        match self.handoff.take() {
            Some(frame) => self.process_frame(frame),
            None => StepOutcome::NoFrame,
        }
    }

    /// Analyze and extract one frame directly, bypassing the handoff
    pub fn process_frame(&mut self, frame: GrayImage) -> StepOutcome {
        self.frame_index += 1;
        let correlation_id = new_correlation_id();
        let span = FrameSpan::new(self.frame_index, correlation_id);
        let _guard = span.span().enter();

        let frame = scale_image(&frame, self.config.frame_scale);
        self.last_frame = Some(frame.clone());

        self.tracker.analyze_gray(frame);
        let scene_keypoints = self.tracker.scene().map_or(0, |s| s.keypoints().len());
        span.record_analysis(scene_keypoints, self.tracker.matches().len());

        match self.tracker.extract(self.config.refine_depth) {
            Some(extraction) => {
                let elapsed_ms = span.record_result(true, None);
                self.metrics.record_success(elapsed_ms);
                self.last_extraction = Some(extraction.clone());
                StepOutcome::Tracked(Box::new(extraction))
            }
            None => {
                let failure = self.tracker.last_failure().cloned();
                let label = failure.as_ref().map_or("unknown", |f| f.label());
                let elapsed_ms = span.record_result(false, Some(label));
                self.metrics.record_failure(label, elapsed_ms);
                debug!(frame = self.frame_index, reason = label, "frame lost");
                StepOutcome::Lost(failure)
            }
        }
    }
}
