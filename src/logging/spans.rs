//! Per-frame tracing span
//!
//! One span per processed frame, carrying the correlation id and the
//! feature/match counts that explain why tracking succeeded or was lost.

use instant::Instant;
use tracing::field::Empty;
use tracing::{span, Level, Span};
use uuid::Uuid;

/// Span covering analysis and extraction of one frame
pub struct FrameSpan {
    span: Span,
    start_time: Instant,
}

impl FrameSpan {
    pub fn new(frame_index: u64, correlation_id: Uuid) -> Self {
        let span = span!(
            Level::INFO,
            "frame",
            frame = frame_index,
            correlation_id = %correlation_id,
            scene_keypoints = Empty,
            matches = Empty,
            tracked = Empty,
            elapsed_ms = Empty
        );

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn record_analysis(&self, scene_keypoints: usize, matches: usize) {
        self.span.record("scene_keypoints", scene_keypoints);
        self.span.record("matches", matches);
    }

    /// Record the outcome and return the elapsed time in milliseconds
    pub fn record_result(&self, tracked: bool, failure: Option<&str>) -> f64 {
        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        self.span.record("tracked", tracked);
        self.span.record("elapsed_ms", elapsed_ms);

        match failure {
            Some(reason) => tracing::debug!(parent: &self.span, reason, "target lost"),
            None => tracing::debug!(parent: &self.span, "target tracked"),
        }
        elapsed_ms
    }
}
