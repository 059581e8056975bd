mod clock;
mod node;
mod sequencer;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use thiserror::Error;
use uuid::Uuid;

pub use clock::{Anchors, ClockState, NodeClock};
pub use node::{PcmNode, PcmSnapshot, ScoreNode, ScoreSnapshot};
pub use sequencer::{NodeHandle, RenderStatus, Sequencer, SequencerRenderer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequencerError {
    #[error("invalid audio format: sample rate {sample_rate}, max frames {max_frames}")]
    InvalidFormat { sample_rate: u32, max_frames: usize },
    #[error("node not found: {0:?}")]
    NodeNotFound(NodeHandle),
}

#[derive(Debug, Default)]
pub struct Transport {
    is_playing: AtomicBool,
    is_loop: AtomicBool,
    duration_samples: AtomicI64,
    start_offset: AtomicI64,
    position: AtomicI64,
}

impl Transport {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing.load(Ordering::Acquire)
    }

    pub(crate) fn set_playing(&self, is_playing: bool) {
        self.is_playing.store(is_playing, Ordering::Release);
    }

    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.is_loop.load(Ordering::Acquire)
    }

    pub fn set_loop(&self, is_loop: bool) {
        self.is_loop.store(is_loop, Ordering::Release);
    }

    #[must_use]
    pub fn duration_samples(&self) -> i64 {
        self.duration_samples.load(Ordering::Acquire)
    }

    pub fn set_duration_samples(&self, samples: i64) {
        self.duration_samples.store(samples.max(0), Ordering::Release);
    }

    #[must_use]
    pub fn start_offset(&self) -> i64 {
        self.start_offset.load(Ordering::Acquire)
    }

    pub(crate) fn set_start_offset(&self, samples: i64) {
        self.start_offset.store(samples.max(0), Ordering::Release);
    }

    #[must_use]
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn set_position(&self, samples: i64) {
        self.position.store(samples, Ordering::Release);
    }

    #[must_use]
    pub fn loop_length(&self) -> Option<i64> {
        let duration = self.duration_samples();
        (self.is_loop() && duration > 0).then_some(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderWindow {
    pub host_sample_time: i64,
    pub frames: usize,
    pub start_offset: i64,
    pub loop_length: Option<i64>,
    pub fade: i64,
}

impl RenderWindow {
    #[must_use]
    pub fn timeline(&self, host: i64, anchor: i64) -> (i64, i64) {
        let position = host - anchor + self.start_offset;
        match self.loop_length {
            Some(length) => (position.rem_euclid(length), position.div_euclid(length)),
            None => (position, 0),
        }
    }

    #[must_use]
    pub fn track_gain(&self, timeline: i64) -> f64 {
        match self.loop_length {
            Some(length) if self.fade > 0 => {
                let fade = self.fade as f64;
                let head = timeline as f64 / fade;
                let tail = (length - timeline) as f64 / fade;
                head.min(tail).clamp(0.0, 1.0)
            }
            _ => 1.0,
        }
    }
}

/// A pull-model graph node. Implementations must not block or allocate in
/// [`render`](Self::render).
pub trait MixNode: Send + Sync {
    fn id(&self) -> Uuid;

    fn clock(&self) -> &NodeClock;

    fn render(&self, window: &RenderWindow, left: &mut [f32], right: &mut [f32]) -> bool;

    fn content_end(&self) -> i64;
}
