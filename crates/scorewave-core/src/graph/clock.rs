use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

const UNSET: i64 = i64::MIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockState {
    Stopped,
    Playing,
    Paused,
}

impl ClockState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Playing,
            2 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Stopped => 0,
            Self::Playing => 1,
            Self::Paused => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchors {
    pub start: i64,
    pub end: Option<i64>,
}

impl Anchors {
    #[must_use]
    pub fn playing_gain(&self, host: i64, fade: i64) -> f64 {
        if fade <= 0 {
            return if self.end.is_some_and(|end| host >= end) {
                0.0
            } else {
                1.0
            };
        }
        let fade_in = ((host - self.start) as f64 / fade as f64).clamp(0.0, 1.0);
        let fade_out = self.end.map_or(1.0, |end| {
            (1.0 - (host - end) as f64 / fade as f64).clamp(0.0, 1.0)
        });
        fade_in.min(fade_out)
    }
}

/// Lock-free transport state for one mix node.
///
/// The UI thread calls [`start`](Self::start), [`begin_pause`](Self::begin_pause)
/// and [`stop`](Self::stop); the audio thread calls [`latch`](Self::latch)
/// once per callback. Every field is a single atomic, so the render callback
/// reads either the old or the new value, never a torn one.
#[derive(Debug)]
pub struct NodeClock {
    state: AtomicU8,
    pausing: AtomicBool,
    start_sample_time: AtomicI64,
    end_sample_time: AtomicI64,
}

impl Default for NodeClock {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ClockState::Stopped.as_u8()),
            pausing: AtomicBool::new(false),
            start_sample_time: AtomicI64::new(UNSET),
            end_sample_time: AtomicI64::new(UNSET),
        }
    }
}

impl NodeClock {
    #[must_use]
    pub fn state(&self) -> ClockState {
        ClockState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_pausing(&self) -> bool {
        self.pausing.load(Ordering::Acquire)
    }

    pub fn start(&self) {
        self.start_sample_time.store(UNSET, Ordering::Release);
        self.end_sample_time.store(UNSET, Ordering::Release);
        self.pausing.store(false, Ordering::Release);
        self.state
            .store(ClockState::Playing.as_u8(), Ordering::Release);
    }

    #[must_use]
    pub fn start_anchor(&self) -> Option<i64> {
        let value = self.start_sample_time.load(Ordering::Acquire);
        (value != UNSET).then_some(value)
    }

    /// Enters `Playing` sharing another clock's start anchor, so both map
    /// host time onto the same timeline. With `None` the next render latches
    /// the anchor as in [`start`](Self::start).
    pub fn start_at(&self, anchor: Option<i64>) {
        self.start();
        if let Some(anchor) = anchor {
            self.start_sample_time.store(anchor, Ordering::Release);
        }
    }

    /// Requests a fade-out. Only ever moves the pausing flag from false to
    /// true; repeated calls are no-ops. Returns whether this call made the
    /// transition.
    pub fn begin_pause(&self) -> bool {
        if self.state() != ClockState::Playing {
            return false;
        }
        self.pausing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn stop(&self) {
        self.state
            .store(ClockState::Stopped.as_u8(), Ordering::Release);
        self.pausing.store(false, Ordering::Release);
        self.start_sample_time.store(UNSET, Ordering::Release);
        self.end_sample_time.store(UNSET, Ordering::Release);
    }

    pub fn latch(&self, host: i64) -> Option<Anchors> {
        if self.state() != ClockState::Playing {
            return None;
        }

        let start = match self.start_sample_time.compare_exchange(
            UNSET,
            host,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => host,
            Err(existing) => existing,
        };

        let end = if self.is_pausing() {
            match self.end_sample_time.compare_exchange(
                UNSET,
                host,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => Some(host),
                Err(existing) => Some(existing),
            }
        } else {
            None
        };

        Some(Anchors { start, end })
    }

    pub fn settle(&self, anchors: Anchors, callback_end: i64, fade: i64) {
        if let Some(end) = anchors.end
            && callback_end >= end + fade
        {
            let _ = self.state.compare_exchange(
                ClockState::Playing.as_u8(),
                ClockState::Paused.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            self.pausing.store(false, Ordering::Release);
        }
    }
}
