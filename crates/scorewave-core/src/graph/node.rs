use std::sync::Arc;

use arc_swap::ArcSwap;
use uuid::Uuid;

use super::{Anchors, MixNode, NodeClock, RenderWindow};
use crate::{
    mixdown::{LoopVoice, ScoreTrack, TrackMixBuffer},
    model::PcmClip,
    time::seconds_to_samples,
};

/// Walks the frames of one callback. `frame` receives the output index, the
/// wrapped timeline sample, the loop cycle and the combined fade gain, and
/// returns whether anything audible was read.
fn for_each_frame(
    window: &RenderWindow,
    clock: &NodeClock,
    mut frame: impl FnMut(usize, i64, i64, f64) -> bool,
) -> bool {
    let Some(anchors) = clock.latch(window.host_sample_time) else {
        return true;
    };

    let mut audible = false;
    for index in 0..window.frames {
        let host = window.host_sample_time + index as i64;
        let playing = anchors.playing_gain(host, window.fade);
        if playing == 0.0 && anchors.end.is_some_and(|end| host >= end) {
            break;
        }
        let (timeline, cycle) = window.timeline(host, anchors.start);
        let gain = playing * window.track_gain(timeline);
        audible |= frame(index, timeline, cycle, gain);
    }

    settle(clock, anchors, window);
    !audible
}

fn settle(clock: &NodeClock, anchors: Anchors, window: &RenderWindow) {
    clock.settle(
        anchors,
        window.host_sample_time + window.frames as i64,
        window.fade,
    );
}

fn zero(left: &mut [f32], right: &mut [f32]) {
    left.fill(0.0);
    right.fill(0.0);
}

#[derive(Debug, Clone)]
pub struct ScoreSnapshot {
    pub mix: Arc<TrackMixBuffer>,
    pub loops: Vec<LoopVoice>,
    pub gain: f64,
}

impl ScoreSnapshot {
    #[must_use]
    pub fn of(track: &ScoreTrack) -> Self {
        Self {
            mix: track.mix_buffer(),
            loops: track.loop_voices().to_vec(),
            gain: 1.0,
        }
    }

    fn frame_at(&self, timeline: i64) -> Option<(f64, f64)> {
        let mut frame = self.mix.frame_at(timeline);
        for voice in &self.loops {
            if let Some((left, right)) = voice.frame_at(timeline) {
                let (l, r) = frame.unwrap_or((0.0, 0.0));
                frame = Some((l + left, r + right));
            }
        }
        frame
    }
}

pub struct ScoreNode {
    id: Uuid,
    clock: NodeClock,
    snapshot: ArcSwap<ScoreSnapshot>,
}

impl ScoreNode {
    #[must_use]
    pub fn new(id: Uuid, snapshot: ScoreSnapshot) -> Self {
        Self {
            id,
            clock: NodeClock::default(),
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    #[must_use]
    pub fn from_track(track: &ScoreTrack) -> Self {
        Self::new(track.id(), ScoreSnapshot::of(track))
    }

    pub fn publish(&self, snapshot: ScoreSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<ScoreSnapshot> {
        self.snapshot.load_full()
    }
}

impl MixNode for ScoreNode {
    fn id(&self) -> Uuid {
        self.id
    }

    fn clock(&self) -> &NodeClock {
        &self.clock
    }

    fn render(&self, window: &RenderWindow, left: &mut [f32], right: &mut [f32]) -> bool {
        zero(left, right);
        let snapshot = self.snapshot.load();
        let frames = window.frames.min(left.len()).min(right.len());
        let window = RenderWindow { frames, ..*window };

        for_each_frame(&window, &self.clock, |index, timeline, cycle, gain| {
            let mut audible = false;
            let mut add = |(l, r): (f64, f64)| {
                left[index] += (l * gain * snapshot.gain) as f32;
                right[index] += (r * gain * snapshot.gain) as f32;
                audible = true;
            };
            if let Some(frame) = snapshot.frame_at(timeline) {
                add(frame);
            }
            if let Some(length) = window.loop_length
                && cycle > 0
                && let Some(frame) = snapshot.mix.frame_at(timeline + length)
            {
                add(frame);
            }
            audible
        })
    }

    fn content_end(&self) -> i64 {
        self.snapshot.load().mix.end_sample()
    }
}

#[derive(Debug, Clone)]
pub struct PcmSnapshot {
    pub clip: Arc<PcmClip>,
    pub start_sample: i64,
}

impl PcmSnapshot {
    #[must_use]
    pub fn new(clip: PcmClip) -> Self {
        let start_sample = seconds_to_samples(clip.start_sec, clip.sample_rate);
        Self {
            clip: Arc::new(clip),
            start_sample,
        }
    }

    fn frame_at(&self, timeline: i64) -> Option<(f64, f64)> {
        let index = usize::try_from(timeline - self.start_sample).ok()?;
        if index >= self.clip.frame_count() {
            return None;
        }
        Some((
            f64::from(self.clip.left[index]) * self.clip.gain,
            f64::from(self.clip.right[index]) * self.clip.gain,
        ))
    }

    fn end_sample(&self) -> i64 {
        self.start_sample + self.clip.frame_count() as i64
    }
}

pub struct PcmNode {
    id: Uuid,
    clock: NodeClock,
    snapshot: ArcSwap<PcmSnapshot>,
}

impl PcmNode {
    #[must_use]
    pub fn new(clip: PcmClip) -> Self {
        Self {
            id: clip.id,
            clock: NodeClock::default(),
            snapshot: ArcSwap::from_pointee(PcmSnapshot::new(clip)),
        }
    }

    pub fn publish(&self, clip: PcmClip) {
        self.snapshot.store(Arc::new(PcmSnapshot::new(clip)));
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.snapshot.load().clip.sample_rate
    }
}

impl MixNode for PcmNode {
    fn id(&self) -> Uuid {
        self.id
    }

    fn clock(&self) -> &NodeClock {
        &self.clock
    }

    fn render(&self, window: &RenderWindow, left: &mut [f32], right: &mut [f32]) -> bool {
        zero(left, right);
        let snapshot = self.snapshot.load();
        let frames = window.frames.min(left.len()).min(right.len());
        let window = RenderWindow { frames, ..*window };

        for_each_frame(&window, &self.clock, |index, timeline, cycle, gain| {
            let mut audible = false;
            let shifted = window
                .loop_length
                .filter(|_| cycle > 0)
                .map(|length| timeline + length);
            for position in std::iter::once(timeline).chain(shifted) {
                if let Some((l, r)) = snapshot.frame_at(position) {
                    left[index] += (l * gain) as f32;
                    right[index] += (r * gain) as f32;
                    audible = true;
                }
            }
            audible
        })
    }

    fn content_end(&self) -> i64 {
        self.snapshot.load().end_sample()
    }
}
