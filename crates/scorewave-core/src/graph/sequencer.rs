use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, info, instrument};

use super::{ClockState, MixNode, NodeClock, RenderWindow, SequencerError, Transport};
use crate::{acoustics::envelope_samples, dynamics::PeakLimiter, time::seconds_to_samples};

const LIMITER_CEILING: f32 = 0.98;
const LIMITER_RELEASE_MS: f32 = 80.0;

type NodeList = Vec<Arc<dyn MixNode>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    node: Option<Arc<dyn MixNode>>,
}

#[derive(Default)]
struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    order: Vec<NodeHandle>,
}

impl Arena {
    fn get(&self, handle: NodeHandle) -> Option<&Arc<dyn MixNode>> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn insert(&mut self, node: Arc<dyn MixNode>) -> NodeHandle {
        let handle = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            NodeHandle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeHandle {
                index,
                generation: 0,
            }
        };
        self.order.push(handle);
        handle
    }

    fn remove(&mut self, handle: NodeHandle) -> Option<Arc<dyn MixNode>> {
        self.get(handle)?;
        let node = self.slots[handle.index as usize].node.take();
        self.free.push(handle.index);
        self.order.retain(|entry| *entry != handle);
        node
    }

    fn ordered(&self) -> NodeList {
        self.order
            .iter()
            .filter_map(|handle| self.get(*handle).cloned())
            .collect()
    }
}

pub struct Sequencer {
    sample_rate: u32,
    max_frames: usize,
    arena: Mutex<Arena>,
    published: Arc<ArcSwap<NodeList>>,
    transport: Arc<Transport>,
    master_clock: Arc<NodeClock>,
}

impl Sequencer {
    pub fn new(sample_rate: u32, max_frames: usize) -> Result<Self, SequencerError> {
        if sample_rate == 0 || max_frames == 0 {
            return Err(SequencerError::InvalidFormat {
                sample_rate,
                max_frames,
            });
        }
        Ok(Self {
            sample_rate,
            max_frames,
            arena: Mutex::new(Arena::default()),
            published: Arc::new(ArcSwap::from_pointee(Vec::new())),
            transport: Arc::new(Transport::default()),
            master_clock: Arc::new(NodeClock::default()),
        })
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    #[must_use]
    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn insert(&self, node: Arc<dyn MixNode>) -> NodeHandle {
        if self.master_clock.state() == ClockState::Playing {
            node.clock().start_at(self.master_clock.start_anchor());
            if self.master_clock.is_pausing() {
                node.clock().begin_pause();
            }
        }
        let mut arena = self.arena.lock();
        let handle = arena.insert(node);
        self.published.store(Arc::new(arena.ordered()));
        debug!(?handle, nodes = arena.order.len(), "node inserted");
        handle
    }

    pub fn remove(&self, handle: NodeHandle) -> Result<Arc<dyn MixNode>, SequencerError> {
        let mut arena = self.arena.lock();
        let node = arena
            .remove(handle)
            .ok_or(SequencerError::NodeNotFound(handle))?;
        self.published.store(Arc::new(arena.ordered()));
        node.clock().stop();
        debug!(?handle, nodes = arena.order.len(), "node removed");
        Ok(node)
    }

    #[must_use]
    pub fn node(&self, handle: NodeHandle) -> Option<Arc<dyn MixNode>> {
        self.arena.lock().get(handle).cloned()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.published.load().len()
    }

    #[must_use]
    pub fn content_end(&self) -> i64 {
        self.published
            .load()
            .iter()
            .map(|node| node.content_end())
            .max()
            .unwrap_or(0)
    }

    pub fn renderer(&self) -> SequencerRenderer {
        SequencerRenderer {
            sample_rate: self.sample_rate,
            max_frames: self.max_frames,
            nodes: Arc::clone(&self.published),
            transport: Arc::clone(&self.transport),
            master_clock: Arc::clone(&self.master_clock),
            scratch: [vec![0.0; self.max_frames], vec![0.0; self.max_frames]],
            planar: [vec![0.0; self.max_frames], vec![0.0; self.max_frames]],
            master_gain: 1.0,
            limiter: Some(PeakLimiter::new(
                LIMITER_CEILING,
                LIMITER_RELEASE_MS,
                self.sample_rate,
            )),
        }
    }

    #[instrument(skip(self))]
    pub fn play(&self) {
        let state = self.master_clock.state();
        let pausing = self.master_clock.is_pausing();
        if state == ClockState::Playing && !pausing {
            debug!("already playing");
            return;
        }
        if state == ClockState::Paused || pausing {
            self.transport.set_start_offset(self.transport.position());
        }
        for node in self.published.load().iter() {
            node.clock().start();
        }
        self.master_clock.start();
        self.transport.set_playing(true);
        info!(offset = self.transport.start_offset(), "playback started");
    }

    #[instrument(skip(self))]
    pub fn begin_pause(&self) {
        for node in self.published.load().iter() {
            node.clock().begin_pause();
        }
        if self.master_clock.begin_pause() {
            info!(position = self.transport.position(), "pause requested");
        }
        self.transport.set_playing(false);
    }

    #[instrument(skip(self))]
    pub fn stop(&self) {
        for node in self.published.load().iter() {
            node.clock().stop();
        }
        let was_running = self.master_clock.state() != ClockState::Stopped;
        self.master_clock.stop();
        self.transport.set_playing(false);
        self.transport.set_position(self.transport.start_offset());
        if was_running {
            info!("playback stopped");
        }
    }

    pub fn seek(&self, sec: f64) {
        let offset = seconds_to_samples(sec.max(0.0), self.sample_rate);
        self.transport.set_start_offset(offset);
        self.transport.set_position(offset);
        if self.master_clock.state() == ClockState::Playing {
            for node in self.published.load().iter() {
                node.clock().start();
            }
            self.master_clock.start();
        }
        debug!(offset, "seeked");
    }

    pub fn set_loop(&self, is_loop: bool, duration_sec: f64) {
        self.transport.set_loop(is_loop);
        self.transport
            .set_duration_samples(seconds_to_samples(duration_sec.max(0.0), self.sample_rate));
    }

    #[must_use]
    pub fn state(&self) -> ClockState {
        self.master_clock.state()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStatus {
    pub frames: usize,
    pub is_silence: bool,
}

/// Audio-thread half of the graph. Holds only what the callback needs and
/// never allocates after construction.
pub struct SequencerRenderer {
    sample_rate: u32,
    max_frames: usize,
    nodes: Arc<ArcSwap<NodeList>>,
    transport: Arc<Transport>,
    master_clock: Arc<NodeClock>,
    scratch: [Vec<f32>; 2],
    planar: [Vec<f32>; 2],
    master_gain: f32,
    limiter: Option<PeakLimiter>,
}

impl SequencerRenderer {
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn set_master_gain(&mut self, gain: f32) {
        self.master_gain = gain.max(0.0);
    }

    pub fn set_limiter_enabled(&mut self, enabled: bool) {
        self.limiter = enabled.then(|| {
            PeakLimiter::new(LIMITER_CEILING, LIMITER_RELEASE_MS, self.sample_rate)
        });
    }

    pub fn render(
        &mut self,
        host_sample_time: i64,
        left: &mut [f32],
        right: &mut [f32],
    ) -> RenderStatus {
        let frames = left.len().min(right.len());
        let mut is_silence = true;
        let mut done = 0;
        while done < frames {
            let count = (frames - done).min(self.max_frames);
            let silent = self.render_slice(
                host_sample_time + done as i64,
                &mut left[done..done + count],
                &mut right[done..done + count],
            );
            is_silence &= silent;
            done += count;
        }
        RenderStatus { frames, is_silence }
    }

    pub fn render_interleaved(
        &mut self,
        host_sample_time: i64,
        output: &mut [f32],
    ) -> RenderStatus {
        let frames = output.len() / 2;
        let mut is_silence = true;
        let mut done = 0;
        while done < frames {
            let count = (frames - done).min(self.max_frames);
            let [mut left, mut right] = std::mem::take(&mut self.planar);
            let silent = self.render_slice(
                host_sample_time + done as i64,
                &mut left[..count],
                &mut right[..count],
            );
            for (index, frame) in output[done * 2..(done + count) * 2]
                .chunks_exact_mut(2)
                .enumerate()
            {
                frame[0] = left[index];
                frame[1] = right[index];
            }
            self.planar = [left, right];
            is_silence &= silent;
            done += count;
        }
        RenderStatus { frames, is_silence }
    }

    fn render_slice(&mut self, host: i64, left: &mut [f32], right: &mut [f32]) -> bool {
        left.fill(0.0);
        right.fill(0.0);
        let frames = left.len();

        let Some(anchors) = self.master_clock.latch(host) else {
            return true;
        };
        let window = RenderWindow {
            host_sample_time: host,
            frames,
            start_offset: self.transport.start_offset(),
            loop_length: self.transport.loop_length(),
            fade: envelope_samples(self.sample_rate) as i64,
        };

        let mut is_silence = true;
        let [scratch_left, scratch_right] = &mut self.scratch;
        for node in self.nodes.load().iter() {
            let silent = node.render(
                &window,
                &mut scratch_left[..frames],
                &mut scratch_right[..frames],
            );
            if silent {
                continue;
            }
            is_silence = false;
            for (out, sample) in left.iter_mut().zip(&scratch_left[..frames]) {
                *out += sample;
            }
            for (out, sample) in right.iter_mut().zip(&scratch_right[..frames]) {
                *out += sample;
            }
        }

        if !is_silence {
            if self.master_gain != 1.0 {
                for sample in left.iter_mut().chain(right.iter_mut()) {
                    *sample *= self.master_gain;
                }
            }
            if let Some(limiter) = self.limiter.as_mut() {
                limiter.process(left, right);
            }
        }

        let (timeline, _) = window.timeline(host + frames as i64, anchors.start);
        if anchors.end.is_none() {
            self.transport.set_position(timeline);
        }
        self.master_clock
            .settle(anchors, host + frames as i64, window.fade);
        is_silence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{graph::PcmNode, model::PcmClip};

    fn constant_clip(frames: usize, value: f32) -> PcmClip {
        PcmClip::new(0.0, 48_000, vec![value; frames], vec![value; frames])
    }

    #[test]
    fn degenerate_formats_fail_closed() {
        assert!(matches!(
            Sequencer::new(0, 512),
            Err(SequencerError::InvalidFormat { .. })
        ));
        assert!(matches!(
            Sequencer::new(48_000, 0),
            Err(SequencerError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn handles_are_not_reused_after_removal() {
        let sequencer = Sequencer::new(48_000, 256).expect("valid format");
        let first = sequencer.insert(Arc::new(PcmNode::new(constant_clip(4, 0.1))));
        sequencer.remove(first).expect("node exists");
        let second = sequencer.insert(Arc::new(PcmNode::new(constant_clip(4, 0.1))));
        assert_ne!(first, second);
        assert!(sequencer.node(first).is_none());
        assert!(matches!(
            sequencer.remove(first),
            Err(SequencerError::NodeNotFound(_))
        ));
    }

    #[test]
    fn nodes_are_summed() {
        let sequencer = Sequencer::new(48_000, 256).expect("valid format");
        sequencer.insert(Arc::new(PcmNode::new(constant_clip(4_000, 0.1))));
        sequencer.insert(Arc::new(PcmNode::new(constant_clip(4_000, 0.2))));
        let mut renderer = sequencer.renderer();
        sequencer.play();

        let mut left = vec![0.0; 2_000];
        let mut right = vec![0.0; 2_000];
        let status = renderer.render(0, &mut left, &mut right);
        assert!(!status.is_silence);
        assert_eq!(left[0], 0.0);
        assert!((left[1_500] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn silence_before_play_and_after_stop() {
        let sequencer = Sequencer::new(48_000, 128).expect("valid format");
        sequencer.insert(Arc::new(PcmNode::new(constant_clip(4_000, 0.1))));
        let mut renderer = sequencer.renderer();
        let mut out = vec![1.0; 256];
        assert!(renderer.render_interleaved(0, &mut out).is_silence);
        assert!(out.iter().all(|sample| *sample == 0.0));

        sequencer.play();
        assert!(!renderer.render_interleaved(0, &mut out).is_silence);
        sequencer.stop();
        sequencer.stop();
        assert!(renderer.render_interleaved(128, &mut out).is_silence);
    }

    #[test]
    fn pause_fades_out_and_resume_continues() {
        let sequencer = Sequencer::new(48_000, 512).expect("valid format");
        sequencer.insert(Arc::new(PcmNode::new(constant_clip(48_000, 0.1))));
        let mut renderer = sequencer.renderer();
        sequencer.play();

        let mut left = vec![0.0; 2_048];
        let mut right = vec![0.0; 2_048];
        renderer.render(0, &mut left, &mut right);
        sequencer.begin_pause();
        sequencer.begin_pause();
        renderer.render(2_048, &mut left, &mut right);
        assert!(left[0] > 0.09);
        assert_eq!(left[2_047], 0.0);
        assert_eq!(sequencer.state(), ClockState::Paused);

        let paused_at = sequencer.transport().position();
        assert_eq!(paused_at, 2_048);
        sequencer.play();
        assert_eq!(sequencer.transport().start_offset(), paused_at);
        let status = renderer.render(10_000, &mut left, &mut right);
        assert!(!status.is_silence);
    }
}
