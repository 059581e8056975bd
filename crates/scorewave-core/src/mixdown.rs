use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::{
    acoustics::volume_from_db,
    curve::CurveOptions,
    dynamics::{self, Compressor},
    model::{Note, PcmClip, Reverb, Score},
    pool::TaskPool,
    request::RenderRequest,
    synth::{Notewave, synthesize},
    time::seconds_to_samples,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MixSettings {
    pub headroom_db: f64,
    pub loudness_limit_lufs: f64,
    pub attack_ms: f64,
    pub release_ms: f64,
    #[serde(skip)]
    pub curve_options: CurveOptions,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            headroom_db: -1.0,
            loudness_limit_lufs: -14.0,
            attack_ms: 20.0,
            release_ms: 20.0,
            curve_options: CurveOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMixBuffer {
    pub left: Vec<f64>,
    pub right: Vec<f64>,
    pub start_sample: i64,
    pub is_compressed: bool,
    pub sample_rate: u32,
}

impl TrackMixBuffer {
    #[must_use]
    pub fn empty(sample_rate: u32) -> Self {
        Self {
            left: Vec::new(),
            right: Vec::new(),
            start_sample: 0,
            is_compressed: false,
            sample_rate,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.left.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    #[must_use]
    pub fn end_sample(&self) -> i64 {
        self.start_sample + self.len() as i64
    }

    #[must_use]
    pub fn frame_at(&self, timeline: i64) -> Option<(f64, f64)> {
        let index = usize::try_from(timeline - self.start_sample).ok()?;
        Some((*self.left.get(index)?, *self.right.get(index)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopVoice {
    pub notewave: Arc<Notewave>,
    pub start_sample: i64,
}

impl LoopVoice {
    #[must_use]
    pub fn frame_at(&self, timeline: i64) -> Option<(f64, f64)> {
        let len = self.notewave.len() as i64;
        if timeline < self.start_sample || len == 0 {
            return None;
        }
        let index = (timeline - self.start_sample).rem_euclid(len) as usize;
        Some((self.notewave.left()[index], self.notewave.right()[index]))
    }
}

#[must_use]
pub fn mix_notewaves(placements: &[(i64, &Notewave)], sample_rate: u32) -> TrackMixBuffer {
    let Some(start) = placements.iter().map(|(start, _)| *start).min() else {
        return TrackMixBuffer::empty(sample_rate);
    };
    let end = placements
        .iter()
        .map(|(start, notewave)| start + notewave.len() as i64)
        .max()
        .unwrap_or(start);

    let len = usize::try_from(end - start).unwrap_or(0);
    let mut mix = TrackMixBuffer {
        left: vec![0.0; len],
        right: vec![0.0; len],
        start_sample: start,
        is_compressed: false,
        sample_rate,
    };
    for (offset, notewave) in placements {
        let from = (offset - start) as usize;
        add_into(&mut mix.left[from..], notewave.left(), 1.0);
        add_into(&mut mix.right[from..], notewave.right(), 1.0);
    }
    mix
}

fn add_into(target: &mut [f64], source: &[f64], gain: f64) {
    for (slot, sample) in target.iter_mut().zip(source) {
        *slot += sample * gain;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixdownStats {
    pub requests: usize,
    pub reused: usize,
    pub repanned: usize,
    pub synthesized: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct CachedWave {
    timbre_id: Uuid,
    notewave: Arc<Notewave>,
}

#[derive(Debug, Clone)]
pub struct ScoreTrack {
    id: Uuid,
    score: Score,
    pcm_clips: Vec<PcmClip>,
    sample_rate: u32,
    settings: MixSettings,
    notewaves: HashMap<Uuid, CachedWave>,
    mix: Arc<TrackMixBuffer>,
    loops: Vec<LoopVoice>,
    dirty: bool,
}

impl ScoreTrack {
    #[must_use]
    pub fn new(score: Score, sample_rate: u32, settings: MixSettings) -> Self {
        Self {
            id: score.id,
            score,
            pcm_clips: Vec::new(),
            sample_rate,
            settings,
            notewaves: HashMap::new(),
            mix: Arc::new(TrackMixBuffer::empty(sample_rate)),
            loops: Vec::new(),
            dirty: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn score(&self) -> &Score {
        &self.score
    }

    #[must_use]
    pub fn pcm_clips(&self) -> &[PcmClip] {
        &self.pcm_clips
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn settings(&self) -> &MixSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn append_note(&mut self, note: Note) {
        self.score.notes.push(note);
        self.dirty = true;
    }

    pub fn replace_note(&mut self, note: Note) -> bool {
        let Some(slot) = self.score.notes.iter_mut().find(|slot| slot.id == note.id) else {
            return false;
        };
        *slot = note;
        self.dirty = true;
        true
    }

    pub fn remove_note(&mut self, note_id: Uuid) -> bool {
        let before = self.score.notes.len();
        self.score.notes.retain(|note| note.id != note_id);
        let removed = self.score.notes.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn change_tempo(&mut self, tempo: f64) {
        if tempo > 0.0 && tempo.is_finite() {
            self.score.tempo = tempo;
            self.dirty = true;
        } else {
            warn!(tempo, "ignored invalid tempo");
        }
    }

    pub fn set_reverb(&mut self, reverb: Reverb) {
        self.score.reverb = reverb;
        self.dirty = true;
    }

    pub fn set_start_offset(&mut self, start_offset_sec: f64) {
        self.score.start_offset_sec = start_offset_sec;
        self.dirty = true;
    }

    pub fn add_pcm_clip(&mut self, clip: PcmClip) {
        if clip.sample_rate != self.sample_rate {
            warn!(
                clip_id = %clip.id,
                clip_rate = clip.sample_rate,
                track_rate = self.sample_rate,
                "pcm clip sample rate differs from track; it will be skipped in the mix"
            );
        }
        self.pcm_clips.push(clip);
        self.dirty = true;
    }

    pub fn remove_pcm_clip(&mut self, clip_id: Uuid) -> bool {
        let before = self.pcm_clips.len();
        self.pcm_clips.retain(|clip| clip.id != clip_id);
        let removed = self.pcm_clips.len() != before;
        self.dirty |= removed;
        removed
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.score
            .notes
            .iter()
            .map(|note| {
                RenderRequest::from_note(
                    &self.score,
                    note,
                    self.sample_rate,
                    self.settings.curve_options,
                )
            })
            .collect()
    }

    #[instrument(skip(self, pool), fields(track_id = %self.id, workers = pool.workers()))]
    pub fn update_notewave_dic(&mut self, pool: &TaskPool) -> MixdownStats {
        if !self.dirty {
            debug!("track clean, skipping update");
            return MixdownStats::default();
        }

        let requests = self.requests();
        let wanted: HashSet<Uuid> = requests.iter().map(|request| request.id).collect();
        let mut stats = MixdownStats {
            requests: requests.len(),
            ..MixdownStats::default()
        };

        let mut dropped: HashMap<Uuid, Arc<Notewave>> = HashMap::new();
        self.notewaves.retain(|id, cached| {
            let keep = wanted.contains(id);
            if !keep {
                dropped.insert(cached.timbre_id, Arc::clone(&cached.notewave));
            }
            keep
        });
        stats.dropped = dropped.len();

        let mut seen = HashSet::new();
        let mut pending = Vec::new();
        for request in &requests {
            if !seen.insert(request.id) {
                continue;
            }
            if self.notewaves.contains_key(&request.id) {
                stats.reused += 1;
                continue;
            }
            if let Some(source) = dropped.get(&request.timbre_id) {
                self.notewaves.insert(
                    request.id,
                    CachedWave {
                        timbre_id: request.timbre_id,
                        notewave: Arc::new(source.repanned(&request.curve)),
                    },
                );
                stats.repanned += 1;
                continue;
            }
            pending.push(request.clone());
        }

        stats.synthesized = pending.len();
        let synthesized = pool.map(&pending, synthesize);
        for (request, notewave) in pending.iter().zip(synthesized) {
            self.notewaves.insert(
                request.id,
                CachedWave {
                    timbre_id: request.timbre_id,
                    notewave: Arc::new(notewave),
                },
            );
        }

        self.rebuild_mix(&requests);
        self.dirty = false;
        info!(
            requests = stats.requests,
            reused = stats.reused,
            repanned = stats.repanned,
            synthesized = stats.synthesized,
            dropped = stats.dropped,
            "notewave cache updated"
        );
        stats
    }

    fn rebuild_mix(&mut self, requests: &[RenderRequest]) {
        let mut placements = Vec::with_capacity(requests.len());
        let mut loops = Vec::new();
        for request in requests {
            let Some(cached) = self.notewaves.get(&request.id) else {
                continue;
            };
            if cached.notewave.is_loop {
                loops.push(LoopVoice {
                    notewave: Arc::clone(&cached.notewave),
                    start_sample: request.start_sample(),
                });
            } else {
                placements.push((request.start_sample(), cached.notewave.as_ref()));
            }
        }

        let mut mix = mix_notewaves(&placements, self.sample_rate);
        self.mix_pcm_clips(&mut mix);

        let compressor = Compressor::new(
            volume_from_db(self.settings.headroom_db),
            self.settings.attack_ms,
            self.settings.release_ms,
            self.sample_rate,
        );
        mix.is_compressed = compressor.apply(&mut mix.left, &mut mix.right);
        let gain = dynamics::normalize_loudness(
            &mut mix.left,
            &mut mix.right,
            self.sample_rate,
            self.settings.loudness_limit_lufs,
        );
        debug!(
            frames = mix.len(),
            start_sample = mix.start_sample,
            loops = loops.len(),
            compressed = mix.is_compressed,
            normalization_gain = gain,
            "track mix rebuilt"
        );

        self.mix = Arc::new(mix);
        self.loops = loops;
    }

    fn mix_pcm_clips(&self, mix: &mut TrackMixBuffer) {
        let clips: Vec<(i64, &PcmClip)> = self
            .pcm_clips
            .iter()
            .filter(|clip| clip.sample_rate == self.sample_rate && clip.frame_count() > 0)
            .map(|clip| (seconds_to_samples(clip.start_sec, self.sample_rate), clip))
            .collect();
        if clips.is_empty() {
            return;
        }

        let mut start = clips.iter().map(|(start, _)| *start).min().unwrap_or(0);
        let mut end = clips
            .iter()
            .map(|(start, clip)| start + clip.frame_count() as i64)
            .max()
            .unwrap_or(start);
        if !mix.is_empty() {
            start = start.min(mix.start_sample);
            end = end.max(mix.end_sample());
        }

        let lead = usize::try_from(mix.start_sample - start).unwrap_or(0);
        let len = usize::try_from(end - start).unwrap_or(0);
        for channel in [&mut mix.left, &mut mix.right] {
            let mut widened = vec![0.0; len];
            widened[lead..lead + channel.len()].copy_from_slice(channel);
            *channel = widened;
        }
        mix.start_sample = start;

        for (clip_start, clip) in clips {
            let from = (clip_start - start) as usize;
            let frames = clip.frame_count();
            for (slot, sample) in mix.left[from..from + frames].iter_mut().zip(&clip.left) {
                *slot += f64::from(*sample) * clip.gain;
            }
            for (slot, sample) in mix.right[from..from + frames].iter_mut().zip(&clip.right) {
                *slot += f64::from(*sample) * clip.gain;
            }
        }
    }

    #[must_use]
    pub fn notewave(&self, request_id: Uuid) -> Option<Arc<Notewave>> {
        self.notewaves
            .get(&request_id)
            .map(|cached| Arc::clone(&cached.notewave))
    }

    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.notewaves.len()
    }

    #[must_use]
    pub fn mix_buffer(&self) -> Arc<TrackMixBuffer> {
        Arc::clone(&self.mix)
    }

    #[must_use]
    pub fn loop_voices(&self) -> &[LoopVoice] {
        &self.loops
    }

    #[must_use]
    pub fn lufs(&self) -> f64 {
        dynamics::integrated_loudness(&self.mix.left, &self.mix.right, self.sample_rate)
    }

    #[must_use]
    pub fn peak_db(&self) -> f64 {
        dynamics::peak_db(&self.mix.left, &self.mix.right)
    }

    #[must_use]
    pub fn at_sample_rate(&self, sample_rate: u32) -> Self {
        let mut track = Self::new(self.score.clone(), sample_rate, self.settings);
        track.id = self.id;
        track.pcm_clips = self.pcm_clips.clone();
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Overtone, Spectlope, Stereo, Tone};

    fn quiet_tone() -> Tone {
        Tone {
            overtone: Overtone::pure(),
            spectlope: Spectlope::flat(0.05, 0.0),
        }
    }

    fn track_with_notes() -> ScoreTrack {
        let mut score = Score::new("test", 120.0);
        score
            .notes
            .push(Note::new(69.0, 0.0, 1.0).with_tone(quiet_tone()));
        score
            .notes
            .push(Note::new(81.0, 2.0, 1.0).with_tone(quiet_tone()));
        ScoreTrack::new(score, 48_000, MixSettings::default())
    }

    #[test]
    fn update_is_skipped_when_clean() {
        let pool = TaskPool::new(2).expect("pool should build");
        let mut track = track_with_notes();
        let first = track.update_notewave_dic(&pool);
        assert_eq!(first.synthesized, 2);
        assert!(!track.is_dirty());
        assert_eq!(track.update_notewave_dic(&pool), MixdownStats::default());
    }

    #[test]
    fn unchanged_notes_are_reused_and_removed_notes_dropped() {
        let pool = TaskPool::new(2).expect("pool should build");
        let mut track = track_with_notes();
        track.update_notewave_dic(&pool);

        track.append_note(Note::new(76.0, 4.0, 0.5).with_tone(quiet_tone()));
        let stats = track.update_notewave_dic(&pool);
        assert_eq!(stats.reused, 2);
        assert_eq!(stats.synthesized, 1);

        let removed = track.score().notes[0].id;
        assert!(track.remove_note(removed));
        let stats = track.update_notewave_dic(&pool);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.synthesized, 0);
        assert_eq!(track.cached_count(), 2);
    }

    #[test]
    fn stereo_only_edits_are_repanned() {
        let pool = TaskPool::new(2).expect("pool should build");
        let mut track = track_with_notes();
        track.update_notewave_dic(&pool);

        let panned = track.score().notes[0]
            .clone()
            .with_stereo(Stereo::new(1.0, 0.5));
        assert!(track.replace_note(panned));
        let stats = track.update_notewave_dic(&pool);
        assert_eq!(stats.repanned, 1);
        assert_eq!(stats.synthesized, 0);
    }

    #[test]
    fn tempo_change_moves_notes() {
        let pool = TaskPool::new(2).expect("pool should build");
        let mut track = track_with_notes();
        track.update_notewave_dic(&pool);
        let before = track.mix_buffer().len();

        track.change_tempo(60.0);
        assert!(track.is_dirty());
        track.update_notewave_dic(&pool);
        assert!(track.mix_buffer().len() > before);
    }

    #[test]
    fn mix_spans_earliest_start_to_latest_end() {
        let a = Notewave::silent(100, false, 48_000);
        let b = Notewave::silent(50, false, 48_000);
        let mix = mix_notewaves(&[(20, &a), (200, &b)], 48_000);
        assert_eq!(mix.start_sample, 20);
        assert_eq!(mix.len(), 230);
        assert_eq!(mix.frame_at(19), None);
        assert_eq!(mix.frame_at(249), Some((0.0, 0.0)));
    }

    #[test]
    fn pcm_clips_widen_the_mix() {
        let pool = TaskPool::new(1).expect("pool should build");
        let mut track = ScoreTrack::new(Score::new("pcm", 120.0), 48_000, MixSettings::default());
        track.add_pcm_clip(PcmClip::new(1.0, 48_000, vec![0.1; 10], vec![-0.1; 10]));
        track.update_notewave_dic(&pool);
        let mix = track.mix_buffer();
        assert_eq!(mix.start_sample, 48_000);
        assert_eq!(mix.len(), 10);
        let (left, right) = mix.frame_at(48_005).expect("inside clip");
        assert!((left - 0.1).abs() < 1e-6);
        assert!((right + 0.1).abs() < 1e-6);
    }

    #[test]
    fn loop_voice_wraps() {
        let mut wave = Notewave::silent(4, true, 48_000);
        wave.samples[0] = vec![0.0, 1.0, 2.0, 3.0];
        let voice = LoopVoice {
            notewave: Arc::new(wave),
            start_sample: 10,
        };
        assert_eq!(voice.frame_at(9), None);
        assert_eq!(voice.frame_at(11).map(|frame| frame.0), Some(1.0));
        assert_eq!(voice.frame_at(15).map(|frame| frame.0), Some(1.0));
    }
}
