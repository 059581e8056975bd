use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    acoustics::{DEFAULT_SAMPLE_RATE, clamp_fq, fq_from_pitch},
    curve::{CurveOptions, Keyframe, ParameterCurve},
    model::{Note, Reverb, Score, Stereo, Tone},
    time::{beats_to_seconds, seconds_to_samples},
};

#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub id: Uuid,
    pub timbre_id: Uuid,
    pub root_fq: f64,
    pub first_fq: f64,
    pub seeds: (u64, u64),
    pub curve: Arc<ParameterCurve>,
    pub start_sec: f64,
    pub end_sec: Option<f64>,
    pub reverb: Reverb,
    pub sample_rate: u32,
}

impl RenderRequest {
    #[must_use]
    pub fn builder(root_fq: f64) -> RenderRequestBuilder {
        RenderRequestBuilder::new(root_fq)
    }

    #[must_use]
    pub fn from_note(score: &Score, note: &Note, sample_rate: u32, options: CurveOptions) -> Self {
        let keyframes: Vec<Keyframe> = note
            .pits
            .iter()
            .map(|pit| Keyframe {
                sec: beats_to_seconds(pit.beat, score.tempo),
                pitch: pit.pitch,
                stereo: pit.stereo,
                tone: pit.tone.clone(),
            })
            .collect();

        let start_sec = score.sec_from_beat(note.start_beat);
        let mut builder = Self::builder(fq_from_pitch(note.pitch))
            .keyframes(keyframes)
            .curve_options(options)
            .seeds(note.id.as_u64_pair())
            .reverb(score.reverb.clone())
            .sample_rate(sample_rate)
            .start_sec(start_sec);
        builder = if note.sustain_loop {
            builder.looping()
        } else {
            builder.duration_sec(beats_to_seconds(note.length_beats, score.tempo))
        };
        builder.build()
    }

    #[must_use]
    pub fn is_loop(&self) -> bool {
        self.end_sec.is_none()
    }

    #[must_use]
    pub fn duration_sec(&self) -> Option<f64> {
        self.end_sec.map(|end| (end - self.start_sec).max(0.0))
    }

    #[must_use]
    pub fn start_sample(&self) -> i64 {
        seconds_to_samples(self.start_sec, self.sample_rate)
    }

    #[must_use]
    pub fn placed_at(&self, start_sec: f64) -> Self {
        let mut moved = self.clone();
        moved.end_sec = self.duration_sec().map(|duration| start_sec + duration);
        moved.start_sec = start_sec;
        moved
    }

    #[must_use]
    pub fn differs_only_in_stereo(&self, other: &Self) -> bool {
        self.timbre_id == other.timbre_id && self.id != other.id
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequestBuilder {
    root_fq: f64,
    keyframes: Vec<Keyframe>,
    options: CurveOptions,
    seeds: (u64, u64),
    start_sec: f64,
    duration_sec: Option<f64>,
    reverb: Reverb,
    sample_rate: u32,
}

impl RenderRequestBuilder {
    fn new(root_fq: f64) -> Self {
        Self {
            root_fq,
            keyframes: vec![Keyframe::default()],
            options: CurveOptions::default(),
            seeds: (0x9e37_79b9_7f4a_7c15, 0xbf58_476d_1ce4_e5b9),
            start_sec: 0.0,
            duration_sec: Some(1.0),
            reverb: Reverb::empty(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }

    #[must_use]
    pub fn keyframes(mut self, keyframes: Vec<Keyframe>) -> Self {
        self.keyframes = keyframes;
        self
    }

    #[must_use]
    pub fn tone(mut self, tone: Tone) -> Self {
        for keyframe in &mut self.keyframes {
            keyframe.tone = tone.clone();
        }
        self
    }

    #[must_use]
    pub fn stereo(mut self, stereo: Stereo) -> Self {
        for keyframe in &mut self.keyframes {
            keyframe.stereo = stereo;
        }
        self
    }

    #[must_use]
    pub fn curve_options(mut self, options: CurveOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn seeds(mut self, seeds: (u64, u64)) -> Self {
        self.seeds = seeds;
        self
    }

    #[must_use]
    pub fn start_sec(mut self, start_sec: f64) -> Self {
        self.start_sec = start_sec.max(0.0);
        self
    }

    #[must_use]
    pub fn duration_sec(mut self, duration_sec: f64) -> Self {
        self.duration_sec = Some(duration_sec.max(0.0));
        self
    }

    #[must_use]
    pub fn looping(mut self) -> Self {
        self.duration_sec = None;
        self
    }

    #[must_use]
    pub fn reverb(mut self, reverb: Reverb) -> Self {
        self.reverb = reverb;
        self
    }

    #[must_use]
    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    #[must_use]
    pub fn build(self) -> RenderRequest {
        let curve = ParameterCurve::new(&self.keyframes, self.options);
        let first_fq = clamp_fq(
            self.root_fq * 2.0_f64.powf(curve.pitch(0.0) / 12.0),
            self.sample_rate,
        );

        let mut timbre = ContentHasher::default();
        timbre.f64(self.root_fq);
        timbre.u64(self.seeds.0);
        timbre.u64(self.seeds.1);
        timbre.u64(u64::from(self.sample_rate));
        timbre.f64(self.duration_sec.unwrap_or(f64::INFINITY));
        timbre.options(self.options);
        timbre.reverb(&self.reverb);
        for keyframe in &self.keyframes {
            timbre.f64(keyframe.sec);
            timbre.f64(keyframe.pitch);
            timbre.tone(&keyframe.tone);
        }

        let mut content = timbre.clone();
        for keyframe in &self.keyframes {
            content.f64(keyframe.stereo.volume);
            content.f64(keyframe.stereo.pan);
        }

        RenderRequest {
            id: content.finish(),
            timbre_id: timbre.finish(),
            root_fq: self.root_fq,
            first_fq,
            seeds: self.seeds,
            curve: Arc::new(curve),
            start_sec: self.start_sec,
            end_sec: self.duration_sec.map(|duration| self.start_sec + duration),
            reverb: self.reverb,
            sample_rate: self.sample_rate,
        }
    }
}

#[derive(Clone, Default)]
struct ContentHasher {
    digest: Sha256,
}

impl ContentHasher {
    fn f64(&mut self, value: f64) {
        self.digest.update(value.to_bits().to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.digest.update(value.to_le_bytes());
    }

    fn options(&mut self, options: CurveOptions) {
        self.digest.update([
            options.pitch as u8,
            options.stereo as u8,
            options.overtone as u8,
        ]);
    }

    fn tone(&mut self, tone: &Tone) {
        self.f64(tone.overtone.even_scale);
        self.f64(tone.overtone.odd_scale);
        self.u64(tone.spectlope.points.len() as u64);
        for point in &tone.spectlope.points {
            self.f64(point.fq);
            self.f64(point.volume);
            self.f64(point.noise);
        }
    }

    fn reverb(&mut self, reverb: &Reverb) {
        if reverb.is_empty() {
            self.u64(0);
            return;
        }
        self.u64(reverb.early.len() as u64);
        for reflection in &reverb.early {
            self.f64(reflection.delay_sec);
            self.f64(reflection.gain);
        }
        self.f64(reverb.late_gain);
        self.f64(reverb.late_predelay_sec);
        self.f64(reverb.late_duration_sec);
        self.f64(reverb.late_decay_sec);
        self.u64(u64::from(reverb.stereo));
        self.u64(reverb.seed);
    }

    fn finish(self) -> Uuid {
        let digest = self.digest.finalize();
        let mut bytes = [0_u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Overtone;

    #[test]
    fn id_ignores_placement_but_not_content() {
        let base = RenderRequest::builder(440.0).duration_sec(1.0).build();
        let moved = base.placed_at(3.0);
        assert_eq!(base.id, moved.id);
        assert!((moved.end_sec.unwrap_or_default() - 4.0).abs() < 1e-12);

        let longer = RenderRequest::builder(440.0).duration_sec(2.0).build();
        assert_ne!(base.id, longer.id);

        let brighter = RenderRequest::builder(440.0)
            .tone(Tone {
                overtone: Overtone {
                    even_scale: 0.5,
                    odd_scale: 0.5,
                },
                ..Tone::default()
            })
            .build();
        assert_ne!(base.id, brighter.id);
    }

    #[test]
    fn stereo_changes_keep_the_timbre_id() {
        let centre = RenderRequest::builder(440.0).build();
        let left = RenderRequest::builder(440.0)
            .stereo(Stereo::new(0.8, -0.5))
            .build();
        assert_ne!(centre.id, left.id);
        assert!(centre.differs_only_in_stereo(&left));
    }

    #[test]
    fn from_note_maps_beats_to_seconds() {
        let mut score = Score::new("t", 120.0);
        score.start_offset_sec = 0.5;
        let note = Note::new(81.0, 2.0, 2.0);
        let request = RenderRequest::from_note(&score, &note, 48_000, CurveOptions::default());

        assert!((request.root_fq - 880.0).abs() < 1e-9);
        assert!((request.first_fq - 880.0).abs() < 1e-9);
        assert!((request.start_sec - 1.5).abs() < 1e-12);
        assert_eq!(request.duration_sec(), Some(1.0));
        assert_eq!(request.start_sample(), 72_000);
        assert_eq!(request.seeds, note.id.as_u64_pair());
    }

    #[test]
    fn sustained_notes_become_loop_requests() {
        let score = Score::new("t", 120.0);
        let mut note = Note::new(69.0, 0.0, 1.0);
        note.sustain_loop = true;
        let request = RenderRequest::from_note(&score, &note, 48_000, CurveOptions::default());
        assert!(request.is_loop());
        assert_eq!(request.duration_sec(), None);
    }
}
