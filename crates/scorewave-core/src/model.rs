use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{acoustics::MIN_FQ, time::beats_to_seconds};

pub const DEFAULT_TEMPO: f64 = 120.0;
pub const DEFAULT_PITCH: f64 = 69.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Stereo {
    pub volume: f64,
    pub pan: f64,
}

impl Default for Stereo {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
        }
    }
}

impl Stereo {
    #[must_use]
    pub fn new(volume: f64, pan: f64) -> Self {
        Self {
            volume: volume.max(0.0),
            pan: pan.clamp(-1.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Overtone {
    pub even_scale: f64,
    pub odd_scale: f64,
}

impl Default for Overtone {
    fn default() -> Self {
        Self {
            even_scale: 1.0,
            odd_scale: 1.0,
        }
    }
}

impl Overtone {
    #[must_use]
    pub fn pure() -> Self {
        Self {
            even_scale: 0.0,
            odd_scale: 0.0,
        }
    }

    #[must_use]
    pub fn is_pure(&self) -> bool {
        self.even_scale == 0.0 && self.odd_scale == 0.0
    }

    #[must_use]
    pub fn scale(&self, harmonic: usize) -> f64 {
        match harmonic {
            0 => 0.0,
            1 => 1.0,
            n if n % 2 == 0 => self.even_scale,
            _ => self.odd_scale,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SpectlopePoint {
    pub fq: f64,
    pub volume: f64,
    pub noise: f64,
}

impl SpectlopePoint {
    #[must_use]
    pub fn new(fq: f64, volume: f64, noise: f64) -> Self {
        Self {
            fq: fq.max(MIN_FQ),
            volume: volume.max(0.0),
            noise: noise.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spectlope {
    pub points: Vec<SpectlopePoint>,
}

impl Default for Spectlope {
    fn default() -> Self {
        Self::flat(1.0, 0.0)
    }
}

impl Spectlope {
    #[must_use]
    pub fn new(mut points: Vec<SpectlopePoint>) -> Self {
        points.sort_by(|left, right| left.fq.total_cmp(&right.fq));
        Self { points }
    }

    #[must_use]
    pub fn flat(volume: f64, noise: f64) -> Self {
        Self::new(vec![
            SpectlopePoint::new(MIN_FQ, volume, noise),
            SpectlopePoint::new(20_000.0, volume, noise),
        ])
    }

    #[must_use]
    pub fn max_fq(&self) -> f64 {
        self.points.last().map_or(0.0, |point| point.fq)
    }

    #[must_use]
    pub fn has_noise(&self) -> bool {
        self.points
            .iter()
            .any(|point| point.noise > 0.0 && point.volume > 0.0)
    }

    #[must_use]
    pub fn volume_at(&self, fq: f64) -> f64 {
        if fq > self.max_fq() {
            return 0.0;
        }
        self.interpolate(fq, |point| point.volume)
    }

    #[must_use]
    pub fn noise_at(&self, fq: f64) -> f64 {
        self.interpolate(fq, |point| point.noise)
    }

    fn interpolate(&self, fq: f64, value: impl Fn(&SpectlopePoint) -> f64) -> f64 {
        let (Some(first), Some(last)) = (self.points.first(), self.points.last()) else {
            return 0.0;
        };
        if fq <= first.fq {
            return value(first);
        }
        if fq >= last.fq {
            return value(last);
        }

        let upper = self.points.partition_point(|point| point.fq <= fq);
        let left = &self.points[upper - 1];
        let right = &self.points[upper];
        let span = (right.fq / left.fq).log2();
        if span <= 0.0 {
            return value(right);
        }
        let t = (fq / left.fq).log2() / span;
        value(left) + (value(right) - value(left)) * t
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Tone {
    pub overtone: Overtone,
    pub spectlope: Spectlope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Pit {
    pub beat: f64,
    pub pitch: f64,
    pub stereo: Stereo,
    pub tone: Tone,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Note {
    pub id: Uuid,
    pub pitch: f64,
    pub start_beat: f64,
    pub length_beats: f64,
    #[serde(default)]
    pub sustain_loop: bool,
    #[serde(default)]
    pub pits: Vec<Pit>,
}

impl Note {
    #[must_use]
    pub fn new(pitch: f64, start_beat: f64, length_beats: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            pitch,
            start_beat: start_beat.max(0.0),
            length_beats: length_beats.max(0.0),
            sustain_loop: false,
            pits: vec![Pit::default()],
        }
    }

    #[must_use]
    pub fn with_tone(mut self, tone: Tone) -> Self {
        for pit in &mut self.pits {
            pit.tone = tone.clone();
        }
        self
    }

    #[must_use]
    pub fn with_stereo(mut self, stereo: Stereo) -> Self {
        for pit in &mut self.pits {
            pit.stereo = stereo;
        }
        self
    }

    #[must_use]
    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.length_beats
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Reflection {
    pub delay_sec: f64,
    pub gain: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Reverb {
    pub early: Vec<Reflection>,
    pub late_gain: f64,
    pub late_predelay_sec: f64,
    pub late_duration_sec: f64,
    pub late_decay_sec: f64,
    pub stereo: bool,
    pub seed: u64,
}

impl Default for Reverb {
    fn default() -> Self {
        Self::empty()
    }
}

impl Reverb {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            early: Vec::new(),
            late_gain: 0.0,
            late_predelay_sec: 0.0,
            late_duration_sec: 0.0,
            late_decay_sec: 0.0,
            stereo: false,
            seed: 0,
        }
    }

    #[must_use]
    pub fn room() -> Self {
        Self {
            early: vec![
                Reflection {
                    delay_sec: 0.011,
                    gain: 0.32,
                },
                Reflection {
                    delay_sec: 0.019,
                    gain: 0.24,
                },
                Reflection {
                    delay_sec: 0.029,
                    gain: 0.18,
                },
            ],
            late_gain: 0.12,
            late_predelay_sec: 0.035,
            late_duration_sec: 0.8,
            late_decay_sec: 0.6,
            stereo: true,
            seed: 0x5eed_2e7e_4b00_0001,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        let has_early = self
            .early
            .iter()
            .any(|reflection| reflection.gain != 0.0 && reflection.delay_sec > 0.0);
        let has_late = self.late_gain != 0.0 && self.late_duration_sec > self.late_predelay_sec;
        !has_early && !has_late
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PcmClip {
    pub id: Uuid,
    pub start_sec: f64,
    pub sample_rate: u32,
    pub gain: f64,
    pub left: Vec<f32>,
    pub right: Vec<f32>,
}

impl PcmClip {
    #[must_use]
    pub fn new(start_sec: f64, sample_rate: u32, left: Vec<f32>, right: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            start_sec: start_sec.max(0.0),
            sample_rate,
            gain: 1.0,
            left,
            right,
        }
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.left.len().min(self.right.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Score {
    pub id: Uuid,
    pub name: String,
    pub tempo: f64,
    #[serde(default)]
    pub start_offset_sec: f64,
    #[serde(default)]
    pub reverb: Reverb,
    #[serde(default)]
    pub notes: Vec<Note>,
}

impl Default for Score {
    fn default() -> Self {
        Self::new("Score", DEFAULT_TEMPO)
    }
}

impl Score {
    #[must_use]
    pub fn new(name: impl Into<String>, tempo: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            tempo,
            start_offset_sec: 0.0,
            reverb: Reverb::empty(),
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn sec_from_beat(&self, beat: f64) -> f64 {
        self.start_offset_sec + beats_to_seconds(beat, self.tempo)
    }

    #[must_use]
    pub fn end_beat(&self) -> f64 {
        self.notes
            .iter()
            .filter(|note| !note.sustain_loop)
            .map(Note::end_beat)
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn duration_sec(&self) -> f64 {
        self.sec_from_beat(self.end_beat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spectlope_interpolates_in_log_frequency() {
        let spectlope = Spectlope::new(vec![
            SpectlopePoint::new(100.0, 1.0, 0.0),
            SpectlopePoint::new(400.0, 0.0, 1.0),
        ]);
        assert!((spectlope.volume_at(200.0) - 0.5).abs() < 1e-12);
        assert!((spectlope.noise_at(200.0) - 0.5).abs() < 1e-12);
        assert_eq!(spectlope.volume_at(50.0), 1.0);
        assert_eq!(spectlope.volume_at(401.0), 0.0);
        assert_eq!(spectlope.noise_at(1_000.0), 1.0);
    }

    #[test]
    fn overtone_scale_weights_odd_and_even_harmonics() {
        let overtone = Overtone {
            even_scale: 0.25,
            odd_scale: 0.5,
        };
        assert_eq!(overtone.scale(1), 1.0);
        assert_eq!(overtone.scale(2), 0.25);
        assert_eq!(overtone.scale(3), 0.5);
        assert!(Overtone::pure().is_pure());
    }

    #[test]
    fn empty_reverb_is_detected() {
        assert!(Reverb::empty().is_empty());
        assert!(!Reverb::room().is_empty());
    }

    #[test]
    fn score_end_ignores_sustained_loops() {
        let mut score = Score::new("t", 120.0);
        score.notes.push(Note::new(69.0, 0.0, 2.0));
        let mut looped = Note::new(69.0, 0.0, 16.0);
        looped.sustain_loop = true;
        score.notes.push(looped);
        assert!((score.duration_sec() - 1.0).abs() < 1e-12);
    }
}
