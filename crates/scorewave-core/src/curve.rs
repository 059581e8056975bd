use serde::{Deserialize, Serialize};

use crate::model::{Overtone, Spectlope, Stereo, Tone};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keyframe {
    pub sec: f64,
    pub pitch: f64,
    pub stereo: Stereo,
    pub tone: Tone,
}

impl Default for Keyframe {
    fn default() -> Self {
        Self {
            sec: 0.0,
            pitch: 0.0,
            stereo: Stereo::default(),
            tone: Tone::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    Spline,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurveOptions {
    pub pitch: Interpolation,
    pub stereo: Interpolation,
    pub overtone: Interpolation,
}

impl Default for CurveOptions {
    fn default() -> Self {
        Self {
            pitch: Interpolation::Spline,
            stereo: Interpolation::Linear,
            overtone: Interpolation::Linear,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveChannel {
    Pitch,
    Volume,
    Pan,
    EvenOvertone,
    OddOvertone,
}

#[derive(Debug, Clone, PartialEq)]
enum Channel {
    Constant(f64),
    Varying(Interpolator),
}

impl Channel {
    fn build(times: &[f64], values: Vec<f64>, kind: Interpolation) -> Self {
        let first = values.first().copied().unwrap_or_default();
        if values.iter().all(|value| *value == first) {
            return Self::Constant(first);
        }
        Self::Varying(Interpolator::new(times.to_vec(), values, kind))
    }

    fn evaluate(&self, sec: f64) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Varying(interpolator) => interpolator.evaluate(sec),
        }
    }

    fn is_constant(&self) -> bool {
        matches!(self, Self::Constant(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Interpolator {
    kind: Interpolation,
    times: Vec<f64>,
    values: Vec<f64>,
    tangents: Vec<f64>,
}

impl Interpolator {
    fn new(times: Vec<f64>, values: Vec<f64>, kind: Interpolation) -> Self {
        let tangents = match kind {
            Interpolation::Linear => Vec::new(),
            Interpolation::Spline => monotone_tangents(&times, &values),
        };
        Self {
            kind,
            times,
            values,
            tangents,
        }
    }

    fn evaluate(&self, sec: f64) -> f64 {
        let last = self.times.len() - 1;
        if sec <= self.times[0] {
            return self.values[0];
        }
        if sec >= self.times[last] {
            return self.values[last];
        }

        let upper = self.times.partition_point(|time| *time <= sec);
        let lower = upper - 1;
        let h = self.times[upper] - self.times[lower];
        if h <= 0.0 {
            return self.values[upper];
        }
        let t = (sec - self.times[lower]) / h;
        let (y0, y1) = (self.values[lower], self.values[upper]);

        match self.kind {
            Interpolation::Linear => y0 + (y1 - y0) * t,
            Interpolation::Spline => {
                let t2 = t * t;
                let t3 = t2 * t;
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                h00 * y0
                    + h10 * h * self.tangents[lower]
                    + h01 * y1
                    + h11 * h * self.tangents[upper]
            }
        }
    }
}

fn monotone_tangents(times: &[f64], values: &[f64]) -> Vec<f64> {
    let count = values.len();
    if count < 2 {
        return vec![0.0; count];
    }

    let secants: Vec<f64> = (0..count - 1)
        .map(|index| {
            let h = times[index + 1] - times[index];
            if h > 0.0 {
                (values[index + 1] - values[index]) / h
            } else {
                0.0
            }
        })
        .collect();

    let mut tangents = vec![0.0; count];
    tangents[0] = secants[0];
    tangents[count - 1] = secants[count - 2];
    for index in 1..count - 1 {
        let (before, after) = (secants[index - 1], secants[index]);
        tangents[index] = if before * after <= 0.0 {
            0.0
        } else {
            (before + after) * 0.5
        };
    }

    for (index, secant) in secants.iter().enumerate() {
        if *secant == 0.0 {
            tangents[index] = 0.0;
            tangents[index + 1] = 0.0;
            continue;
        }
        let alpha = tangents[index] / secant;
        let beta = tangents[index + 1] / secant;
        if alpha < 0.0 {
            tangents[index] = 0.0;
        }
        if beta < 0.0 {
            tangents[index + 1] = 0.0;
        }
        let sum = alpha * alpha + beta * beta;
        if sum > 9.0 {
            let tau = 3.0 / sum.sqrt();
            tangents[index] = tau * alpha * secant;
            tangents[index + 1] = tau * beta * secant;
        }
    }

    tangents
}

#[derive(Debug, Clone, PartialEq)]
struct SpectlopeChannel {
    times: Vec<f64>,
    spectlopes: Vec<Spectlope>,
}

impl SpectlopeChannel {
    fn build(keyframes: &[Keyframe]) -> Self {
        let first = &keyframes[0].tone.spectlope;
        if keyframes
            .iter()
            .all(|keyframe| keyframe.tone.spectlope == *first)
        {
            return Self {
                times: vec![keyframes[0].sec],
                spectlopes: vec![first.clone()],
            };
        }
        Self {
            times: keyframes.iter().map(|keyframe| keyframe.sec).collect(),
            spectlopes: keyframes
                .iter()
                .map(|keyframe| keyframe.tone.spectlope.clone())
                .collect(),
        }
    }

    fn is_constant(&self) -> bool {
        self.spectlopes.len() == 1
    }

    fn evaluate(&self, sec: f64, fq: f64) -> (f64, f64) {
        let last = self.spectlopes.len() - 1;
        let sample = |index: usize| {
            let spectlope = &self.spectlopes[index];
            (spectlope.volume_at(fq), spectlope.noise_at(fq))
        };
        if last == 0 || sec <= self.times[0] {
            return sample(0);
        }
        if sec >= self.times[last] {
            return sample(last);
        }

        let upper = self.times.partition_point(|time| *time <= sec);
        let lower = upper - 1;
        let h = self.times[upper] - self.times[lower];
        if h <= 0.0 {
            return sample(upper);
        }
        let t = (sec - self.times[lower]) / h;
        let (v0, n0) = sample(lower);
        let (v1, n1) = sample(upper);
        (v0 + (v1 - v0) * t, n0 + (n1 - n0) * t)
    }

    fn max_fq(&self) -> f64 {
        self.spectlopes
            .iter()
            .map(Spectlope::max_fq)
            .fold(0.0, f64::max)
    }

    fn has_noise(&self) -> bool {
        self.spectlopes.iter().any(Spectlope::has_noise)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterCurve {
    pitch: Channel,
    volume: Channel,
    pan: Channel,
    even_overtone: Channel,
    odd_overtone: Channel,
    spectlope: SpectlopeChannel,
    start_sec: f64,
    end_sec: f64,
}

impl ParameterCurve {
    #[must_use]
    pub fn new(keyframes: &[Keyframe], options: CurveOptions) -> Self {
        let mut keyframes = if keyframes.is_empty() {
            vec![Keyframe::default()]
        } else {
            keyframes.to_vec()
        };
        keyframes.sort_by(|left, right| left.sec.total_cmp(&right.sec));

        let times: Vec<f64> = keyframes.iter().map(|keyframe| keyframe.sec).collect();
        let collect = |value: fn(&Keyframe) -> f64| -> Vec<f64> {
            keyframes.iter().map(value).collect()
        };

        Self {
            pitch: Channel::build(&times, collect(|k| k.pitch), options.pitch),
            volume: Channel::build(&times, collect(|k| k.stereo.volume), options.stereo),
            pan: Channel::build(&times, collect(|k| k.stereo.pan), options.stereo),
            even_overtone: Channel::build(
                &times,
                collect(|k| k.tone.overtone.even_scale),
                options.overtone,
            ),
            odd_overtone: Channel::build(
                &times,
                collect(|k| k.tone.overtone.odd_scale),
                options.overtone,
            ),
            spectlope: SpectlopeChannel::build(&keyframes),
            start_sec: times[0],
            end_sec: times[times.len() - 1],
        }
    }

    #[must_use]
    pub fn constant(pitch: f64, stereo: Stereo, tone: Tone) -> Self {
        Self::new(
            &[Keyframe {
                sec: 0.0,
                pitch,
                stereo,
                tone,
            }],
            CurveOptions::default(),
        )
    }

    #[must_use]
    pub fn evaluate(&self, channel: CurveChannel, sec: f64) -> f64 {
        self.channel(channel).evaluate(sec)
    }

    #[must_use]
    pub fn is_constant(&self, channel: CurveChannel) -> bool {
        self.channel(channel).is_constant()
    }

    fn channel(&self, channel: CurveChannel) -> &Channel {
        match channel {
            CurveChannel::Pitch => &self.pitch,
            CurveChannel::Volume => &self.volume,
            CurveChannel::Pan => &self.pan,
            CurveChannel::EvenOvertone => &self.even_overtone,
            CurveChannel::OddOvertone => &self.odd_overtone,
        }
    }

    #[must_use]
    pub fn pitch(&self, sec: f64) -> f64 {
        self.pitch.evaluate(sec)
    }

    #[must_use]
    pub fn stereo(&self, sec: f64) -> Stereo {
        Stereo {
            volume: self.volume.evaluate(sec).max(0.0),
            pan: self.pan.evaluate(sec).clamp(-1.0, 1.0),
        }
    }

    #[must_use]
    pub fn overtone(&self, sec: f64) -> Overtone {
        Overtone {
            even_scale: self.even_overtone.evaluate(sec),
            odd_scale: self.odd_overtone.evaluate(sec),
        }
    }

    #[must_use]
    pub fn spectral(&self, sec: f64, fq: f64) -> (f64, f64) {
        self.spectlope.evaluate(sec, fq)
    }

    #[must_use]
    pub fn is_pitch_constant(&self) -> bool {
        self.pitch.is_constant()
    }

    #[must_use]
    pub fn is_stereo_constant(&self) -> bool {
        self.volume.is_constant() && self.pan.is_constant()
    }

    #[must_use]
    pub fn is_overtone_constant(&self) -> bool {
        self.even_overtone.is_constant() && self.odd_overtone.is_constant()
    }

    #[must_use]
    pub fn is_spectlope_constant(&self) -> bool {
        self.spectlope.is_constant()
    }

    #[must_use]
    pub fn is_timbre_constant(&self) -> bool {
        self.is_pitch_constant() && self.is_overtone_constant() && self.is_spectlope_constant()
    }

    #[must_use]
    pub fn is_pure_tone(&self) -> bool {
        self.is_overtone_constant() && self.overtone(self.start_sec).is_pure()
    }

    #[must_use]
    pub fn spectlope_max_fq(&self) -> f64 {
        self.spectlope.max_fq()
    }

    #[must_use]
    pub fn has_noise(&self) -> bool {
        self.spectlope.has_noise()
    }

    #[must_use]
    pub fn keyframe_range(&self) -> (f64, f64) {
        (self.start_sec, self.end_sec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch_keyframe(sec: f64, pitch: f64) -> Keyframe {
        Keyframe {
            sec,
            pitch,
            ..Keyframe::default()
        }
    }

    #[test]
    fn equal_keyframes_collapse_to_constant() {
        let curve = ParameterCurve::new(
            &[pitch_keyframe(0.0, 3.0), pitch_keyframe(1.0, 3.0)],
            CurveOptions::default(),
        );
        assert!(curve.is_constant(CurveChannel::Pitch));
        assert!(curve.is_stereo_constant());
        assert!(curve.is_spectlope_constant());
        assert_eq!(curve.pitch(123.0), 3.0);
    }

    #[test]
    fn linear_pitch_interpolates_and_clamps() {
        let options = CurveOptions {
            pitch: Interpolation::Linear,
            ..CurveOptions::default()
        };
        let curve = ParameterCurve::new(
            &[pitch_keyframe(1.0, 0.0), pitch_keyframe(2.0, 12.0)],
            options,
        );
        assert!(!curve.is_pitch_constant());
        assert_eq!(curve.pitch(0.0), 0.0);
        assert!((curve.pitch(1.5) - 6.0).abs() < 1e-12);
        assert_eq!(curve.pitch(5.0), 12.0);
    }

    #[test]
    fn spline_does_not_overshoot_plateaus() {
        let curve = ParameterCurve::new(
            &[
                pitch_keyframe(0.0, 0.0),
                pitch_keyframe(1.0, 10.0),
                pitch_keyframe(2.0, 10.0),
                pitch_keyframe(3.0, 0.0),
            ],
            CurveOptions::default(),
        );
        for step in 0..=300 {
            let value = curve.pitch(f64::from(step) / 100.0);
            assert!((-1e-9..=10.0 + 1e-9).contains(&value), "overshoot {value}");
        }
        assert!((curve.pitch(1.5) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn unsorted_keyframes_are_ordered_by_time() {
        let options = CurveOptions {
            pitch: Interpolation::Linear,
            ..CurveOptions::default()
        };
        let curve = ParameterCurve::new(
            &[pitch_keyframe(2.0, 2.0), pitch_keyframe(0.0, 0.0)],
            options,
        );
        assert!((curve.pitch(1.0) - 1.0).abs() < 1e-12);
        assert_eq!(curve.keyframe_range(), (0.0, 2.0));
    }

    #[test]
    fn spectlope_blends_between_keyframes() {
        let mut quiet = Keyframe::default();
        quiet.tone.spectlope = Spectlope::flat(0.0, 0.0);
        let mut loud = Keyframe {
            sec: 1.0,
            ..Keyframe::default()
        };
        loud.tone.spectlope = Spectlope::flat(1.0, 1.0);

        let curve = ParameterCurve::new(&[quiet, loud], CurveOptions::default());
        assert!(!curve.is_spectlope_constant());
        let (volume, noise) = curve.spectral(0.25, 1_000.0);
        assert!((volume - 0.25).abs() < 1e-12);
        assert!((noise - 0.25).abs() < 1e-12);
        assert!(curve.has_noise());
    }

    #[test]
    fn empty_keyframes_fall_back_to_defaults() {
        let curve = ParameterCurve::new(&[], CurveOptions::default());
        assert_eq!(curve.pitch(0.0), 0.0);
        assert_eq!(curve.stereo(0.0), Stereo::default());
        assert!(!curve.is_pure_tone());
    }
}
