use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::acoustics::{MIN_DB, db_from_volume};

const LOUDNESS_BLOCK_SEC: f64 = 0.4;
const LOUDNESS_STEP_SEC: f64 = 0.1;
const ABSOLUTE_GATE_LUFS: f64 = -70.0;
const RELATIVE_GATE_LU: f64 = -10.0;
const LOUDNESS_OFFSET: f64 = -0.691;
// K-weighting pre-filter (high shelf) and RLB high-pass.
const SHELF_FQ: f64 = 1_681.974_450_955_533;
const SHELF_GAIN_DB: f64 = 3.999_843_853_973_347;
const SHELF_Q: f64 = 0.707_175_236_955_419_6;
const HIGH_PASS_FQ: f64 = 38.135_470_876_024_44;
const HIGH_PASS_Q: f64 = 0.500_327_037_323_877_3;

/// Look-ahead compressor with a piecewise-linear gain envelope.
///
/// Every region where the stereo peak exceeds `threshold` is held at the
/// gain that brings its loudest sample down to the threshold; the gain ramps
/// linearly from unity over `attack` samples before the region and back over
/// `release` samples after it. Overlapping ramps combine by taking the
/// lower gain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compressor {
    threshold: f64,
    attack: usize,
    release: usize,
}

impl Compressor {
    #[must_use]
    pub fn new(threshold: f64, attack_ms: f64, release_ms: f64, sample_rate: u32) -> Self {
        let to_samples =
            |ms: f64| (ms.max(0.0) * f64::from(sample_rate) / 1_000.0).round() as usize;
        Self {
            threshold: threshold.max(f64::EPSILON),
            attack: to_samples(attack_ms),
            release: to_samples(release_ms),
        }
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    #[must_use]
    pub fn gain_envelope(&self, left: &[f64], right: &[f64]) -> Vec<f64> {
        let len = left.len().max(right.len());
        let peak_at = |index: usize| {
            let l = left.get(index).map_or(0.0, |sample| sample.abs());
            let r = right.get(index).map_or(0.0, |sample| sample.abs());
            l.max(r)
        };

        let mut envelope = vec![1.0_f64; len];
        let mut index = 0;
        while index < len {
            if peak_at(index) <= self.threshold {
                index += 1;
                continue;
            }

            let start = index;
            let mut loudest = 0.0_f64;
            while index < len && peak_at(index) > self.threshold {
                loudest = loudest.max(peak_at(index));
                index += 1;
            }
            let end = index;
            let gain = self.threshold / loudest;

            for slot in &mut envelope[start..end] {
                *slot = slot.min(gain);
            }
            for step in 1..self.attack.min(start + 1) {
                let ramp = gain + (1.0 - gain) * step as f64 / self.attack as f64;
                let slot = &mut envelope[start - step];
                *slot = slot.min(ramp);
            }
            for step in 0..self.release.saturating_sub(1).min(len - end) {
                let ramp = gain + (1.0 - gain) * (step + 1) as f64 / self.release as f64;
                let slot = &mut envelope[end + step];
                *slot = slot.min(ramp);
            }
        }
        envelope
    }

    pub fn apply(&self, left: &mut [f64], right: &mut [f64]) -> bool {
        let envelope = self.gain_envelope(left, right);
        let mut reduced = false;
        for (index, gain) in envelope.iter().enumerate() {
            if *gain < 1.0 {
                reduced = true;
            }
            if let Some(sample) = left.get_mut(index) {
                *sample *= gain;
            }
            if let Some(sample) = right.get_mut(index) {
                *sample *= gain;
            }
        }
        reduced
    }
}

fn k_weighting(sample_rate: u32) -> Option<[DirectForm2Transposed<f64>; 2]> {
    let fs = f64::from(sample_rate).hz();
    let shelf =
        Coefficients::<f64>::from_params(Type::HighShelf(SHELF_GAIN_DB), fs, SHELF_FQ.hz(), SHELF_Q)
            .ok()?;
    let high_pass =
        Coefficients::<f64>::from_params(Type::HighPass, fs, HIGH_PASS_FQ.hz(), HIGH_PASS_Q)
            .ok()?;
    Some([
        DirectForm2Transposed::<f64>::new(shelf),
        DirectForm2Transposed::<f64>::new(high_pass),
    ])
}

fn weighted_squares(samples: &[f64], sample_rate: u32) -> Vec<f64> {
    match k_weighting(sample_rate) {
        Some([mut shelf, mut high_pass]) => samples
            .iter()
            .map(|sample| high_pass.run(shelf.run(*sample)).powi(2))
            .collect(),
        None => samples.iter().map(|sample| sample * sample).collect(),
    }
}

#[must_use]
pub fn integrated_loudness(left: &[f64], right: &[f64], sample_rate: u32) -> f64 {
    let len = left.len().min(right.len());
    if len == 0 || sample_rate == 0 {
        return f64::NEG_INFINITY;
    }

    let squares = [
        weighted_squares(&left[..len], sample_rate),
        weighted_squares(&right[..len], sample_rate),
    ];
    let sr = f64::from(sample_rate);
    let block = ((LOUDNESS_BLOCK_SEC * sr).round() as usize).clamp(1, len);
    let step = ((LOUDNESS_STEP_SEC * sr).round() as usize).max(1);

    let mut powers = Vec::new();
    let mut start = 0;
    while start + block <= len {
        let power: f64 = squares
            .iter()
            .map(|channel| channel[start..start + block].iter().sum::<f64>() / block as f64)
            .sum();
        powers.push(power);
        start += step;
    }

    let loudness = |power: f64| LOUDNESS_OFFSET + 10.0 * power.log10();
    let gated_mean = |threshold: f64| {
        let kept: Vec<f64> = powers
            .iter()
            .copied()
            .filter(|power| *power > 0.0 && loudness(*power) > threshold)
            .collect();
        (!kept.is_empty()).then(|| kept.iter().sum::<f64>() / kept.len() as f64)
    };

    let Some(absolute) = gated_mean(ABSOLUTE_GATE_LUFS) else {
        return f64::NEG_INFINITY;
    };
    let relative_gate = loudness(absolute) + RELATIVE_GATE_LU;
    gated_mean(relative_gate.max(ABSOLUTE_GATE_LUFS)).map_or(f64::NEG_INFINITY, loudness)
}

pub fn normalize_loudness(
    left: &mut [f64],
    right: &mut [f64],
    sample_rate: u32,
    limit_lufs: f64,
) -> f64 {
    let loudness = integrated_loudness(left, right, sample_rate);
    if !loudness.is_finite() || loudness <= limit_lufs {
        return 1.0;
    }
    let gain = 10.0_f64.powf((limit_lufs - loudness) / 20.0);
    for sample in left.iter_mut().chain(right.iter_mut()) {
        *sample *= gain;
    }
    gain
}

pub fn hard_clip(samples: &mut [f64], ceiling: f64) {
    let ceiling = ceiling.abs();
    for sample in samples {
        *sample = sample.clamp(-ceiling, ceiling);
    }
}

pub fn apply_edge_fades(left: &mut [f64], right: &mut [f64], fade: usize) {
    for channel in [left, right] {
        let len = channel.len();
        let fade = fade.min(len / 2);
        if fade == 0 {
            continue;
        }
        for index in 0..fade {
            let gain = index as f64 / fade as f64;
            channel[index] *= gain;
            channel[len - 1 - index] *= gain;
        }
    }
}

#[must_use]
pub fn peak(left: &[f64], right: &[f64]) -> f64 {
    left.iter()
        .chain(right)
        .fold(0.0_f64, |peak, sample| peak.max(sample.abs()))
}

#[must_use]
pub fn peak_db(left: &[f64], right: &[f64]) -> f64 {
    let peak = peak(left, right);
    if peak <= 0.0 {
        MIN_DB
    } else {
        db_from_volume(peak)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakLimiter {
    ceiling: f32,
    release_coeff: f32,
    gain: f32,
}

impl PeakLimiter {
    #[must_use]
    pub fn new(ceiling: f32, release_ms: f32, sample_rate: u32) -> Self {
        let release_samples = (release_ms.max(0.1) * sample_rate as f32 / 1_000.0).max(1.0);
        Self {
            ceiling: ceiling.abs().max(f32::EPSILON),
            release_coeff: 1.0 - (-1.0 / release_samples).exp(),
            gain: 1.0,
        }
    }

    #[must_use]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }

    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let frame_peak = l.abs().max(r.abs());
            self.gain += (1.0 - self.gain) * self.release_coeff;
            if frame_peak * self.gain > self.ceiling {
                self.gain = self.ceiling / frame_peak;
            }
            *l *= self.gain;
            *r *= self.gain;
        }
    }
}
