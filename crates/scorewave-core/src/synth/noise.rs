use std::f64::consts::TAU;

use rand::{Rng, SeedableRng, rngs::SmallRng};
use realfft::{RealFftPlanner, num_complex::Complex};

use crate::{
    acoustics::{loudness_contour_gain, nyquist_fade},
    request::RenderRequest,
};

pub(super) const NOISE_WINDOW: usize = 1024;
pub(super) const NOISE_HOP: usize = NOISE_WINDOW / 4;
const HANN_SQUARED_OVERLAP: f64 = 1.5;

pub const RMS_WINDOW: usize = 2048;
const RMS_HOP: usize = RMS_WINDOW / 2;

pub(crate) struct GaussianSource {
    rng: SmallRng,
    spare: Option<f64>,
}

impl GaussianSource {
    pub(crate) fn new(seeds: (u64, u64)) -> Self {
        let mut seed = <SmallRng as SeedableRng>::Seed::default();
        let words = [
            seeds.0,
            seeds.1,
            seeds.0.rotate_left(32) ^ 0x9e37_79b9_7f4a_7c15,
            seeds.1.rotate_left(32) ^ 0xd1b5_4a32_d192_ed03,
        ];
        for (chunk, word) in seed.as_mut().chunks_mut(8).zip(words.iter().cycle()) {
            let bytes = word.to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
        Self {
            rng: SmallRng::from_seed(seed),
            spare: None,
        }
    }

    pub(crate) fn next_gaussian(&mut self) -> f64 {
        if let Some(spare) = self.spare.take() {
            return spare;
        }
        let u1 = loop {
            let value: f64 = self.rng.random();
            if value > f64::MIN_POSITIVE {
                break value;
            }
        };
        let u2: f64 = self.rng.random();
        let radius = (-2.0 * u1.ln()).sqrt();
        let angle = TAU * u2;
        self.spare = Some(radius * angle.sin());
        radius * angle.cos()
    }

    pub(crate) fn take(&mut self, len: usize) -> Vec<f64> {
        (0..len).map(|_| self.next_gaussian()).collect()
    }
}

pub(super) struct NoiseOutput {
    pub noise: Vec<f64>,
    pub main: Vec<f64>,
}

fn periodic_hann(len: usize) -> Vec<f64> {
    (0..len)
        .map(|index| 0.5 - 0.5 * (TAU * index as f64 / len as f64).cos())
        .collect()
}

fn bin_gains(request: &RenderRequest, sec: f64, noise_gains: &mut [f64], main_gains: &mut [f64]) {
    let bin_width = f64::from(request.sample_rate) / NOISE_WINDOW as f64;
    for (bin, (noise_gain, main_gain)) in noise_gains
        .iter_mut()
        .zip(main_gains.iter_mut())
        .enumerate()
    {
        if bin == 0 {
            *noise_gain = 0.0;
            *main_gain = 0.0;
            continue;
        }
        let fq = bin as f64 * bin_width;
        let (volume, noise) = request.curve.spectral(sec, fq);
        let base = loudness_contour_gain(fq) * volume * nyquist_fade(fq, request.sample_rate);
        *noise_gain = base * noise;
        *main_gain = base;
    }
}

/// Overlap-add STFT colouring of seeded white Gaussian noise. Loop requests
/// wrap frames around the buffer end so the noise is seamless.
pub(super) fn colored(request: &RenderRequest, len: usize, circular: bool) -> NoiseOutput {
    let mut output = NoiseOutput {
        noise: vec![0.0; len],
        main: vec![0.0; len],
    };
    if len == 0 {
        return output;
    }

    let window = periodic_hann(NOISE_WINDOW);
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(NOISE_WINDOW);
    let ifft = planner.plan_fft_inverse(NOISE_WINDOW);

    let mut frame = fft.make_input_vec();
    let mut spectrum = fft.make_output_vec();
    let mut shaped = fft.make_output_vec();
    let mut restored = ifft.make_output_vec();
    let bins = spectrum.len();
    let mut noise_gains = vec![0.0; bins];
    let mut main_gains = vec![0.0; bins];

    let sr = f64::from(request.sample_rate);
    let constant = request.curve.is_spectlope_constant();
    if constant {
        bin_gains(request, 0.0, &mut noise_gains, &mut main_gains);
    }

    let mut source = GaussianSource::new(request.seeds);
    let lead = (NOISE_WINDOW - NOISE_HOP) as i64;
    let (white, first_position) = if circular {
        (source.take(len), 0_i64)
    } else {
        (source.take(len + NOISE_WINDOW * 2), -lead)
    };
    let scale = 1.0 / (NOISE_WINDOW as f64 * HANN_SQUARED_OVERLAP);

    let mut position = first_position;
    while position < len as i64 {
        for (offset, (slot, weight)) in frame.iter_mut().zip(&window).enumerate() {
            let index = position + offset as i64;
            let sample = if circular {
                white[index.rem_euclid(len as i64) as usize]
            } else {
                white[(index + NOISE_WINDOW as i64) as usize]
            };
            *slot = sample * weight;
        }

        if !constant {
            let centre = (position + (NOISE_WINDOW / 2) as i64).max(0) as f64 / sr;
            bin_gains(request, centre, &mut noise_gains, &mut main_gains);
        }

        // realfft only errors on mismatched buffer lengths, which are fixed here.
        if fft.process(&mut frame, &mut spectrum).is_err() {
            break;
        }

        for (gains, target) in [
            (&noise_gains, &mut output.noise),
            (&main_gains, &mut output.main),
        ] {
            for ((bin, value), gain) in shaped.iter_mut().zip(&spectrum).zip(gains.iter()) {
                *bin = *value * *gain;
            }
            shaped[0] = Complex::new(0.0, 0.0);
            if let Some(last) = shaped.last_mut() {
                last.im = 0.0;
            }
            if ifft.process(&mut shaped, &mut restored).is_err() {
                continue;
            }

            for (offset, (sample, weight)) in restored.iter().zip(&window).enumerate() {
                let index = position + offset as i64;
                let target_index = if circular {
                    index.rem_euclid(len as i64) as usize
                } else if (0..len as i64).contains(&index) {
                    index as usize
                } else {
                    continue;
                };
                target[target_index] += sample * weight * scale;
            }
        }

        position += NOISE_HOP as i64;
    }

    output
}

fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|sample| sample * sample).sum::<f64>() / samples.len() as f64).sqrt()
}

/// RMS of the loudest analysis window; whole-signal RMS for signals shorter
/// than one window.
#[must_use]
pub fn representative_rms(samples: &[f64]) -> f64 {
    if samples.len() <= RMS_WINDOW {
        return rms(samples);
    }

    let mut loudest = 0.0_f64;
    let mut start = 0;
    while start + RMS_WINDOW <= samples.len() {
        loudest = loudest.max(rms(&samples[start..start + RMS_WINDOW]));
        start += RMS_HOP;
    }
    loudest
}

#[must_use]
pub fn rms_gain(signal: &[f64], reference_rms: f64) -> f64 {
    let current = representative_rms(signal);
    if current <= f64::EPSILON || !reference_rms.is_finite() {
        return 0.0;
    }
    reference_rms / current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_source_is_reproducible_and_roughly_standard() {
        let first = GaussianSource::new((1, 2)).take(20_000);
        let second = GaussianSource::new((1, 2)).take(20_000);
        assert_eq!(first, second);

        let other = GaussianSource::new((2, 1)).take(16);
        assert_ne!(first[..16], other[..]);

        let mean = first.iter().sum::<f64>() / first.len() as f64;
        let variance = first.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / first.len() as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((variance - 1.0).abs() < 0.1, "variance {variance}");
    }

    #[test]
    fn hann_overlap_sum_is_constant() {
        let window = periodic_hann(NOISE_WINDOW);
        for offset in 0..NOISE_HOP {
            let sum: f64 = (0..4)
                .map(|frame| window[offset + frame * NOISE_HOP].powi(2))
                .sum();
            assert!((sum - HANN_SQUARED_OVERLAP).abs() < 1e-12);
        }
    }

    #[test]
    fn representative_rms_uses_whole_signal_when_short() {
        let samples = vec![0.5; 100];
        assert!((representative_rms(&samples) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn representative_rms_tracks_the_loudest_window() {
        let mut samples = vec![0.0; RMS_WINDOW * 4];
        for sample in &mut samples[RMS_WINDOW..RMS_WINDOW * 2] {
            *sample = 0.25;
        }
        assert!((representative_rms(&samples) - 0.25).abs() < 1e-12);
    }
}
