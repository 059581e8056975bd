use std::f64::consts::TAU;

use crate::{
    acoustics::{clamp_fq, cutoff_fq, loudness_contour_gain, nyquist_fade, phase_increment},
    curve::ParameterCurve,
    request::RenderRequest,
};

const FRAME_HOP: usize = 512;
const F_ALPHA: f64 = 1.0;

pub(super) struct ToneOutput {
    pub tone: Vec<f64>,
    pub main: Option<Vec<f64>>,
}

pub(super) fn synthesize(request: &RenderRequest, len: usize, with_main: bool) -> ToneOutput {
    let curve = &request.curve;
    if curve.is_pure_tone() && curve.is_pitch_constant() && curve.is_spectlope_constant() {
        pure_tone(request, len, with_main)
    } else {
        harmonic_bank(request, len, with_main)
    }
}

fn fundamental(request: &RenderRequest, sec: f64) -> f64 {
    clamp_fq(
        request.root_fq * 2.0_f64.powf(request.curve.pitch(sec) / 12.0),
        request.sample_rate,
    )
}

fn pure_tone(request: &RenderRequest, len: usize, with_main: bool) -> ToneOutput {
    let fq = fundamental(request, 0.0);
    let (volume, noise) = request.curve.spectral(0.0, fq);
    let main_gain = loudness_contour_gain(fq) * volume * nyquist_fade(fq, request.sample_rate);
    let tone_gain = main_gain * (1.0 - noise);
    let increment = phase_increment(fq, request.sample_rate);

    let mut tone = Vec::with_capacity(len);
    let mut phase = 0.0_f64;
    for _ in 0..len {
        tone.push(phase.sin() * tone_gain);
        phase += increment;
        if phase >= TAU {
            phase -= TAU;
        }
    }

    let main = with_main.then(|| {
        if tone_gain == 0.0 {
            let mut phase = 0.0_f64;
            (0..len)
                .map(|_| {
                    let sample = phase.sin() * main_gain;
                    phase += increment;
                    if phase >= TAU {
                        phase -= TAU;
                    }
                    sample
                })
                .collect()
        } else {
            let ratio = main_gain / tone_gain;
            tone.iter().map(|sample| sample * ratio).collect()
        }
    });

    ToneOutput { tone, main }
}

#[derive(Default)]
struct SpectrumFrame {
    tone: Vec<f64>,
    main: Vec<f64>,
}

impl SpectrumFrame {
    fn compute(&mut self, request: &RenderRequest, sec: f64, limit_fq: f64, with_main: bool) {
        self.tone.clear();
        self.main.clear();

        let curve: &ParameterCurve = &request.curve;
        let f0 = fundamental(request, sec);
        let count = (limit_fq / f0).floor().max(0.0) as usize;
        if count == 0 {
            return;
        }

        let overtone = curve.overtone(sec);
        let shape = |harmonic: usize| {
            overtone.scale(harmonic) * (harmonic as f64).powf(-F_ALPHA * 0.5)
        };
        let power: f64 = (1..=count).map(|harmonic| shape(harmonic).powi(2)).sum();
        let normalisation = if power > 0.0 { power.sqrt().recip() } else { 0.0 };

        for harmonic in 1..=count {
            let fq = f0 * harmonic as f64;
            let (volume, noise) = curve.spectral(sec, fq);
            let base = loudness_contour_gain(fq)
                * volume
                * shape(harmonic)
                * normalisation
                * nyquist_fade(fq, request.sample_rate);
            self.tone.push(base * (1.0 - noise));
            if with_main {
                self.main.push(base);
            }
        }
    }
}

fn harmonic_bank(request: &RenderRequest, len: usize, with_main: bool) -> ToneOutput {
    let sample_rate = request.sample_rate;
    let sr = f64::from(sample_rate);
    let curve = &request.curve;
    let cutoff = cutoff_fq(sample_rate);
    let limit_fq = cutoff.min(curve.spectlope_max_fq());
    let static_timbre = curve.is_timbre_constant();
    let static_pitch = curve.is_pitch_constant();
    let constant_fq = fundamental(request, 0.0);

    let mut current = SpectrumFrame::default();
    let mut next = SpectrumFrame::default();
    current.compute(request, 0.0, limit_fq, with_main);
    if !static_timbre {
        next.compute(request, FRAME_HOP as f64 / sr, limit_fq, with_main);
    }
    let mut frame_index = 0_usize;

    let mut tone = Vec::with_capacity(len);
    let mut main = Vec::with_capacity(if with_main { len } else { 0 });
    let mut phase = 0.0_f64;

    for index in 0..len {
        let sec = index as f64 / sr;
        let fq = if static_pitch {
            constant_fq
        } else {
            fundamental(request, sec)
        };

        let frac = if static_timbre {
            0.0
        } else {
            let wanted = index / FRAME_HOP;
            while frame_index < wanted {
                frame_index += 1;
                std::mem::swap(&mut current, &mut next);
                next.compute(
                    request,
                    ((frame_index + 1) * FRAME_HOP) as f64 / sr,
                    limit_fq,
                    with_main,
                );
            }
            (index % FRAME_HOP) as f64 / FRAME_HOP as f64
        };

        let upper = if static_timbre {
            current.tone.len()
        } else {
            current.tone.len().max(next.tone.len())
        };
        let audible = ((cutoff / fq).floor() as usize).min(upper);

        let (sin1, cos1) = phase.sin_cos();
        let (mut sin_n, mut cos_n) = (sin1, cos1);
        let mut tone_sum = 0.0;
        let mut main_sum = 0.0;
        for harmonic in 0..audible {
            let tone_amp = blend(&current.tone, &next.tone, harmonic, frac);
            tone_sum += tone_amp * sin_n;
            if with_main {
                main_sum += blend(&current.main, &next.main, harmonic, frac) * sin_n;
            }
            let advanced_sin = sin_n * cos1 + cos_n * sin1;
            cos_n = cos_n * cos1 - sin_n * sin1;
            sin_n = advanced_sin;
        }

        tone.push(tone_sum);
        if with_main {
            main.push(main_sum);
        }

        phase += phase_increment(fq, sample_rate);
        if phase >= TAU {
            phase -= TAU;
        }
    }

    ToneOutput {
        tone,
        main: with_main.then_some(main),
    }
}

fn blend(current: &[f64], next: &[f64], harmonic: usize, frac: f64) -> f64 {
    let from = current.get(harmonic).copied().unwrap_or(0.0);
    if frac == 0.0 {
        return from;
    }
    let to = next.get(harmonic).copied().unwrap_or(0.0);
    from + (to - from) * frac
}
