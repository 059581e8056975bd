mod additive;
mod envelope;
mod noise;
mod reverb;
mod stereo;

use tracing::{debug, warn};

use crate::{
    acoustics::envelope_samples, curve::ParameterCurve, request::RenderRequest,
    time::duration_samples,
};

pub use envelope::ClipEnvelope;
pub use noise::{RMS_WINDOW, representative_rms, rms_gain};
pub use reverb::{convolve, impulse_response};

const MAX_LOOP_SECONDS: u32 = 4;
const LOOP_CYCLE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    Mono(Vec<f64>),
    Dual([Vec<f64>; 2]),
}

impl RawSignal {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Mono(samples) => samples.len(),
            Self::Dual([left, _]) => left.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn channel(&self, index: usize) -> &[f64] {
        match self {
            Self::Mono(samples) => samples,
            Self::Dual(channels) => &channels[index.min(1)],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notewave {
    pub samples: [Vec<f64>; 2],
    pub raw: RawSignal,
    pub is_loop: bool,
    pub sample_rate: u32,
}

impl Notewave {
    #[must_use]
    pub fn silent(len: usize, is_loop: bool, sample_rate: u32) -> Self {
        Self {
            samples: [vec![0.0; len], vec![0.0; len]],
            raw: RawSignal::Mono(vec![0.0; len]),
            is_loop,
            sample_rate,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples[0].len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn left(&self) -> &[f64] {
        &self.samples[0]
    }

    #[must_use]
    pub fn right(&self) -> &[f64] {
        &self.samples[1]
    }

    #[must_use]
    pub fn repanned(&self, curve: &ParameterCurve) -> Self {
        Self {
            samples: stereo::apply(&self.raw, curve, self.sample_rate),
            raw: self.raw.clone(),
            is_loop: self.is_loop,
            sample_rate: self.sample_rate,
        }
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .all(|channel| channel.iter().all(|sample| sample.is_finite()))
    }

    #[must_use]
    pub fn peak(&self) -> f64 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .fold(0.0_f64, |peak, sample| peak.max(sample.abs()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleLayout {
    pub active: usize,
    pub release: usize,
    pub is_loop: bool,
}

impl SampleLayout {
    #[must_use]
    pub fn of(request: &RenderRequest) -> Self {
        match request.duration_sec() {
            Some(duration) => Self {
                active: duration_samples(duration, request.sample_rate),
                release: envelope_samples(request.sample_rate),
                is_loop: false,
            },
            None => Self {
                active: loop_sample_count(request.first_fq, request.sample_rate),
                release: 0,
                is_loop: true,
            },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.active + self.release
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[must_use]
pub fn loop_sample_count(first_fq: f64, sample_rate: u32) -> usize {
    let cap = f64::from(sample_rate * MAX_LOOP_SECONDS);
    let period = f64::from(sample_rate) / first_fq.max(1.0);
    let mut best = (f64::MAX, period.round().max(1.0));

    let mut cycles = 1.0;
    loop {
        let count = period * cycles;
        if count > cap {
            break;
        }
        let error = (count - count.round()).abs();
        if error < LOOP_CYCLE_TOLERANCE {
            return count.round().max(1.0) as usize;
        }
        if error < best.0 {
            best = (error, count.round().max(1.0));
        }
        cycles += 1.0;
    }

    best.1 as usize
}

/// Adds the matched noise to `tone`, then rescales the sum so its RMS equals
/// that of the full-envelope tone. Loudness does not depend on the noise
/// share or on the absolute level of the noise spectrum.
fn blend_noise(tone: &mut [f64], main: &[f64], noise: &noise::NoiseOutput) {
    let target = representative_rms(main);
    let noise_gain = rms_gain(&noise.main, target);
    for (sample, noise_sample) in tone.iter_mut().zip(&noise.noise) {
        *sample += noise_sample * noise_gain;
    }

    let gain = rms_gain(tone, target);
    for sample in tone.iter_mut() {
        *sample *= gain;
    }
}

#[must_use]
pub fn synthesize(request: &RenderRequest) -> Notewave {
    let layout = SampleLayout::of(request);
    let len = layout.len();
    let sample_rate = request.sample_rate;
    let with_noise = request.curve.has_noise();

    let tone = additive::synthesize(request, len, with_noise);
    let mut mono = tone.tone;
    if let Some(main) = tone.main.filter(|_| with_noise) {
        let noise = noise::colored(request, len, layout.is_loop);
        blend_noise(&mut mono, &main, &noise);
    }

    if !layout.is_loop {
        ClipEnvelope::new(
            envelope_samples(sample_rate),
            layout.active,
            layout.release,
        )
        .apply(&mut mono);
    }

    let raw = if layout.is_loop || request.reverb.is_empty() {
        RawSignal::Mono(mono)
    } else {
        reverb::apply(mono, &request.reverb, sample_rate)
    };

    let notewave = Notewave {
        samples: stereo::apply(&raw, &request.curve, sample_rate),
        raw,
        is_loop: layout.is_loop,
        sample_rate,
    };

    if !notewave.is_finite() {
        warn!(
            request_id = %request.id,
            samples = notewave.len(),
            "non-finite samples in notewave, replacing with silence"
        );
        return Notewave::silent(notewave.len(), notewave.is_loop, sample_rate);
    }

    debug!(
        request_id = %request.id,
        samples = notewave.len(),
        is_loop = notewave.is_loop,
        noise = with_noise,
        "notewave synthesized"
    );
    notewave
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Overtone, Reflection, Reverb, Spectlope, Tone},
        request::RenderRequest,
    };

    fn pure(fq: f64, duration: f64) -> RenderRequest {
        RenderRequest::builder(fq)
            .duration_sec(duration)
            .tone(Tone {
                overtone: Overtone::pure(),
                spectlope: Spectlope::flat(0.5, 0.0),
            })
            .build()
    }

    #[test]
    fn loop_length_is_a_whole_number_of_cycles() {
        let count = loop_sample_count(440.0, 48_000);
        assert_eq!(count, 1_200);
        let cycles = count as f64 * 440.0 / 48_000.0;
        assert!((cycles - cycles.round()).abs() < 1e-9);
    }

    #[test]
    fn one_shot_length_includes_release_tail() {
        let wave = synthesize(&pure(440.0, 0.5));
        assert_eq!(wave.len(), 24_000 + 750);
        assert!(!wave.is_loop);
        assert_eq!(wave.left()[0], 0.0);
    }

    #[test]
    fn reverb_extends_by_impulse_length_minus_one() {
        let reverb = Reverb {
            early: vec![Reflection {
                delay_sec: 0.01,
                gain: 0.5,
            }],
            ..Reverb::empty()
        };
        let dry = synthesize(&pure(440.0, 0.25));
        let wet_request = RenderRequest::builder(440.0)
            .duration_sec(0.25)
            .tone(Tone {
                overtone: Overtone::pure(),
                spectlope: Spectlope::flat(0.5, 0.0),
            })
            .reverb(reverb.clone())
            .build();
        let wet = synthesize(&wet_request);
        let ir = impulse_response(&reverb, 48_000, 0);
        assert_eq!(ir.len(), 481);
        assert_eq!(wet.len(), dry.len() + ir.len() - 1);
    }

    #[test]
    fn repanning_matches_fresh_synthesis() {
        let centre = pure(440.0, 0.1);
        let panned = RenderRequest::builder(440.0)
            .duration_sec(0.1)
            .tone(Tone {
                overtone: Overtone::pure(),
                spectlope: Spectlope::flat(0.5, 0.0),
            })
            .stereo(crate::model::Stereo::new(0.5, 0.5))
            .build();

        let repanned = synthesize(&centre).repanned(&panned.curve);
        let fresh = synthesize(&panned);
        for (left, right) in repanned.left().iter().zip(fresh.left()) {
            assert!((left - right).abs() < 1e-12);
        }
        for (left, right) in repanned.right().iter().zip(fresh.right()) {
            assert!((left - right).abs() < 1e-12);
        }
    }

    #[test]
    fn synthesis_is_reproducible_for_noisy_notes() {
        let request = RenderRequest::builder(220.0)
            .duration_sec(0.2)
            .tone(Tone {
                overtone: Overtone::default(),
                spectlope: Spectlope::flat(0.5, 0.5),
            })
            .build();
        assert_eq!(synthesize(&request), synthesize(&request));
    }

    #[test]
    fn noise_spectrum_scale_does_not_change_loudness() {
        let request = RenderRequest::builder(330.0)
            .duration_sec(0.5)
            .tone(Tone {
                overtone: Overtone::default(),
                spectlope: Spectlope::flat(0.4, 1.0),
            })
            .build();
        let len = SampleLayout::of(&request).len();
        let main = additive::synthesize(&request, len, true)
            .main
            .expect("main signal requested");
        let colored = noise::colored(&request, len, false);

        let blended_rms = |k: f64| {
            let scaled = noise::NoiseOutput {
                noise: colored.noise.iter().map(|sample| sample * k).collect(),
                main: colored.main.iter().map(|sample| sample * k).collect(),
            };
            let mut mono = vec![0.0; len];
            blend_noise(&mut mono, &main, &scaled);
            representative_rms(&mono)
        };

        let baseline = blended_rms(1.0);
        assert!(baseline > 0.0);
        assert!((baseline - representative_rms(&main)).abs() < 1e-9);
        for k in [0.01, 0.5, 3.0, 250.0] {
            assert!(
                (blended_rms(k) - baseline).abs() < 1e-9 * baseline.max(1.0),
                "k = {k}"
            );
        }

        let noise_only = synthesize(&request);
        let tonal_only = synthesize(
            &RenderRequest::builder(330.0)
                .duration_sec(0.5)
                .tone(Tone {
                    overtone: Overtone::default(),
                    spectlope: Spectlope::flat(0.4, 0.0),
                })
                .build(),
        );
        let ratio = representative_rms(noise_only.left()) / representative_rms(tonal_only.left());
        assert!((ratio - 1.0).abs() < 0.05, "ratio {ratio}");
    }
}
