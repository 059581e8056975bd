use realfft::RealFftPlanner;
use scorewave_core::{
    mixdown::mix_notewaves,
    model::{Overtone, Reflection, Reverb, Spectlope, Stereo, Tone},
    request::RenderRequest,
    synth::{ClipEnvelope, impulse_response, representative_rms, synthesize},
};

fn tone(volume: f64, noise: f64) -> Tone {
    Tone {
        overtone: Overtone::pure(),
        spectlope: Spectlope::flat(volume, noise),
    }
}

fn dominant_fq(samples: &[f64], sample_rate: u32) -> f64 {
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut input = samples.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut input, &mut spectrum)
        .expect("fft buffers should match the plan");
    let (bin, _) = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|left, right| left.1.norm().total_cmp(&right.1.norm()))
        .expect("spectrum should not be empty");
    bin as f64 * f64::from(sample_rate) / samples.len() as f64
}

#[test]
fn pure_tone_peaks_at_its_fundamental() {
    for fq in [220.0, 440.0, 1_000.0] {
        let request = RenderRequest::builder(fq)
            .duration_sec(1.0)
            .tone(tone(0.5, 0.0))
            .build();
        let notewave = synthesize(&request);
        let detected = dominant_fq(&notewave.left()[..48_000], 48_000);
        assert!(
            (detected - fq).abs() <= 1.0,
            "expected {fq} Hz, found {detected} Hz"
        );
    }
}

#[test]
fn one_shots_start_and_end_silent() {
    let request = RenderRequest::builder(330.0)
        .duration_sec(0.3)
        .tone(Tone {
            overtone: Overtone::default(),
            spectlope: Spectlope::flat(0.4, 0.3),
        })
        .build();
    let notewave = synthesize(&request);
    let last = notewave.len() - 1;

    assert_eq!(notewave.left()[0], 0.0);
    assert_eq!(notewave.right()[0], 0.0);
    assert!(notewave.left()[last].abs() < 5e-3);
    assert!(notewave.right()[last].abs() < 5e-3);
    assert!(notewave.peak() > 0.0);
}

#[test]
fn loudness_is_independent_of_the_noise_share() {
    let level = |noise: f64| {
        let notewave = synthesize(
            &RenderRequest::builder(440.0)
                .duration_sec(0.5)
                .tone(tone(0.3, noise))
                .build(),
        );
        representative_rms(notewave.left())
    };

    let tonal = level(0.0);
    assert!(tonal > 0.0);
    for noise in [0.25, 0.5, 0.75, 1.0] {
        let ratio = level(noise) / tonal;
        assert!((ratio - 1.0).abs() < 0.05, "noise {noise}: ratio {ratio}");
    }
}

#[test]
fn reverb_appends_impulse_length_minus_one() {
    let reverb = Reverb {
        early: vec![
            Reflection {
                delay_sec: 0.005,
                gain: 0.4,
            },
            Reflection {
                delay_sec: 0.02,
                gain: 0.2,
            },
        ],
        ..Reverb::empty()
    };
    let builder = RenderRequest::builder(440.0)
        .duration_sec(0.2)
        .tone(tone(0.5, 0.0));
    let dry = synthesize(&builder.clone().build());
    let wet = synthesize(&builder.reverb(reverb.clone()).build());
    let response = impulse_response(&reverb, 48_000, 0);

    assert_eq!(response.len(), 961);
    assert_eq!(wet.len(), dry.len() + response.len() - 1);
}

#[test]
fn disjoint_notes_mix_additively() {
    let low = synthesize(
        &RenderRequest::builder(220.0)
            .duration_sec(0.1)
            .tone(tone(0.4, 0.0))
            .stereo(Stereo::new(1.0, -0.5))
            .build(),
    );
    let high = synthesize(
        &RenderRequest::builder(660.0)
            .duration_sec(0.1)
            .tone(tone(0.4, 0.0))
            .build(),
    );

    let offset = 6_000_i64;
    let mix = mix_notewaves(&[(0, &low), (offset, &high)], 48_000);
    assert_eq!(mix.start_sample, 0);
    assert_eq!(mix.len(), offset as usize + high.len());

    for index in 0..mix.len() {
        let mut expected = (0.0, 0.0);
        if let Some(sample) = low.left().get(index) {
            expected.0 += sample;
            expected.1 += low.right()[index];
        }
        if let Some(shifted) = index.checked_sub(offset as usize) {
            expected.0 += high.left()[shifted];
            expected.1 += high.right()[shifted];
        }
        assert_eq!(mix.frame_at(index as i64), Some(expected));
    }
}

#[test]
fn loops_hold_whole_cycles_and_skip_the_envelope() {
    let request = RenderRequest::builder(440.0)
        .looping()
        .tone(tone(0.5, 0.0))
        .build();
    let notewave = synthesize(&request);
    assert!(notewave.is_loop);
    assert_eq!(notewave.len(), 1_200);
    assert!(notewave.left()[1].abs() > 0.0);
}

#[test]
fn clip_envelope_ramps_are_strictly_monotonic() {
    let envelope = ClipEnvelope::new(750, 24_000, 750);
    assert_eq!(envelope.gain(0), 0.0);
    assert_eq!(envelope.gain(750), 1.0);
    assert_eq!(envelope.gain(24_000), 1.0);
    assert_eq!(envelope.gain(envelope.end()), 0.0);

    for index in 0..750 {
        assert!(envelope.gain(index) < envelope.gain(index + 1));
    }
    for index in 24_000..envelope.end() {
        assert!(envelope.gain(index) > envelope.gain(index + 1));
    }
}
