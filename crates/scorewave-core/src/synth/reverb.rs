use realfft::RealFftPlanner;

use super::{RawSignal, noise::GaussianSource};
use crate::{model::Reverb, time::seconds_to_samples};

const DECAY_60_DB: f64 = 6.907_755_278_982_137;
const STEREO_SPREAD: f64 = 1.07;

#[must_use]
pub fn impulse_response(reverb: &Reverb, sample_rate: u32, channel: usize) -> Vec<f64> {
    if reverb.is_empty() {
        return vec![1.0];
    }

    let spread = if reverb.stereo && channel == 1 {
        STEREO_SPREAD
    } else {
        1.0
    };
    let taps: Vec<(usize, f64)> = reverb
        .early
        .iter()
        .filter(|reflection| reflection.delay_sec > 0.0)
        .map(|reflection| {
            let delay = seconds_to_samples(reflection.delay_sec * spread, sample_rate).max(1);
            (delay as usize, reflection.gain)
        })
        .collect();

    let late_start = seconds_to_samples(reverb.late_predelay_sec.max(0.0), sample_rate) as usize;
    let late_end = if reverb.late_gain == 0.0 {
        0
    } else {
        seconds_to_samples(reverb.late_duration_sec.max(0.0), sample_rate) as usize
    };

    let len = taps
        .iter()
        .map(|(delay, _)| delay + 1)
        .chain(std::iter::once(late_end))
        .fold(1, usize::max);
    let mut response = vec![0.0; len];
    response[0] = 1.0;
    for (delay, gain) in taps {
        response[delay] += gain;
    }

    if late_end > late_start {
        let seeds = (reverb.seed, reverb.seed ^ (channel as u64 + 1));
        let mut source = GaussianSource::new(seeds);
        let decay_sec = reverb.late_decay_sec.max(1e-3);
        let sr = f64::from(sample_rate);
        for (offset, tap) in response[late_start..late_end].iter_mut().enumerate() {
            let elapsed = offset as f64 / sr;
            let decay = (-DECAY_60_DB * elapsed / decay_sec).exp();
            *tap += reverb.late_gain * source.next_gaussian() * decay;
        }
    }

    response
}

#[must_use]
pub fn convolve(signal: &[f64], response: &[f64]) -> Vec<f64> {
    if signal.is_empty() || response.is_empty() {
        return Vec::new();
    }
    let out_len = signal.len() + response.len() - 1;
    if response.len() == 1 {
        return signal.iter().map(|sample| sample * response[0]).collect();
    }

    let fft_len = out_len.next_power_of_two();
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(fft_len);
    let ifft = planner.plan_fft_inverse(fft_len);

    let mut padded_signal = fft.make_input_vec();
    padded_signal[..signal.len()].copy_from_slice(signal);
    let mut padded_response = fft.make_input_vec();
    padded_response[..response.len()].copy_from_slice(response);

    let mut signal_spectrum = fft.make_output_vec();
    let mut response_spectrum = fft.make_output_vec();
    let mut output = ifft.make_output_vec();
    let transformed = fft
        .process(&mut padded_signal, &mut signal_spectrum)
        .and_then(|()| fft.process(&mut padded_response, &mut response_spectrum));
    if transformed.is_err() {
        return vec![0.0; out_len];
    }

    for (bin, response_bin) in signal_spectrum.iter_mut().zip(&response_spectrum) {
        *bin *= *response_bin;
    }
    signal_spectrum[0].im = 0.0;
    if let Some(last) = signal_spectrum.last_mut() {
        last.im = 0.0;
    }
    if ifft.process(&mut signal_spectrum, &mut output).is_err() {
        return vec![0.0; out_len];
    }

    let scale = 1.0 / fft_len as f64;
    output.truncate(out_len);
    for sample in &mut output {
        *sample *= scale;
    }
    output
}

pub(super) fn apply(mono: Vec<f64>, reverb: &Reverb, sample_rate: u32) -> RawSignal {
    let left_response = impulse_response(reverb, sample_rate, 0);
    if reverb.stereo {
        let right_response = impulse_response(reverb, sample_rate, 1);
        let (left, right) = pad_to_same_length(
            convolve(&mono, &left_response),
            convolve(&mono, &right_response),
        );
        RawSignal::Dual([left, right])
    } else {
        RawSignal::Mono(convolve(&mono, &left_response))
    }
}

fn pad_to_same_length(mut left: Vec<f64>, mut right: Vec<f64>) -> (Vec<f64>, Vec<f64>) {
    let len = left.len().max(right.len());
    left.resize(len, 0.0);
    right.resize(len, 0.0);
    (left, right)
}
