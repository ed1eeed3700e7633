//! Log-mel spectrogram front end for the speech encoder.
//!
//! Matches the Whisper feature extractor: 400-point STFT with a Hann
//! window and 160-sample hop, an 80-filter Slaney mel bank, log10 power,
//! clamping to `max − 8`, and rescaling by `(x + 4) / 4`.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, OnceLock};

const SAMPLE_RATE: usize = 16_000;
const MAX_SECONDS: usize = 30;
const N_SAMPLES: usize = SAMPLE_RATE * MAX_SECONDS; // 480000

const N_FFT: usize = 400;
const HOP: usize = 160;
const N_FREQ: usize = (N_FFT / 2) + 1; // 201

/// Mel channels.
pub const N_MELS: usize = 80;
/// Frames along the time axis after padding/trimming.
pub const N_FRAMES: usize = N_SAMPLES / HOP; // 3000

const N_FRAMES_WITH_PAD: usize = N_FRAMES + 1;
const PAD: usize = N_FFT / 2; // 200

struct CachedFeatureData {
    hann_window: Vec<f64>,
    mel_filters: Vec<Vec<f64>>,
    fft: Arc<dyn Fft<f64>>,
}

static CACHED_DATA: OnceLock<CachedFeatureData> = OnceLock::new();

fn get_cached_data() -> &'static CachedFeatureData {
    CACHED_DATA.get_or_init(|| {
        let mut planner = FftPlanner::<f64>::new();
        CachedFeatureData {
            hann_window: hann_window(N_FFT),
            mel_filters: mel_filter_bank_slaney(N_FREQ, N_MELS, SAMPLE_RATE, 0.0, 8000.0),
            fft: planner.plan_fft_forward(N_FFT),
        }
    })
}

/// Compute `[N_MELS × N_FRAMES]` log-mel features (mel-major layout) from
/// 16 kHz mono audio. Input is zero-padded or trimmed to 30 seconds.
pub fn compute_log_mel(audio_16k_mono: &[f32]) -> Vec<f32> {
    let audio = truncate_or_right_pad(audio_16k_mono, N_SAMPLES);
    let padded = reflect_pad_1d(&audio, PAD);

    let cached = get_cached_data();
    let window = &cached.hann_window;
    let mel_filters = &cached.mel_filters;
    let fft = &cached.fft;

    let mut log_mel = vec![0.0f32; N_MELS * N_FRAMES];
    let mut frame_in: Vec<Complex<f64>> = vec![Complex { re: 0.0, im: 0.0 }; N_FFT];

    // The STFT grid has one frame more than we keep; the final frame is
    // dropped to match the encoder's expected length.
    for frame_idx in 0..N_FRAMES_WITH_PAD - 1 {
        let start = frame_idx * HOP;
        let frame = &padded[start..start + N_FFT];

        for (out, (sample, win)) in frame_in.iter_mut().zip(frame.iter().zip(window.iter())) {
            out.re = (*sample as f64) * win;
            out.im = 0.0;
        }

        fft.process(&mut frame_in);

        let mut power = [0.0f64; N_FREQ];
        for (p, c) in power.iter_mut().zip(frame_in.iter().take(N_FREQ)) {
            *p = c.re * c.re + c.im * c.im;
        }

        for m in 0..N_MELS {
            let mut v = 0.0f64;
            for k in 0..N_FREQ {
                v += mel_filters[k][m] * power[k];
            }
            let v = v.max(1e-10).log10();
            log_mel[(m * N_FRAMES) + frame_idx] = v as f32;
        }
    }

    // Clamp to max−8 and rescale.
    let max_val = log_mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = max_val - 8.0;
    for v in log_mel.iter_mut() {
        if *v < floor {
            *v = floor;
        }
        *v = (*v + 4.0) / 4.0;
    }

    log_mel
}

fn truncate_or_right_pad(audio: &[f32], n_samples: usize) -> Vec<f32> {
    if audio.len() > n_samples {
        audio[..n_samples].to_vec()
    } else if audio.len() < n_samples {
        let mut out = audio.to_vec();
        out.resize(n_samples, 0.0);
        out
    } else {
        audio.to_vec()
    }
}

fn reflect_pad_1d(x: &[f32], pad: usize) -> Vec<f32> {
    if pad == 0 {
        return x.to_vec();
    }
    if x.len() < pad + 1 {
        let mut out = vec![0.0; pad];
        out.extend_from_slice(x);
        out.extend(std::iter::repeat(0.0).take(pad));
        return out;
    }

    let mut out = Vec::with_capacity(x.len() + (2 * pad));
    for i in 0..pad {
        out.push(x[pad - i]);
    }
    out.extend_from_slice(x);
    for i in 0..pad {
        out.push(x[x.len() - 2 - i]);
    }
    out
}

fn hann_window(n: usize) -> Vec<f64> {
    let n_f = n as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * ((2.0 * std::f64::consts::PI * i as f64) / n_f).cos())
        .collect()
}

fn hertz_to_mel_slaney(freq: f64) -> f64 {
    let min_log_hertz = 1000.0;
    let min_log_mel = 15.0;
    let logstep = 27.0 / 6.4_f64.ln();
    let mut mels = 3.0 * freq / 200.0;
    if freq >= min_log_hertz {
        mels = min_log_mel + (freq / min_log_hertz).ln() * logstep;
    }
    mels
}

fn mel_to_hertz_slaney(mels: f64) -> f64 {
    let min_log_hertz = 1000.0;
    let min_log_mel = 15.0;
    let logstep = 6.4_f64.ln() / 27.0;
    let mut freq = 200.0 * mels / 3.0;
    if mels >= min_log_mel {
        freq = min_log_hertz * (logstep * (mels - min_log_mel)).exp();
    }
    freq
}

fn mel_filter_bank_slaney(
    num_frequency_bins: usize,
    num_mel_filters: usize,
    sampling_rate: usize,
    min_frequency: f64,
    max_frequency: f64,
) -> Vec<Vec<f64>> {
    let mel_min = hertz_to_mel_slaney(min_frequency);
    let mel_max = hertz_to_mel_slaney(max_frequency);

    let mut mel_freqs = Vec::with_capacity(num_mel_filters + 2);
    for i in 0..(num_mel_filters + 2) {
        let t = i as f64 / (num_mel_filters + 1) as f64;
        mel_freqs.push(mel_min + t * (mel_max - mel_min));
    }

    let mut filter_freqs = Vec::with_capacity(num_mel_filters + 2);
    for m in mel_freqs {
        filter_freqs.push(mel_to_hertz_slaney(m));
    }

    let nyquist = (sampling_rate as f64) / 2.0;
    let mut fft_freqs = Vec::with_capacity(num_frequency_bins);
    if num_frequency_bins == 1 {
        fft_freqs.push(0.0);
    } else {
        for i in 0..num_frequency_bins {
            let t = i as f64 / (num_frequency_bins - 1) as f64;
            fft_freqs.push(t * nyquist);
        }
    }

    let mut mel_filters = vec![vec![0.0f64; num_mel_filters]; num_frequency_bins];
    for f in 0..num_frequency_bins {
        let ff = fft_freqs[f];
        for m in 0..num_mel_filters {
            let f_left = filter_freqs[m];
            let f_center = filter_freqs[m + 1];
            let f_right = filter_freqs[m + 2];

            let down = (ff - f_left) / (f_center - f_left);
            let up = (f_right - ff) / (f_right - f_center);
            let v = down.min(up).max(0.0);
            mel_filters[f][m] = v;
        }
    }

    // Slaney area normalization
    for m in 0..num_mel_filters {
        let enorm = 2.0 / (filter_freqs[m + 2] - filter_freqs[m]);
        for row in &mut mel_filters {
            row[m] *= enorm;
        }
    }

    mel_filters
}
