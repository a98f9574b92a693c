//! Welch power spectral density and band power
//!
//! Averages modified periodograms of half-overlapping, Hann-windowed,
//! mean-detrended segments, then integrates the one-sided density over a
//! frequency band with the trapezoidal rule.

use rustfft::{num_complex::Complex, FftPlanner};

/// Longest segment used for a single periodogram
pub const DEFAULT_SEGMENT_LEN: usize = 256;

/// One-sided power spectral density.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Psd {
    /// Bin centre frequencies in Hz, ascending
    pub frequencies: Vec<f64>,
    /// Power density per bin (units²/Hz)
    pub power: Vec<f64>,
}

impl Psd {
    /// Frequency resolution (Hz per bin), 0 for an empty spectrum.
    #[must_use]
    pub fn resolution(&self) -> f64 {
        match self.frequencies.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Trapezoidal integral of the density over `low_hz..=high_hz`.
    ///
    /// Bands with fewer than two bins inside the range (including bands
    /// above Nyquist) integrate to zero.
    #[must_use]
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        let mut prev: Option<(f64, f64)> = None;
        let mut total = 0.0;

        for (&f, &p) in self.frequencies.iter().zip(&self.power) {
            if f < low_hz || f > high_hz {
                continue;
            }
            if let Some((pf, pp)) = prev {
                total += (f - pf) * (p + pp) * 0.5;
            }
            prev = Some((f, p));
        }

        total
    }
}

/// Welch spectral estimator
pub struct WelchEstimator {
    sample_rate: f64,
    max_segment_len: usize,
    planner: FftPlanner<f64>,
    buffer: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
}

impl WelchEstimator {
    /// Create an estimator for signals sampled at `sample_rate` Hz.
    #[must_use]
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            max_segment_len: DEFAULT_SEGMENT_LEN,
            planner: FftPlanner::new(),
            buffer: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Override the maximum segment length (minimum 1).
    #[must_use]
    pub fn with_segment_len(mut self, len: usize) -> Self {
        self.max_segment_len = len.max(1);
        self
    }

    /// Sample rate in Hz
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Estimate the one-sided PSD of `samples`.
    ///
    /// Segment length is `min(max_segment_len, samples.len())` with 50%
    /// overlap. An empty input yields an empty spectrum.
    pub fn estimate(&mut self, samples: &[f64]) -> Psd {
        let n = samples.len();
        if n == 0 {
            return Psd::default();
        }

        let seg_len = n.min(self.max_segment_len);
        let step = seg_len - seg_len / 2;
        let window = periodic_hann(seg_len);
        let window_energy: f64 = window.iter().map(|w| w * w).sum();
        let scale = 1.0 / (self.sample_rate * window_energy);

        let fft = self.planner.plan_fft_forward(seg_len);
        self.buffer.resize(seg_len, Complex::new(0.0, 0.0));
        self.scratch.resize(fft.get_inplace_scratch_len(), Complex::new(0.0, 0.0));

        let n_freqs = seg_len / 2 + 1;
        let mut power = vec![0.0; n_freqs];
        let mut segments = 0usize;

        let mut start = 0;
        while start + seg_len <= n {
            let segment = &samples[start..start + seg_len];
            let mean = segment.iter().sum::<f64>() / seg_len as f64;

            for (slot, (&s, &w)) in self.buffer.iter_mut().zip(segment.iter().zip(&window)) {
                *slot = Complex::new((s - mean) * w, 0.0);
            }
            fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

            for (acc, c) in power.iter_mut().zip(&self.buffer[..n_freqs]) {
                *acc += c.norm_sqr() * scale;
            }

            segments += 1;
            start += step;
        }

        // Fold negative frequencies in; DC and (even-length) Nyquist appear once.
        let fold_end = if seg_len % 2 == 0 { n_freqs - 1 } else { n_freqs };
        if fold_end > 1 {
            for p in &mut power[1..fold_end] {
                *p *= 2.0;
            }
        }

        let segments = segments.max(1) as f64;
        for p in &mut power {
            *p /= segments;
        }

        let bin_hz = self.sample_rate / seg_len as f64;
        let frequencies = (0..n_freqs).map(|k| k as f64 * bin_hz).collect();

        Psd { frequencies, power }
    }
}

/// Periodic (DFT-even) Hann window.
fn periodic_hann(size: usize) -> Vec<f64> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / size as f64).cos())
        .collect()
}
