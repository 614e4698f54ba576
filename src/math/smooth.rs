//! Signal smoothing.
//!
//! - `gaussian_smooth`: symmetric Gaussian kernel, truncated at 4σ, with
//!   half-sample reflection at the edges (`d c b a | a b c d`). Used as the
//!   reference trend when hunting for interpolated segments.
//! - `ButterworthLowPass`: causal low-pass built from cascaded biquads
//!   (bilinear transform with pre-warping), zero initial state.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const TRUNCATE_SIGMAS: f64 = 4.0;

/// Gaussian smoothing with standard deviation `sigma` (in samples).
pub fn gaussian_smooth(signal: &[f64], sigma: f64) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || !(sigma.is_finite() && sigma > 0.0) {
        return signal.to_vec();
    }

    let radius = (TRUNCATE_SIGMAS * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k * k) as f64 / (sigma * sigma)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= total;
    }

    (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * signal[reflect(i + k as isize - radius, n)])
                .sum()
        })
        .collect()
}

fn reflect(mut i: isize, n: usize) -> usize {
    let n = n as isize;
    loop {
        if i < 0 {
            i = -i - 1;
        } else if i >= n {
            i = 2 * n - i - 1;
        } else {
            return i as usize;
        }
    }
}

/// Low-pass prefilter settings (experiment file).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LowPassConfig {
    pub cutoff_hz: f64,
    #[serde(default = "default_order")]
    pub order: usize,
}

fn default_order() -> usize {
    4
}

#[derive(Debug, Clone, Copy)]
struct Section {
    b: [f64; 3],
    a: [f64; 3],
}

/// Digital Butterworth low-pass as a cascade of second-order sections.
#[derive(Debug, Clone)]
pub struct ButterworthLowPass {
    sections: Vec<Section>,
}

impl ButterworthLowPass {
    pub fn new(order: usize, cutoff_hz: f64, sample_rate_hz: f64) -> Result<Self, AppError> {
        if order == 0 {
            return Err(AppError::config("Low-pass order must be >= 1."));
        }
        let nyquist = 0.5 * sample_rate_hz;
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(AppError::config(format!(
                "Low-pass cutoff {cutoff_hz} Hz must lie in (0, {nyquist}) Hz."
            )));
        }

        // Pre-warped analog cutoff, normalised so the bilinear transform maps
        // it back onto `cutoff_hz` exactly.
        let k = (std::f64::consts::PI * cutoff_hz / sample_rate_hz).tan();
        let k2 = k * k;
        let mut sections = Vec::with_capacity(order.div_ceil(2));

        for i in 0..order / 2 {
            let theta = std::f64::consts::PI * (2 * i + 1) as f64 / (2 * order) as f64;
            let q = 1.0 / (2.0 * theta.cos());
            let norm = 1.0 / (1.0 + k / q + k2);
            let b0 = k2 * norm;
            sections.push(Section {
                b: [b0, 2.0 * b0, b0],
                a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
            });
        }
        if order % 2 == 1 {
            let norm = 1.0 / (1.0 + k);
            sections.push(Section {
                b: [k * norm, k * norm, 0.0],
                a: [1.0, (k - 1.0) * norm, 0.0],
            });
        }

        Ok(Self { sections })
    }

    /// Filter a whole series from rest (zero initial state).
    pub fn filter(&self, signal: &[f64]) -> Vec<f64> {
        let mut out = signal.to_vec();
        for s in &self.sections {
            let (mut z1, mut z2) = (0.0, 0.0);
            for v in out.iter_mut() {
                // Transposed direct form II.
                let x = *v;
                let y = s.b[0] * x + z1;
                z1 = s.b[1] * x - s.a[1] * y + z2;
                z2 = s.b[2] * x - s.a[2] * y;
                *v = y;
            }
        }
        out
    }
}
