//! Seeded synthetic flight streams.
//!
//! A small longitudinal model used by the `synth` subcommand and by tests:
//!
//! ```text
//! q[t+1]  = 0.95·q[t] + 0.8·elevator[t]              + noise
//! az[t]   = -9.81 + 2.0·q[t]                         + buffet + noise
//! ax[t]   = 0.1·elevator[t]                          + buffet + noise
//! ay[t]   =                                            buffet + noise
//! ```
//!
//! `buffet` is airframe vibration (σ = 0.5 m/s²) and is present even in a
//! noiseless stream, so only the held segment looks flat to excision.
//!
//! The elevator is a smoothed random walk, the flap setting steps through
//! 0.0 / 0.5 / 1.0 over the three thirds of the stream, and an optional
//! segment holds the accelerometers constant (an interpolated telemetry gap).

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::types::Sample;
use crate::error::AppError;

pub const SYNTHETIC_COLUMNS: [&str; 8] = ["time", "one", "elevator", "q", "ax", "ay", "az", "flaps"];

const GRAVITY: f64 = 9.81;
const PITCH_DAMPING: f64 = 0.95;
const ELEVATOR_GAIN: f64 = 0.8;
const BUFFET_STD: f64 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SynthConfig {
    pub samples: usize,
    pub seed: u64,
    /// Standard deviation of the additive measurement/process noise.
    pub noise: f64,
    pub dt: f64,
    /// Half-open column range whose accelerometer values are held constant.
    pub flat: Option<(usize, usize)>,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            samples: 3000,
            seed: 42,
            noise: 0.01,
            dt: 0.02,
            flat: None,
        }
    }
}

pub fn generate_flight(config: &SynthConfig) -> Result<Vec<Sample>, AppError> {
    if config.samples == 0 {
        return Err(AppError::config("Sample count must be > 0."));
    }
    if !(config.dt.is_finite() && config.dt > 0.0) {
        return Err(AppError::config(format!("Synthetic dt must be > 0 (got {}).", config.dt)));
    }
    if !(config.noise.is_finite() && config.noise >= 0.0) {
        return Err(AppError::config(format!("Noise level must be >= 0 (got {}).", config.noise)));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let unit = Normal::new(0.0, 1.0).map_err(|e| AppError::numeric(format!("Noise distribution error: {e}")))?;

    let n = config.samples;
    let mut samples = Vec::with_capacity(n);
    let mut q = 0.0;
    let mut elevator = 0.0;
    let mut held: Option<(f64, f64, f64)> = None;

    for i in 0..n {
        let drive: f64 = unit.sample(&mut rng);
        elevator = 0.9 * elevator + 0.05 * drive;

        let mut accel = [0.0; 3];
        for a in &mut accel {
            *a = BUFFET_STD * unit.sample(&mut rng) + config.noise * unit.sample(&mut rng);
        }
        let [mut ax, mut ay, mut az] = accel;
        ax += 0.1 * elevator;
        az += -GRAVITY + 2.0 * q;

        let in_flat = config.flat.is_some_and(|(start, end)| i >= start && i < end);
        if in_flat {
            let (hx, hy, hz) = *held.get_or_insert((ax, ay, az));
            (ax, ay, az) = (hx, hy, hz);
        } else {
            held = None;
        }

        samples.push(
            Sample::new(Some(i as f64 * config.dt))
                .with("one", 1.0)
                .with("elevator", elevator)
                .with("q", q)
                .with("ax", ax)
                .with("ay", ay)
                .with("az", az)
                .with("flaps", flap_setting(i, n)),
        );

        q = PITCH_DAMPING * q + ELEVATOR_GAIN * elevator + config.noise * unit.sample(&mut rng);
    }

    Ok(samples)
}

fn flap_setting(i: usize, n: usize) -> f64 {
    match 3 * i / n {
        0 => 0.0,
        1 => 0.5,
        _ => 1.0,
    }
}
