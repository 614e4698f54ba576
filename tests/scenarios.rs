//! End-to-end scenarios over the builder, solver and rollout.

use approx::assert_abs_diff_eq;
use flight_sysid::data::{ExcisionConfig, SynthConfig, TrainingMatrixBuilder, generate_flight};
use flight_sysid::domain::{ConditionBin, FeatureRegistry, LagSpec, Sample, Span, TrainingMatrix};
use flight_sysid::fit::{Saturation, fit_direct, simulate, solve};
use flight_sysid::math::SolveOptions;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

fn strs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn one_x_y_recovers_bias_and_gain() {
    let reg = FeatureRegistry::new(&strs(&["one", "x", "y"]), &[]).unwrap();
    let n = 50;
    let x: Vec<f64> = (0..n).map(|i| 10.0 * i as f64 / (n - 1) as f64).collect();
    let mut y = vec![0.0; n];
    for t in 0..n - 1 {
        y[t + 1] = 1.0 + 2.0 * x[t];
    }
    let m = TrainingMatrix::from_rows(&[vec![1.0; n], x, y], 0.02).unwrap();

    let fit = solve(&m, &reg, &[0, 1], &[2], &SolveOptions::default()).unwrap();
    assert_abs_diff_eq!(fit.coefficients[(0, 0)], 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(fit.coefficients[(0, 1)], 2.0, epsilon = 1e-9);
    assert!(fit.residuals[0].rms < 1e-6);
    assert_eq!(fit.samples, 49);
}

fn two_bin_stream(bin_b_scale: f64) -> Vec<Sample> {
    let mut rng = StdRng::seed_from_u64(11);
    let unit = Normal::new(0.0, 1.0).unwrap();
    let mut samples = Vec::new();
    let mut y = 0.0;
    for i in 0..200 {
        let flaps = if i < 100 { 0.0 } else { 1.0 };
        let gain = if i < 100 { 2.0 } else { bin_b_scale };
        let x: f64 = unit.sample(&mut rng);
        samples.push(
            Sample::new(Some(i as f64 * 0.02))
                .with("one", 1.0)
                .with("x", x)
                .with("y", y)
                .with("flaps", flaps),
        );
        y = 0.5 + gain * x;
    }
    samples
}

#[test]
fn perturbing_one_bin_leaves_the_other_untouched() {
    let reg = FeatureRegistry::new(&strs(&["one", "x", "y"]), &[]).unwrap();
    let bins = vec![ConditionBin::new("flaps", 0.0, 0.1), ConditionBin::new("flaps", 1.0, 0.1)];
    let builder = TrainingMatrixBuilder::new(&reg, bins).unwrap();

    let base = builder.build(&two_bin_stream(-3.0)).unwrap();
    let perturbed = builder.build(&two_bin_stream(7.5)).unwrap();

    let fit = |out: &flight_sysid::data::BuildOutput, b: usize| {
        solve(&out.bins[b].matrix, &reg, &[0, 1], &[2], &SolveOptions::default()).unwrap()
    };
    assert_eq!(fit(&base, 0).coefficients, fit(&perturbed, 0).coefficients);
    assert_abs_diff_eq!(fit(&base, 0).coefficients[(0, 1)], 2.0, epsilon = 1e-9);
    assert_abs_diff_eq!(fit(&perturbed, 1).coefficients[(0, 1)], 7.5, epsilon = 1e-9);
}

#[test]
fn builder_excises_a_flat_accelerometer_segment() {
    let reg = FeatureRegistry::new(&strs(&["one", "ax", "ay", "az"]), &[]).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let jitter = Normal::new(0.0, 0.01).unwrap();
    let (start, end) = (150, 190);
    let samples: Vec<Sample> = (0..400)
        .map(|i| {
            let az = if (start..end).contains(&i) {
                -9.81
            } else {
                let swing = if i % 2 == 0 { 1.0 } else { -1.0 };
                -9.81 + swing + jitter.sample(&mut rng)
            };
            Sample::new(Some(i as f64 * 0.02))
                .with("one", 1.0)
                .with("ax", 0.0)
                .with("ay", 0.0)
                .with("az", az)
        })
        .collect();

    let out = TrainingMatrixBuilder::new(&reg, vec![])
        .unwrap()
        .with_excision(ExcisionConfig::default())
        .unwrap()
        .build(&samples)
        .unwrap();
    let bin = &out.bins[0];
    assert_eq!(bin.excised, vec![Span { start: start - 5, end: end + 5 }]);
    assert_eq!(bin.matrix.samples(), 400 - 50);
}

#[test]
fn chunked_solve_matches_dense() {
    let reg = FeatureRegistry::new(&strs(&["one", "a", "b", "y"]), &[]).unwrap();
    let mut rng = StdRng::seed_from_u64(21);
    let unit = Normal::new(0.0, 1.0).unwrap();
    let rows: Vec<Vec<f64>> = std::iter::once(vec![1.0; 500])
        .chain((0..3).map(|_| (0..500).map(|_| unit.sample(&mut rng)).collect()))
        .collect();
    let m = TrainingMatrix::from_rows(&rows, 0.01).unwrap();

    let dense = solve(&m, &reg, &[0, 1, 2], &[3], &SolveOptions::default()).unwrap();
    let chunked = solve(
        &m,
        &reg,
        &[0, 1, 2],
        &[3],
        &SolveOptions {
            chunk_columns: Some(64),
            ..SolveOptions::default()
        },
    )
    .unwrap();
    for c in 0..3 {
        assert_abs_diff_eq!(dense.coefficients[(0, c)], chunked.coefficients[(0, c)], epsilon = 1e-10);
    }
}

#[test]
fn synthetic_flight_identifies_pitch_dynamics_per_flap_setting() {
    let samples = generate_flight(&SynthConfig {
        samples: 900,
        noise: 0.0,
        ..SynthConfig::default()
    })
    .unwrap();
    let reg = FeatureRegistry::new(&strs(&["one", "elevator", "q", "ax", "ay", "az"]), &[LagSpec::new("q", 1)]).unwrap();
    let bins = vec![
        ConditionBin::new("flaps", 0.0, 0.1),
        ConditionBin::new("flaps", 0.5, 0.1),
        ConditionBin::new("flaps", 1.0, 0.1),
    ];
    let out = TrainingMatrixBuilder::new(&reg, bins).unwrap().build(&samples).unwrap();
    assert_abs_diff_eq!(out.dt, 0.02, epsilon = 1e-12);

    let inputs = reg.indices(&["one", "elevator", "q"]).unwrap();
    let outputs = reg.indices(&["q"]).unwrap();
    for bin in &out.bins {
        let report = fit_direct(&bin.matrix, &reg, &bin.parameters, &inputs, &outputs, 0, &SolveOptions::default())
            .unwrap();
        let a = &report.fit.coefficients;
        assert_abs_diff_eq!(a[(0, 0)], 0.0, epsilon = 1e-8);
        assert_abs_diff_eq!(a[(0, 1)], 0.8, epsilon = 1e-8);
        assert_abs_diff_eq!(a[(0, 2)], 0.95, epsilon = 1e-8);
        assert!(report.rollout[0].rms.is_finite());
    }
}

#[test]
fn rollout_never_touches_the_callers_matrix() {
    let reg = FeatureRegistry::new(&strs(&["u", "p"]), &[LagSpec::new("p", 2)]).unwrap();
    let n = 30;
    let rows: Vec<Vec<f64>> = vec![
        (0..n).map(|i| (i as f64 * 0.3).sin()).collect(),
        (0..n).map(|i| (i as f64 * 0.1).cos()).collect(),
        (0..n).map(|i| i as f64).collect(),
        (0..n).map(|i| -(i as f64)).collect(),
    ];
    let m = TrainingMatrix::from_rows(&rows, 0.02).unwrap();
    let before = m.clone();
    let a = nalgebra::DMatrix::from_row_slice(1, 4, &[1.0, 0.9, 0.1, 0.05]);
    simulate(&m, &reg, &[0, 1, 2, 3], &[1], &a, &Saturation::unbounded(1)).unwrap();
    assert_eq!(m, before);
}
