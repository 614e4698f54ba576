//! CSV -> experiment -> bins -> fits, through the same pipeline the binary uses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use approx::assert_abs_diff_eq;
use flight_sysid::app::pipeline::{prepare, run_correlate, run_fit, run_fit_all, run_select};
use flight_sysid::cli::{DataArgs, SelectArgs};
use flight_sysid::data::{SYNTHETIC_COLUMNS, SynthConfig, generate_flight};
use flight_sysid::fit::StopReason;
use flight_sysid::io::export::write_samples_csv;
use flight_sysid::io::model::{read_model_json, write_model_json};
use flight_sysid::models::{load_models, model_for};

struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn new(name: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("sysid-it-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

const EXPERIMENT: &str = r#"{
    "features": ["one", "elevator", "q", "ax", "ay", "az"],
    "lags": [{"feature": "q", "depth": 1}],
    "condition_key": "flaps",
    "conditions": [0.0, 0.5, 1.0],
    "outputs": ["q"],
    "inputs": ["one", "elevator", "q"],
    "select": {"target": "q", "seeds": ["one"], "exclude": ["ax", "ay", "az"]}
}"#;

fn write_flight(ws: &Workspace, file: &str, cfg: &SynthConfig) -> PathBuf {
    let path = ws.path(file);
    let samples = generate_flight(cfg).unwrap();
    write_samples_csv(&path, &samples, &SYNTHETIC_COLUMNS).unwrap();
    path
}

fn data_args(ws: &Workspace, data: Vec<PathBuf>, session: Option<&Path>) -> DataArgs {
    let config = ws.path("experiment.json");
    std::fs::write(&config, EXPERIMENT).unwrap();
    DataArgs {
        data,
        config,
        session: session.map(Path::to_path_buf),
    }
}

fn quiet_flight(seed: u64) -> SynthConfig {
    SynthConfig {
        samples: 1200,
        seed,
        noise: 0.0,
        ..SynthConfig::default()
    }
}

#[test]
fn fit_recovers_dynamics_and_writes_a_usable_model() {
    let ws = Workspace::new("fit");
    let data = vec![write_flight(&ws, "a.csv", &quiet_flight(1))];
    let run = run_fit(&data_args(&ws, data, None)).unwrap();

    assert_eq!(run.reports.len(), 3);
    assert_eq!(run.prepared.build.samples_read, 1200);
    for (_, report) in &run.reports {
        let a = &report.fit.coefficients;
        // CSV cells carry ten decimals.
        assert_abs_diff_eq!(a[(0, 1)], 0.8, epsilon = 1e-6);
        assert_abs_diff_eq!(a[(0, 2)], 0.95, epsilon = 1e-6);
    }

    let path = ws.path("model.json");
    write_model_json(&path, &run.model).unwrap();
    let model = read_model_json(&path).unwrap();
    assert_eq!(model, run.model);
    assert_eq!(model.lags.len(), 1);

    let models = load_models(&model).unwrap();
    let cruise = model_for(&models, 0.02).unwrap();
    assert_eq!(cruise.inputs, vec!["one", "elevator", "q"]);
    let state: HashMap<String, f64> = [("one", 1.0), ("elevator", 0.1), ("q", 0.2)]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let next = cruise.step(&state).unwrap();
    assert_abs_diff_eq!(next[0].1, 0.8 * 0.1 + 0.95 * 0.2, epsilon = 1e-6);
}

#[test]
fn every_recording_warms_up_its_own_lag_history() {
    let ws = Workspace::new("segments");
    let data = vec![write_flight(&ws, "a.csv", &quiet_flight(1)), write_flight(&ws, "b.csv", &quiet_flight(2))];
    let prepared = prepare(&data_args(&ws, data, None)).unwrap();

    assert_eq!(prepared.build.samples_read, 2400);
    assert_eq!(prepared.build.dropped_out_of_order, 0);
    assert_eq!(prepared.build.skipped_warmup, 2);
    let kept: usize = prepared.build.bins.iter().map(|b| b.matrix.samples()).sum();
    assert_eq!(kept, 2398);
}

#[test]
fn held_accelerometers_are_excised_before_fitting() {
    let ws = Workspace::new("excise");
    let cfg = SynthConfig {
        flat: Some((100, 160)),
        ..quiet_flight(3)
    };
    let data = vec![write_flight(&ws, "flat.csv", &cfg)];
    let prepared = prepare(&data_args(&ws, data, None)).unwrap();

    // The held segment lies in the flaps=0 third; lag warm-up shifts columns by one.
    let first = &prepared.build.bins[0];
    assert_eq!(first.excised.len(), 1);
    let span = first.excised[0];
    assert!((88..=104).contains(&span.start), "span {span:?}");
    assert!((154..=170).contains(&span.end), "span {span:?}");
    assert_eq!(first.matrix.samples(), 399 - span.len());
    assert!(prepared.build.bins[1].excised.is_empty());
    assert!(prepared.build.bins[2].excised.is_empty());
}

#[test]
fn session_is_reused_for_the_same_inputs_only() {
    let ws = Workspace::new("session");
    let a = write_flight(&ws, "a.csv", &quiet_flight(4));
    let b = write_flight(&ws, "b.csv", &quiet_flight(5));
    let session = ws.path("session.json");

    let first = prepare(&data_args(&ws, vec![a.clone()], Some(&session))).unwrap();
    assert!(!first.from_session);
    let second = prepare(&data_args(&ws, vec![a.clone()], Some(&session))).unwrap();
    assert!(second.from_session);
    assert_eq!(first.build.bins[1].matrix, second.build.bins[1].matrix);

    let other = prepare(&data_args(&ws, vec![a, b], Some(&session))).unwrap();
    assert!(!other.from_session);
}

#[test]
fn select_fit_all_and_correlate_run_per_bin() {
    let ws = Workspace::new("select");
    let data = vec![write_flight(&ws, "a.csv", &quiet_flight(6))];
    let args = data_args(&ws, data, None);

    let select = SelectArgs {
        data: args.clone(),
        target: None,
        self_reference: false,
        min_improvement: None,
    };
    let (_, traces) = run_select(&select).unwrap();
    assert_eq!(traces.len(), 3);
    for (_, trace) in &traces {
        // q_1 belongs to the target and the accelerometers are excluded.
        assert_eq!(trace.steps.len(), 1);
        assert_eq!(trace.steps[0].chosen, "elevator");
        assert_eq!(trace.stop, StopReason::Exhausted);
        assert!(trace.steps[0].rms <= trace.initial_rms.unwrap() + 1e-12);
    }

    let (_, fit_all) = run_fit_all(&args).unwrap();
    assert_eq!(fit_all.len(), 3);
    assert_eq!(fit_all[0].1.outputs[0].output, "q");

    let (_, pairs) = run_correlate(&args).unwrap();
    let first = &pairs[0].1;
    assert!(first.iter().any(|p| p.a == "q" && p.b == "q_1" && p.r > 0.5));
    assert!(first.last().unwrap().r.is_nan());
}

#[test]
fn unknown_output_fails_before_any_data_is_read() {
    let ws = Workspace::new("unknown");
    let config = ws.path("bad.json");
    std::fs::write(&config, r#"{"features": ["one", "q"], "outputs": ["r"], "excision": {"enabled": false}}"#)
        .unwrap();
    let args = DataArgs {
        data: vec![ws.path("missing.csv")],
        config,
        session: None,
    };
    assert_eq!(run_fit(&args).unwrap_err().exit_code(), 2);
}
