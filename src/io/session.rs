//! Session cache of built training matrices.
//!
//! Building bins from long logs dominates run time, so `--session <json>`
//! stores the builder output next to the key it was built from. A session is
//! reused only when its key matches the current run exactly. A missing,
//! unreadable or stale session means rebuild; it never fails the run.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::data::builder::{BinData, BuildOutput};
use crate::data::excise::ExcisionConfig;
use crate::domain::{ConditionBin, ExperimentConfig, LagSpec, ParameterStats, Span, TrainingMatrix};
use crate::error::AppError;
use crate::math::smooth::LowPassConfig;

/// Everything the built bins depend on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionKey {
    pub files: Vec<String>,
    pub features: Vec<String>,
    pub lags: Vec<LagSpec>,
    pub conditions: Vec<ConditionBin>,
    pub dt: Option<f64>,
    pub excision: ExcisionConfig,
    pub lowpass: Option<LowPassConfig>,
}

impl SessionKey {
    pub fn new(files: &[PathBuf], config: &ExperimentConfig) -> Result<Self, AppError> {
        Ok(Self {
            files: files.iter().map(|p| p.display().to_string()).collect(),
            features: config.features.clone(),
            lags: config.lags.clone(),
            conditions: config.condition_bins()?,
            dt: config.dt,
            excision: config.excision.clone(),
            lowpass: config.lowpass,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    saved: DateTime<Utc>,
    key: SessionKey,
    dt: f64,
    samples_read: usize,
    dropped_out_of_order: usize,
    skipped_incomplete: usize,
    skipped_warmup: usize,
    unbinned: usize,
    bins: Vec<SessionBin>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionBin {
    condition: ConditionBin,
    /// Row-major feature series.
    rows: Vec<Vec<f64>>,
    parameters: Vec<ParameterStats>,
    excised: Vec<Span>,
}

/// The cached build, if `path` holds a readable session for exactly `key`.
pub fn load_session(path: &Path, key: &SessionKey) -> Option<BuildOutput> {
    if !path.exists() {
        return None;
    }
    let session = match read_session(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable session, rebuilding");
            return None;
        }
    };
    if session.key != *key {
        info!(path = %path.display(), "session key differs from this run, rebuilding");
        return None;
    }
    match restore(session) {
        Ok(build) => {
            info!(path = %path.display(), bins = build.bins.len(), "reusing session");
            Some(build)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring corrupt session, rebuilding");
            None
        }
    }
}

pub fn save_session(path: &Path, key: &SessionKey, build: &BuildOutput) -> Result<(), AppError> {
    let session = SessionFile {
        saved: Utc::now(),
        key: key.clone(),
        dt: build.dt,
        samples_read: build.samples_read,
        dropped_out_of_order: build.dropped_out_of_order,
        skipped_incomplete: build.skipped_incomplete,
        skipped_warmup: build.skipped_warmup,
        unbinned: build.unbinned,
        bins: build
            .bins
            .iter()
            .map(|b| SessionBin {
                condition: b.condition.clone(),
                rows: b.matrix.to_rows(),
                parameters: b.parameters.clone(),
                excised: b.excised.clone(),
            })
            .collect(),
    };

    let file = File::create(path)
        .map_err(|e| AppError::config(format!("Failed to create session '{}': {e}", path.display())))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &session)
        .map_err(|e| AppError::config(format!("Failed to write session: {e}")))?;
    writer
        .flush()
        .map_err(|e| AppError::config(format!("Failed to write session: {e}")))
}

fn read_session(path: &Path) -> Result<SessionFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open session '{}': {e}", path.display())))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| AppError::config(format!("Invalid session JSON: {e}")))
}

fn restore(session: SessionFile) -> Result<BuildOutput, AppError> {
    let features = session.key.features.len() + session.key.lags.iter().map(|l| l.depth).sum::<usize>();
    let bins = session
        .bins
        .into_iter()
        .map(|b| {
            if b.rows.len() != features || b.parameters.len() != features {
                return Err(AppError::data(format!(
                    "Session bin {} has {} rows, expected {features}.",
                    b.condition.label(),
                    b.rows.len()
                )));
            }
            Ok(BinData {
                matrix: TrainingMatrix::from_rows(&b.rows, session.dt)?,
                condition: b.condition,
                parameters: b.parameters,
                excised: b.excised,
            })
        })
        .collect::<Result<Vec<_>, AppError>>()?;

    Ok(BuildOutput {
        dt: session.dt,
        bins,
        samples_read: session.samples_read,
        dropped_out_of_order: session.dropped_out_of_order,
        skipped_incomplete: session.skipped_incomplete,
        skipped_warmup: session.skipped_warmup,
        unbinned: session.unbinned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::builder::TrainingMatrixBuilder;
    use crate::domain::{FeatureRegistry, Sample};

    fn config() -> ExperimentConfig {
        serde_json::from_str(r#"{"features": ["one", "p"], "lags": [{"feature": "p", "depth": 1}]}"#).unwrap()
    }

    fn build() -> BuildOutput {
        let reg = FeatureRegistry::new(&config().features, &config().lags).unwrap();
        let samples: Vec<Sample> = (0..8)
            .map(|i| Sample::new(Some(i as f64 * 0.1)).with("one", 1.0).with("p", (i * i) as f64))
            .collect();
        TrainingMatrixBuilder::new(&reg, vec![]).unwrap().build(&samples).unwrap()
    }

    fn temp(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sysid-session-{name}-{}.json", std::process::id()))
    }

    #[test]
    fn reuses_session_only_for_identical_key() {
        let path = temp("reuse");
        let key = SessionKey::new(&[PathBuf::from("a.csv")], &config()).unwrap();
        let built = build();
        save_session(&path, &key, &built).unwrap();

        let cached = load_session(&path, &key).unwrap();
        assert_eq!(cached.dt, built.dt);
        assert_eq!(cached.bins[0].matrix, built.bins[0].matrix);
        assert_eq!(cached.skipped_warmup, 1);

        let other = SessionKey::new(&[PathBuf::from("b.csv")], &config()).unwrap();
        assert!(load_session(&path, &other).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_session_falls_back_to_rebuild() {
        let path = temp("corrupt");
        std::fs::write(&path, "{\"saved\": 3").unwrap();
        let key = SessionKey::new(&[PathBuf::from("a.csv")], &config()).unwrap();
        assert!(load_session(&path, &key).is_none());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_session_is_not_an_error() {
        let key = SessionKey::new(&[], &config()).unwrap();
        assert!(load_session(&temp("missing"), &key).is_none());
    }
}
