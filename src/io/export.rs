//! CSV exports.
//!
//! - estimate series (ground truth vs direct vs rollout) for plotting elsewhere
//! - synthetic flight logs in the same layout `ingest` reads

use std::fs::File;
use std::path::Path;

use csv::Writer;

use crate::domain::{Sample, TrainingMatrix};
use crate::error::AppError;
use crate::fit::experiment::Estimates;

/// One row per one-step transition: `t_index` then, for every output,
/// `<out>_truth,<out>_direct,<out>_rollout` with truth taken at `t_index + 1`.
pub fn write_estimates_csv(
    path: &Path,
    matrix: &TrainingMatrix,
    outputs: &[usize],
    names: &[String],
    estimates: &Estimates,
) -> Result<(), AppError> {
    let rows = matrix.samples().saturating_sub(1);
    if names.len() != outputs.len()
        || estimates.direct.nrows() != outputs.len()
        || estimates.rollout.nrows() != outputs.len()
        || estimates.direct.ncols() < rows
        || estimates.rollout.ncols() < rows
    {
        return Err(AppError::config("Estimate series do not match the output set."));
    }

    let mut writer = create(path)?;
    let mut header = vec!["t_index".to_string()];
    for name in names {
        header.push(format!("{name}_truth"));
        header.push(format!("{name}_direct"));
        header.push(format!("{name}_rollout"));
    }
    write_record(&mut writer, &header)?;

    for c in 0..rows {
        let mut record = vec![c.to_string()];
        for (op, &row) in outputs.iter().enumerate() {
            record.push(format!("{:.10}", matrix.value(row, c + 1)));
            record.push(format!("{:.10}", estimates.direct[(op, c)]));
            record.push(format!("{:.10}", estimates.rollout[(op, c)]));
        }
        write_record(&mut writer, &record)?;
    }
    finish(writer)
}

/// Write samples with a leading `time` column; missing values become empty cells.
pub fn write_samples_csv(path: &Path, samples: &[Sample], columns: &[&str]) -> Result<(), AppError> {
    let mut writer = create(path)?;
    let value_columns: Vec<&str> = columns.iter().copied().filter(|c| *c != "time").collect();

    let mut header = vec!["time".to_string()];
    header.extend(value_columns.iter().map(|c| c.to_string()));
    write_record(&mut writer, &header)?;

    for s in samples {
        let mut record = vec![s.time.map(|t| format!("{t:.4}")).unwrap_or_default()];
        record.extend(
            value_columns
                .iter()
                .map(|c| s.get(c).map(|v| format!("{v:.10}")).unwrap_or_default()),
        );
        write_record(&mut writer, &record)?;
    }
    finish(writer)
}

fn create(path: &Path) -> Result<Writer<File>, AppError> {
    Writer::from_path(path)
        .map_err(|e| AppError::config(format!("Failed to create CSV '{}': {e}", path.display())))
}

fn write_record(writer: &mut Writer<File>, record: &[String]) -> Result<(), AppError> {
    writer
        .write_record(record)
        .map_err(|e| AppError::config(format!("Failed to write CSV row: {e}")))
}

fn finish(mut writer: Writer<File>) -> Result<(), AppError> {
    writer
        .flush()
        .map_err(|e| AppError::config(format!("Failed to write CSV: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ingest::read_log_file;
    use nalgebra::DMatrix;

    fn temp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sysid-export-{name}-{}.csv", std::process::id()))
    }

    #[test]
    fn estimates_are_aligned_one_step_ahead() {
        let m = TrainingMatrix::from_rows(&[vec![1.0, 1.0, 1.0], vec![0.0, 1.0, 2.0]], 0.1).unwrap();
        let est = Estimates {
            direct: DMatrix::from_row_slice(1, 2, &[1.5, 2.5]),
            rollout: DMatrix::from_row_slice(1, 3, &[1.25, 2.25, 3.25]),
        };
        let path = temp("estimates");
        write_estimates_csv(&path, &m, &[1], &["y".to_string()], &est).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "t_index,y_truth,y_direct,y_rollout");
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("0,1.0000000000,1.5000000000,1.2500000000"));
        assert!(lines[2].starts_with("1,2.0000000000,2.5000000000,2.2500000000"));
    }

    #[test]
    fn samples_csv_reads_back() {
        let samples = vec![
            Sample::new(Some(0.0)).with("one", 1.0).with("p", 0.5),
            Sample::new(Some(0.02)).with("one", 1.0),
        ];
        let path = temp("samples");
        write_samples_csv(&path, &samples, &["time", "one", "p"]).unwrap();
        let log = read_log_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(log.columns, vec!["one", "p"]);
        assert_eq!(log.samples[0].get("p"), Some(0.5));
        assert_eq!(log.samples[1].get("p"), None);
        assert_eq!(log.samples[1].time, Some(0.02));
    }
}
