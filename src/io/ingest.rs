//! CSV flight-log ingest.
//!
//! Each file is one recording. The header row names the columns; an optional
//! `time` (or `timestamp`) column carries seconds. Every other column becomes
//! a named value on the sample.
//!
//! Cell handling is deliberately forgiving: empty, unparsable and non-finite
//! cells are simply absent from the sample, so the builder counts the sample
//! as incomplete only if it needs that feature. Rows the CSV reader cannot
//! parse at all are skipped and reported.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use csv::StringRecord;
use tracing::{debug, info};

use crate::domain::types::Sample;
use crate::error::AppError;

/// Constant bias feature. Filled with `1.0` when a log has no such column.
pub const BIAS_FEATURE: &str = "one";

const TIME_COLUMNS: [&str; 2] = ["time", "timestamp"];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

/// One parsed recording.
#[derive(Debug, Clone)]
pub struct FlightLog {
    pub source: String,
    /// Value columns in header order (time column excluded).
    pub columns: Vec<String>,
    pub timed: bool,
    pub samples: Vec<Sample>,
    pub rows_read: usize,
    pub row_errors: Vec<RowError>,
}

/// All recordings of a run, in the order given.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub logs: Vec<FlightLog>,
}

impl IngestedData {
    pub fn segments(&self) -> Vec<&[Sample]> {
        self.logs.iter().map(|l| l.samples.as_slice()).collect()
    }

    pub fn rows_read(&self) -> usize {
        self.logs.iter().map(|l| l.rows_read).sum()
    }

    pub fn row_errors(&self) -> usize {
        self.logs.iter().map(|l| l.row_errors.len()).sum()
    }
}

/// Load every file and check that each `required` column is present in all of them.
pub fn load_logs(paths: &[PathBuf], required: &[String]) -> Result<IngestedData, AppError> {
    if paths.is_empty() {
        return Err(AppError::config("No input CSV files given."));
    }

    let mut logs = Vec::with_capacity(paths.len());
    for path in paths {
        let log = read_log_file(path)?;
        if let Some(missing) = required
            .iter()
            .find(|name| name.as_str() != BIAS_FEATURE && !log.columns.contains(name))
        {
            return Err(AppError::config(format!(
                "CSV '{}' has no column `{missing}`.",
                path.display()
            )));
        }
        info!(
            file = %log.source,
            rows = log.rows_read,
            samples = log.samples.len(),
            row_errors = log.row_errors.len(),
            "ingested flight log"
        );
        logs.push(log);
    }

    if logs.iter().all(|l| l.samples.is_empty()) {
        return Err(AppError::data("No samples in the input CSV files."));
    }
    Ok(IngestedData { logs })
}

pub fn read_log_file(path: &Path) -> Result<FlightLog, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("Failed to open CSV '{}': {e}", path.display())))?;
    read_log(file, &path.display().to_string())
}

pub fn read_log<R: Read>(reader: R, source: &str) -> Result<FlightLog, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("Failed to read CSV headers of '{source}': {e}")))?
        .clone();
    let layout = HeaderLayout::from_headers(&headers, source)?;

    let mut samples = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        match result {
            Ok(record) => samples.push(layout.sample(&record)),
            Err(e) => {
                debug!(source, line, error = %e, "skipping unparsable CSV row");
                row_errors.push(RowError {
                    line,
                    message: format!("CSV parse error: {e}"),
                });
            }
        }
    }

    Ok(FlightLog {
        source: source.to_string(),
        columns: layout.columns.iter().map(|(name, _)| name.clone()).collect(),
        timed: layout.time.is_some(),
        samples,
        rows_read,
        row_errors,
    })
}

#[derive(Debug)]
struct HeaderLayout {
    time: Option<usize>,
    columns: Vec<(String, usize)>,
    fill_bias: bool,
}

impl HeaderLayout {
    fn from_headers(headers: &StringRecord, source: &str) -> Result<Self, AppError> {
        let mut time = None;
        let mut columns = Vec::new();
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, raw) in headers.iter().enumerate() {
            let name = normalize_header_name(raw);
            if name.is_empty() {
                continue;
            }
            if TIME_COLUMNS.contains(&name.to_ascii_lowercase().as_str()) {
                if time.is_some() {
                    return Err(AppError::config(format!("CSV '{source}' has more than one time column.")));
                }
                time = Some(idx);
                continue;
            }
            if seen.insert(name.clone(), idx).is_some() {
                return Err(AppError::config(format!("CSV '{source}' repeats column `{name}`.")));
            }
            columns.push((name, idx));
        }

        let fill_bias = !seen.contains_key(BIAS_FEATURE);
        Ok(Self { time, columns, fill_bias })
    }

    fn sample(&self, record: &StringRecord) -> Sample {
        let time = self.time.and_then(|i| parse_cell(record.get(i)));
        let mut sample = Sample::new(time);
        for (name, idx) in &self.columns {
            if let Some(v) = parse_cell(record.get(*idx)) {
                sample.values.insert(name.clone(), v);
            }
        }
        if self.fill_bias {
            sample.values.insert(BIAS_FEATURE.to_string(), 1.0);
        }
        sample
    }
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    name.trim().trim_start_matches('\u{feff}').trim().to_string()
}

fn parse_cell(cell: Option<&str>) -> Option<f64> {
    let v: f64 = cell?.trim().parse().ok()?;
    v.is_finite().then_some(v)
}
