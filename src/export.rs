//! CSV export of a recorded series.
//!
//! The table has two columns: `Time` (seconds since the run started) and the
//! current unit label, e.g.
//!
//! ```text
//! Time,Capacitance (F)
//! 0,1
//! 0.5,2
//! ```

use crate::error::{MeterError, MeterResult};
use crate::series::Series;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write the series as CSV to any writer.
pub fn write_csv<W: Write>(writer: W, series: &Series, label: &str) -> MeterResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["Time", label])?;
    for sample in series {
        csv.write_record([sample.elapsed_s.to_string(), sample.value.to_string()])?;
    }
    csv.flush()?;
    Ok(())
}

/// Save the series to `destination`.
///
/// `None` means the user cancelled the save: nothing is written and
/// `Ok(None)` is returned. Missing parent directories are created. On success
/// the written path is returned.
pub fn save_csv(
    destination: Option<&Path>,
    series: &Series,
    label: &str,
) -> MeterResult<Option<PathBuf>> {
    let Some(path) = destination else {
        info!("Save cancelled, nothing written");
        return Ok(None);
    };

    if path.as_os_str().is_empty() {
        return Err(MeterError::Export("empty destination path".into()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)?;
    write_csv(file, series, label)?;
    info!(path = %path.display(), samples = series.len(), "Series exported");
    Ok(Some(path.to_path_buf()))
}

/// Timestamped file name, e.g. `session_20240518_142301.csv`.
pub fn default_file_name() -> String {
    format!("session_{}.csv", chrono::Local::now().format("%Y%m%d_%H%M%S"))
}

/// Default destination inside `output_dir`.
pub fn default_destination(output_dir: &Path) -> PathBuf {
    output_dir.join(default_file_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Sample;

    fn series() -> Series {
        let mut series = Series::new();
        series.append(Sample::new(0.0, 1.0));
        series.append(Sample::new(0.5, 2.0));
        series.append(Sample::new(1.0, 3.0));
        series
    }

    #[test]
    fn writes_header_and_rows() {
        let mut out = Vec::new();
        write_csv(&mut out, &series(), "Capacitance (F)").unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "Time,Capacitance (F)\n0,1\n0.5,2\n1,3\n");
    }

    #[test]
    fn empty_series_writes_header_only() {
        let mut out = Vec::new();
        write_csv(&mut out, &Series::new(), "Resistance (Ω)").unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Time,Resistance (Ω)\n");
    }

    #[test]
    fn cancelled_save_is_a_no_op() {
        assert_eq!(save_csv(None, &series(), "Capacitance (F)").unwrap(), None);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs").join("cap.csv");

        let written = save_csv(Some(&path), &series(), "Capacitance (F)").unwrap();
        assert_eq!(written.as_deref(), Some(path.as_path()));

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Time,Capacitance (F)\n"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn default_name_is_timestamped() {
        let name = default_file_name();
        assert!(name.starts_with("session_"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "session_YYYYmmdd_HHMMSS.csv".len());
    }
}
