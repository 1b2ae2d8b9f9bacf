use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// Write equal-length numeric columns as a headerless comma-separated
/// table, one row per index. Values are written in Rust's shortest
/// round-trip form, so re-parsing the file reproduces them exactly.
pub fn write_columns(path: &Path, columns: &[&[f64]]) -> Result<()> {
    let Some(first) = columns.first() else {
        return Err(anyhow!("no columns to write"));
    };
    let rows = first.len();
    if columns.iter().any(|column| column.len() != rows) {
        return Err(anyhow!("all columns must have equal length"));
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("cannot create {}", path.display()))?;
    for row in 0..rows {
        let record: Vec<String> = columns.iter().map(|column| column[row].to_string()).collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;
    debug!("{} rows written to {}", rows, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_columns(path: &Path, width: usize) -> Vec<Vec<f64>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_path(path)
            .unwrap();
        let mut columns = vec![Vec::new(); width];
        for record in reader.records() {
            let record = record.unwrap();
            assert_eq!(record.len(), width);
            for (column, field) in columns.iter_mut().zip(record.iter()) {
                column.push(field.parse::<f64>().unwrap());
            }
        }
        columns
    }

    #[test]
    fn round_trips_voltage_current_pairs() {
        let voltage = vec![0.0, 0.1, 0.2, 0.30000000000000004, 1.0];
        let current = vec![1.5e-9, -2.25e-9, 0.0, 3.0e-12, 1.1e-6];

        let file = tempfile::NamedTempFile::new().unwrap();
        write_columns(file.path(), &[&voltage, &current]).unwrap();

        let columns = read_columns(file.path(), 2);
        assert_eq!(columns[0], voltage);
        assert_eq!(columns[1], current);
    }

    #[test]
    fn round_trips_three_columns() {
        let voltage = vec![0.0, 0.5];
        let current = vec![1.0e-9, 2.0e-9];
        let temperature = vec![21.5, 21.6];

        let file = tempfile::NamedTempFile::new().unwrap();
        write_columns(file.path(), &[&voltage, &current, &temperature]).unwrap();

        let columns = read_columns(file.path(), 3);
        assert_eq!(columns[2], temperature);
    }

    #[test]
    fn ragged_columns_are_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(write_columns(file.path(), &[&[1.0, 2.0], &[1.0]]).is_err());
        assert!(write_columns(file.path(), &[]).is_err());
    }
}
