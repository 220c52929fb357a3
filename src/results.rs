// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::info;

use crate::dot_counts::DotCountRecord;
use crate::error::Result;

pub const DOT_COUNT_HEADERS: [&str; 7] = [
    "Image Name",
    "Directory Path",
    "Dot Maxima",
    "Tissue Area (um^2)",
    "Total Image Area (um^2)",
    "Dots per um^2",
    "Identified area to image size ratio (for QC)",
];

/// Writes `records` to a new `Counts_<unix nanoseconds>.csv` in `output_dir`
/// and returns its path. The header row is written even with no records.
pub fn write_dot_counts(records: &[DotCountRecord], output_dir: &Path, delimiter: u8)
                        -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos()).unwrap_or(0);
    let path = output_dir.join(format!("Counts_{}.csv", nanos));
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_path(&path)?;
    writer.write_record(DOT_COUNT_HEADERS)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {:?}", records.len(), path);
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, dots: u64) -> DotCountRecord {
        DotCountRecord{image_name: name.to_string(), directory: "/slides".to_string(),
                       dot_maxima: dots, tissue_area_um2: 200.0, total_area_um2: 400.0,
                       dots_per_um2: dots as f64 / 200.0, area_ratio: 0.5}
    }

    #[test]
    fn test_write_dot_counts() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dot_counts(&[record("a.tif", 10), record("b.tif", 3)],
                                    dir.path(), b'\t').unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("Counts_") && name.ends_with(".csv"));

        let mut reader = csv::ReaderBuilder::new().delimiter(b'\t').from_path(&path).unwrap();
        let headers: Vec<String> = reader.headers().unwrap().iter()
            .map(|h| h.to_string()).collect();
        assert_eq!(headers, DOT_COUNT_HEADERS);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "a.tif");
        assert_eq!(&rows[0][1], "/slides");
        assert_eq!(&rows[0][2], "10");
        assert_eq!(&rows[0][5], "0.05");
        assert_eq!(&rows[1][6], "0.5");
    }

    #[test]
    fn test_empty_has_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_dot_counts(&[], &dir.path().join("new"), b',').unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        assert!(contents.starts_with("Image Name,Directory Path,Dot Maxima"));
    }
}  // mod tests.
