//! Append-only CSV audit log of persisted hours

use async_trait::async_trait;
use chrono::NaiveDate;
use clima_core::{DayBucket, Reading, RecordLog, StoreError, StoreResult};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

pub const CSV_HEADER: [&str; 8] = [
    "fecha",
    "hora",
    "temperatura",
    "humedad",
    "presion",
    "viento",
    "lluvia",
    "nubes",
];

/// Flat record log. Rows are never read back or deduplicated, so the same
/// (fecha, hora) pair can appear once per cycle that wrote it.
#[derive(Debug, Clone)]
pub struct CsvRecordLog {
    path: PathBuf,
}

impl CsvRecordLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn row(date: NaiveDate, reading: &Reading) -> [String; 8] {
    [
        date.to_string(),
        reading.label(),
        reading.temperature.to_string(),
        reading.humidity.to_string(),
        reading.pressure.to_string(),
        reading.wind_speed.to_string(),
        u8::from(reading.rain).to_string(),
        reading.cloud_cover.to_string(),
    ]
}

/// Encode every reading as one record, optionally preceded by the header
fn encode(days: &[DayBucket], with_header: bool) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    if with_header {
        writer.write_record(CSV_HEADER)?;
    }
    for day in days {
        for reading in &day.readings {
            writer.write_record(&row(day.date, reading))?;
        }
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

#[async_trait]
impl RecordLog for CsvRecordLog {
    #[instrument(skip(self, days), fields(path = %self.path.display()))]
    async fn append(&self, days: &[DayBucket]) -> StoreResult<usize> {
        let rows: usize = days.iter().map(|day| day.readings.len()).sum();
        if rows == 0 {
            return Ok(0);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let is_new = !fs::try_exists(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        let chunk = encode(days, is_new)
            .map_err(|e| StoreError::Backend(format!("CSV encoding failed: {e}")))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;

        debug!(rows, header = is_new, "rows appended");
        Ok(rows)
    }
}
