use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("dataset not found: {0}")]
    Unavailable(String),
    #[error("failed to read dataset {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// One dataset row: recorded capture time plus instantaneous power in watts.
/// Power is taken as-is; the recordings contain zero and occasionally
/// negative values and nothing here second-guesses them.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceRecord {
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub power: f64,
}

/// Load the ordered reading sequence for one device from a `timestamp,power`
/// CSV file. `sample_size = None` replays the whole file.
pub fn load_records(path: &Path, sample_size: Option<usize>) -> Result<Vec<SourceRecord>, SourceError> {
    if !path.exists() {
        return Err(SourceError::Unavailable(path.display().to_string()));
    }

    let mut reader = csv::Reader::from_path(path).map_err(|source| SourceError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let mut records = Vec::new();
    for row in reader.deserialize::<SourceRecord>() {
        let record = row.map_err(|source| SourceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        records.push(record);
        if sample_size.is_some_and(|limit| records.len() >= limit) {
            break;
        }
    }
    Ok(records)
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("bad timestamp {raw:?}")))
}

/// Recordings carry either RFC 3339 timestamps or naive
/// `YYYY-MM-DD HH:MM:SS` ones; naive times are taken as UTC.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write fixture");
        file
    }

    #[test]
    fn loads_all_rows() {
        let file = write_fixture(
            "timestamp,power\n\
             2015-01-01 00:00:00,100.5\n\
             2015-01-01 00:00:06,101.0\n\
             2015-01-01 00:00:12,0.0\n",
        );
        let records = load_records(file.path(), None).expect("load");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].power, 100.5);
        assert_eq!(records[2].power, 0.0);
        assert!(records[0].timestamp < records[1].timestamp);
    }

    #[test]
    fn sample_size_truncates() {
        let file = write_fixture(
            "timestamp,power\n\
             2015-01-01T00:00:00Z,1.0\n\
             2015-01-01T00:00:06Z,2.0\n\
             2015-01-01T00:00:12Z,3.0\n",
        );
        let records = load_records(file.path(), Some(2)).expect("load");
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].power, 2.0);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let err = load_records(Path::new("/nonexistent/fridge_207.csv"), None)
            .expect_err("missing file");
        assert!(matches!(err, SourceError::Unavailable(_)));
    }

    #[test]
    fn timestamp_formats_accepted() {
        assert!(parse_timestamp("2015-01-01 10:20:30").is_some());
        assert!(parse_timestamp("2015-01-01T10:20:30").is_some());
        assert!(parse_timestamp("2015-01-01T10:20:30Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
