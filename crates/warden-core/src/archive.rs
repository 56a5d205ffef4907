//! Archive naming convention shared by the backup engine, retention cleanup and the
//! receiver: `world_<YYYYMMDD_HHMMSS>.zip`.

use chrono::NaiveDateTime;

pub const ARCHIVE_PREFIX: &str = "world_";
pub const ARCHIVE_EXTENSION: &str = ".zip";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArchiveNameError {
    /// Not shaped like `world_*.zip`; retention leaves these alone silently.
    #[error("not a backup archive name")]
    NotAnArchive,
    /// Shaped like an archive but the timestamp does not parse.
    #[error("invalid archive timestamp {0:?} (expected YYYYMMDD_HHMMSS)")]
    BadTimestamp(String),
}

/// `world_<timestamp>`; used for the staging directory of a backup cycle.
pub fn archive_stem(ts: NaiveDateTime) -> String {
    format!("{ARCHIVE_PREFIX}{}", ts.format(TIMESTAMP_FORMAT))
}

pub fn archive_file_name(ts: NaiveDateTime) -> String {
    format!("{}{ARCHIVE_EXTENSION}", archive_stem(ts))
}

pub fn parse_archive_name(file_name: &str) -> Result<NaiveDateTime, ArchiveNameError> {
    let raw = file_name
        .strip_prefix(ARCHIVE_PREFIX)
        .and_then(|rest| rest.strip_suffix(ARCHIVE_EXTENSION))
        .ok_or(ArchiveNameError::NotAnArchive)?;
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|_| ArchiveNameError::BadTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn file_name_matches_convention() {
        assert_eq!(
            archive_file_name(ts(2024, 3, 7, 4, 5, 6)),
            "world_20240307_040506.zip"
        );
        assert_eq!(archive_stem(ts(2024, 3, 7, 4, 5, 6)), "world_20240307_040506");
    }

    #[test]
    fn parse_reads_back_timestamp() {
        let parsed = parse_archive_name("world_20231231_235959.zip").unwrap();
        assert_eq!(parsed, ts(2023, 12, 31, 23, 59, 59));
    }

    #[test]
    fn parse_rejects_other_names() {
        assert_eq!(
            parse_archive_name("notes.txt"),
            Err(ArchiveNameError::NotAnArchive)
        );
        assert_eq!(
            parse_archive_name("world_20240101_000000"),
            Err(ArchiveNameError::NotAnArchive)
        );
        assert!(matches!(
            parse_archive_name("world_latest.zip"),
            Err(ArchiveNameError::BadTimestamp(_))
        ));
    }

    #[test]
    fn bad_timestamp_names_the_raw_value() {
        let err = parse_archive_name("world_latest.zip").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid archive timestamp \"latest\" (expected YYYYMMDD_HHMMSS)"
        );
        assert_eq!(
            ArchiveNameError::NotAnArchive.to_string(),
            "not a backup archive name"
        );
    }

    #[test]
    fn names_sort_in_time_order() {
        let mut names = vec![
            archive_file_name(ts(2024, 1, 2, 0, 0, 0)),
            archive_file_name(ts(2023, 12, 31, 23, 0, 0)),
            archive_file_name(ts(2024, 1, 1, 12, 0, 0)),
        ];
        names.sort();
        assert_eq!(names[0], "world_20231231_230000.zip");
        assert_eq!(names[2], "world_20240102_000000.zip");
    }
}
