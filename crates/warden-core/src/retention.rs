use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDateTime};

use crate::archive::{ArchiveNameError, parse_archive_name};

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted: Vec<PathBuf>,
    /// Archive-shaped names whose timestamp could not be parsed.
    pub skipped: Vec<PathBuf>,
}

/// Deletes `world_<ts>.zip` files in `folder` older than `max_age_days`, measured
/// against the local clock.
pub fn cleanup_old_archives(max_age_days: u32, folder: &Path) -> std::io::Result<RetentionReport> {
    cleanup_old_archives_at(max_age_days, folder, chrono::Local::now().naive_local())
}

pub fn cleanup_old_archives_at(
    max_age_days: u32,
    folder: &Path,
    now: NaiveDateTime,
) -> std::io::Result<RetentionReport> {
    let mut report = RetentionReport::default();
    let Some(cutoff) =
        Duration::try_days(i64::from(max_age_days)).and_then(|age| now.checked_sub_signed(age))
    else {
        tracing::info!(max_age_days, "retention reaches past the calendar; keeping every archive");
        return Ok(report);
    };

    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        let created = match parse_archive_name(name) {
            Ok(ts) => ts,
            Err(ArchiveNameError::NotAnArchive) => continue,
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "skipping archive");
                report.skipped.push(path);
                continue;
            }
        };

        if created >= cutoff {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => report.deleted.push(path),
            Err(err) => {
                tracing::warn!(file = %path.display(), error = %err, "failed to delete old archive");
            }
        }
    }

    if report.deleted.is_empty() {
        tracing::info!(folder = %folder.display(), max_age_days, "no old backups to delete");
    } else {
        tracing::info!(
            folder = %folder.display(),
            max_age_days,
            deleted = report.deleted.len(),
            "deleted old backups"
        );
    }
    Ok(report)
}
