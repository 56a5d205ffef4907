use std::{
    ffi::OsStr,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use chrono::{Duration, NaiveDateTime, Timelike};
use warden_core::archive::{archive_file_name, archive_stem, parse_archive_name};

use crate::error::BackupError;

/// One backup cycle: a staging copy of the sources and the archive it becomes.
///
/// The staging directory is removed when the job is finalized or dropped, so every
/// exit path of a backup cycle (including early returns and panics) cleans it up.
#[derive(Debug)]
pub struct BackupJob {
    pub staging_dir: PathBuf,
    pub archive_path: PathBuf,
    staging_removed: bool,
}

impl BackupJob {
    fn remove_staging(&mut self) {
        if self.staging_removed {
            return;
        }
        self.staging_removed = true;
        if !self.staging_dir.exists() {
            return;
        }
        match fs::remove_dir_all(&self.staging_dir) {
            Ok(()) => tracing::info!(staging = %self.staging_dir.display(), "staging copy removed"),
            Err(err) => tracing::error!(
                staging = %self.staging_dir.display(),
                error = %err,
                "failed to remove staging copy"
            ),
        }
    }
}

impl Drop for BackupJob {
    fn drop(&mut self) {
        self.remove_staging();
    }
}

#[derive(Debug, Clone)]
pub struct BackupEngine {
    backup_dir: PathBuf,
}

impl BackupEngine {
    pub fn new(backup_dir: PathBuf) -> Self {
        Self { backup_dir }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copies every source into a fresh staging directory, by basename.
    ///
    /// All sources are checked up front; a single error lists every missing path.
    pub fn copy_to_staging(&self, sources: &[PathBuf]) -> Result<BackupJob, BackupError> {
        let missing: Vec<PathBuf> = sources.iter().filter(|p| !p.exists()).cloned().collect();
        if !missing.is_empty() {
            for path in &missing {
                tracing::error!(path = %path.display(), "backup source does not exist");
            }
            return Err(BackupError::PathNotFound(missing));
        }

        let mut job = self.new_job(chrono::Local::now().naive_local())?;
        for source in sources {
            let name = source
                .file_name()
                .unwrap_or_else(|| OsStr::new("source"));
            let dest = unique_destination(&job.staging_dir, name);
            tracing::info!(
                source = %source.display(),
                dest = %dest.display(),
                "copying into staging"
            );
            if let Err(source_err) = copy_entry(source, &dest) {
                job.remove_staging();
                return Err(BackupError::Staging {
                    staging: job.staging_dir.clone(),
                    source: source_err,
                });
            }
        }
        Ok(job)
    }

    /// Compresses the staging copy into the job's archive and removes the staging
    /// directory, whether or not compression succeeded.
    pub fn compress_and_finalize(&self, mut job: BackupJob) -> Result<PathBuf, BackupError> {
        let result = write_archive(&job.staging_dir, &job.archive_path);
        job.remove_staging();

        match result {
            Ok(files) => {
                tracing::info!(archive = %job.archive_path.display(), files, "backup archive created");
                Ok(job.archive_path.clone())
            }
            Err(err) => Err(BackupError::CompressionFailure {
                archive: job.archive_path.clone(),
                source: err,
            }),
        }
    }

    fn new_job(&self, now: NaiveDateTime) -> Result<BackupJob, BackupError> {
        let ts = next_timestamp(&self.backup_dir, now);
        let staging_dir = self.backup_dir.join(archive_stem(ts));
        let archive_path = self.backup_dir.join(archive_file_name(ts));

        fs::create_dir_all(&staging_dir)
            .with_context(|| format!("create staging dir {}", staging_dir.display()))
            .map_err(|source| BackupError::Staging {
                staging: staging_dir.clone(),
                source,
            })?;

        Ok(BackupJob {
            staging_dir,
            archive_path,
            staging_removed: false,
        })
    }
}

/// Newest archive timestamp already present in `dir`.
fn latest_archive(dir: &Path) -> Option<NaiveDateTime> {
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter_map(|e| e.file_name().to_str().and_then(|n| parse_archive_name(n).ok()))
        .max()
}

/// `now` to the second, moved forward only past names that are already taken.
/// Archives dated after `now` are reported but never followed, so retention keeps
/// working after a clock jump or a stray file.
fn next_timestamp(dir: &Path, now: NaiveDateTime) -> NaiveDateTime {
    let mut ts = now.with_nanosecond(0).unwrap_or(now);
    if let Some(latest) = latest_archive(dir)
        && latest > ts
    {
        tracing::warn!(
            latest = %latest,
            now = %ts,
            "backup dir holds an archive dated in the future; naming by the current clock"
        );
    }
    while dir.join(archive_stem(ts)).exists() || dir.join(archive_file_name(ts)).exists() {
        ts += Duration::seconds(1);
    }
    ts
}

/// `name`, or `stem_N.ext` for the first free `N` when `name` is already taken.
fn unique_destination(dir: &Path, name: &OsStr) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }

    let as_path = Path::new(name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()));

    let mut n = 1u32;
    loop {
        let candidate = dir.join(format!("{stem}_{n}{}", ext.as_deref().unwrap_or("")));
        if !candidate.exists() {
            tracing::warn!(
                name = %name.to_string_lossy(),
                renamed = %candidate.display(),
                "backup source name already staged; renaming"
            );
            return candidate;
        }
        n += 1;
    }
}

fn copy_entry(src: &Path, dst: &Path) -> anyhow::Result<()> {
    let meta = fs::metadata(src).with_context(|| format!("stat {}", src.display()))?;
    if meta.is_dir() {
        copy_dir_recursive(src, dst).with_context(|| format!("copy {}", src.display()))
    } else {
        fs::copy(src, dst).with_context(|| format!("copy {}", src.display()))?;
        Ok(())
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            continue;
        }
        if file_type.is_file() {
            fs::copy(&src_path, &dst_path)?;
            continue;
        }
        if file_type.is_symlink() {
            let target_meta = fs::metadata(&src_path).map_err(|e| {
                anyhow::anyhow!("failed to resolve symlink {}: {e}", src_path.display())
            })?;
            if target_meta.is_dir() {
                copy_dir_recursive(&src_path, &dst_path)?;
            } else {
                fs::copy(&src_path, &dst_path)?;
            }
        }
    }
    Ok(())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn zip_entry_name(root: &Path, path: &Path) -> anyhow::Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| anyhow::anyhow!("{} is outside {}", path.display(), root.display()))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Writes every file under `staging` into `archive` with paths relative to
/// `staging`. The archive only appears under its final name once complete.
fn write_archive(staging: &Path, archive: &Path) -> anyhow::Result<u64> {
    let mut files = Vec::new();
    collect_files(staging, &mut files).with_context(|| format!("walk {}", staging.display()))?;
    let total = files.len() as u64;
    tracing::info!(files = total, archive = %archive.display(), "compressing backup");

    let partial = archive.with_extension("zip.part");
    let result = (|| -> anyhow::Result<()> {
        let out = fs::File::create(&partial)
            .with_context(|| format!("create {}", partial.display()))?;
        let mut zip = zip::ZipWriter::new(std::io::BufWriter::new(out));
        let step = (total / 10).max(1);

        for (i, path) in files.iter().enumerate() {
            let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated)
                .large_file(size >= u64::from(u32::MAX));
            zip.start_file(zip_entry_name(staging, path)?, options)?;
            let mut src =
                fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
            std::io::copy(&mut src, &mut zip).with_context(|| format!("compress {}", path.display()))?;

            let done = i as u64 + 1;
            if done % step == 0 || done == total {
                tracing::info!(done, total, "compression progress");
            }
        }

        let mut writer = zip.finish()?;
        writer.flush()?;
        drop(writer);
        fs::rename(&partial, archive)
            .with_context(|| format!("rename {} -> {}", partial.display(), archive.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result.map(|()| total)
}
