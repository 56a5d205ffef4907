use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Every missing source is listed, not just the first one found.
    #[error("backup sources not found: {}", display_paths(.0))]
    PathNotFound(Vec<PathBuf>),

    #[error("failed to stage backup sources in {staging}: {source:#}")]
    Staging {
        staging: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to create archive {archive}: {source:#}")]
    CompressionFailure {
        archive: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("archive {archive} was not delivered after {attempts} attempts")]
    Exhausted { archive: PathBuf, attempts: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The server could not be relaunched; nothing is left running.
    #[error("server restart failed: {0:#}")]
    FatalRestartFailure(anyhow::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|last| last.contains(&s)) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn path_not_found_lists_every_path() {
        let err = BackupError::PathNotFound(vec![
            PathBuf::from("/srv/world"),
            PathBuf::from("/srv/world_nether"),
        ]);
        let msg = err.to_string();
        assert!(msg.contains("/srv/world,"));
        assert!(msg.contains("/srv/world_nether"));
    }

    #[test]
    fn error_chain_skips_repeated_causes() {
        let err = Err::<(), _>(std::io::Error::other("disk full"))
            .context("write archive")
            .unwrap_err();
        assert_eq!(format_error_chain(&err), "write archive: disk full");
    }
}
