pub mod archive;
pub mod retention;

pub use archive::{archive_file_name, archive_stem, parse_archive_name};
pub use retention::{RetentionReport, cleanup_old_archives, cleanup_old_archives_at};
