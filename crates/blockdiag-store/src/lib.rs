// ABOUTME: Persistence layer for blockdiag, implementing the persistence sink over real storage.
// ABOUTME: Provides atomic per-height JSON files, a SQLite-backed sink, and reads of the on-disk archive.

pub mod archive;
pub mod fs;
pub mod sqlite;

pub use archive::{ArchiveError, DiagnosticsArchive};
pub use fs::FsSink;
pub use sqlite::{SqliteError, SqliteSink};
