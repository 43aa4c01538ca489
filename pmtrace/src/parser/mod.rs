//! Text-level parsing: one line in, one classified record (or metadata) out

pub mod line;
pub mod metadata;
pub mod ordering;

pub use line::{Dialect, LineClass, LineParser, RecordKind, TraceRecord};
pub use metadata::{parse_comment, parse_marker_time, LogHeader, MetadataLine, RunMetadata};
pub use ordering::TimestampReorderer;
