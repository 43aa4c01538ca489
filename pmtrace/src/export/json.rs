//! Pretty JSON dump of the whole output model

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ExportError;
use crate::trace_data::TraceData;

/// Serialize `data` to `writer`
pub fn write_json<W: Write>(data: &TraceData, writer: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(writer, data)?;
    Ok(())
}

/// Create `path` and write `data` into it
pub fn export_json_file(data: &TraceData, path: &Path) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|source| ExportError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = BufWriter::new(file);
    write_json(data, &mut writer)?;
    writer.flush().map_err(|source| ExportError::WriteFailed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
