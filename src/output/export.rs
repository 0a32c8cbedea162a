//! JSON Lines export of stored records

use crate::sink::{Record, SqliteSink};
use crate::Result;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes every stored record to `path`, one JSON object per line
///
/// Each object carries `source_url` plus the record's fields; a field named
/// `source_url` would be shadowed by the provenance value.
///
/// # Returns
///
/// The number of records written.
pub fn export_jsonl(sink: &SqliteSink, path: &Path) -> Result<usize> {
    let records = sink.load_records()?;
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    write_jsonl(&records, &mut writer)?;
    writer.flush()?;

    Ok(records.len())
}

/// Serializes records as JSON Lines into any writer
pub fn write_jsonl<W: Write>(records: &[Record], writer: &mut W) -> Result<()> {
    for record in records {
        let mut object = Map::new();
        for (name, value) in &record.fields {
            object.insert(name.clone(), serde_json::to_value(value)?);
        }
        object.insert("source_url".to_string(), Value::String(record.source_url.clone()));

        let line = serde_json::to_string(&Value::Object(object))?;
        writeln!(writer, "{}", line)?;
    }
    Ok(())
}
