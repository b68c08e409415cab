//! CSV input and the file-backed sink.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use anyhow::Context as _;
use munger_pipeline::RecordSink;
use munger_types::{
    value_to_text, DestinationId, Fields, MungerError, Record, RecordOutcome, Result, Value,
};

use crate::config::ResolvedDestination;

/// Column appended when a destination asks for diagnostics.
pub const ERRORS_COLUMN: &str = "ValidationErrors";

/// Open `path` and stream its rows as field maps keyed by the header row.
/// Every value is a string. Rows are read as the iterator is pulled.
///
/// Ragged rows are accepted: a short row lacks its trailing fields, and cells
/// past the last header are dropped.
pub fn read_records(path: &Path) -> anyhow::Result<impl Iterator<Item = Result<Fields>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening input {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading header row of {}", path.display()))?
        .clone();

    Ok(reader
        .into_records()
        .enumerate()
        .map(move |(index, row)| -> Result<Fields> {
            let row = row.map_err(|e| MungerError::Input {
                index: index as u64,
                message: e.to_string(),
            })?;
            if row.len() != headers.len() {
                tracing::debug!(
                    index,
                    cells = row.len(),
                    columns = headers.len(),
                    "Ragged input row"
                );
            }
            Ok(headers
                .iter()
                .zip(row.iter())
                .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
                .collect())
        }))
}

struct OpenFile {
    writer: csv::Writer<File>,
    columns: Vec<String>,
}

/// Writes each destination to its own CSV file. Files are created on the
/// first record routed to them, so unused destinations leave nothing behind.
pub struct CsvSink {
    destinations: BTreeMap<DestinationId, ResolvedDestination>,
    open: HashMap<DestinationId, OpenFile>,
}

impl CsvSink {
    pub fn new(destinations: BTreeMap<DestinationId, ResolvedDestination>) -> Self {
        Self {
            destinations,
            open: HashMap::new(),
        }
    }

    fn write(&mut self, outcome: &RecordOutcome, destination: &str) -> std::result::Result<(), String> {
        let config = self
            .destinations
            .get(destination)
            .ok_or_else(|| "destination is not configured".to_string())?;

        if !self.open.contains_key(destination) {
            let file = open_destination(config, &outcome.record)?;
            tracing::debug!(destination, path = %config.path.display(), "Opened destination");
            self.open.insert(destination.to_string(), file);
        }
        let Some(file) = self.open.get_mut(destination) else {
            return Err("destination is not open".to_string());
        };

        let mut row: Vec<String> = file
            .columns
            .iter()
            .map(|c| outcome.record.get(c).map(value_to_text).unwrap_or_default())
            .collect();
        if config.include_errors {
            row.push(render_diagnostics(outcome));
        }
        file.writer.write_record(&row).map_err(|e| e.to_string())
    }
}

fn open_destination(config: &ResolvedDestination, first: &Record) -> std::result::Result<OpenFile, String> {
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let columns = config
        .fieldnames
        .clone()
        .unwrap_or_else(|| first.fields.keys().cloned().collect());
    let mut writer = csv::Writer::from_path(&config.path).map_err(|e| e.to_string())?;

    let mut header = columns.clone();
    if config.include_errors {
        header.push(ERRORS_COLUMN.to_string());
    }
    writer.write_record(&header).map_err(|e| e.to_string())?;
    Ok(OpenFile { writer, columns })
}

/// `field: message` per diagnostic, joined with `; `.
pub fn render_diagnostics(outcome: &RecordOutcome) -> String {
    outcome
        .diagnostics()
        .map(|d| match &d.field {
            Some(field) => format!("{field}: {}", d.message),
            None => d.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

impl RecordSink for CsvSink {
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()> {
        self.accept_outcome(&RecordOutcome::new(record.clone()), destination)
    }

    fn accept_outcome(&mut self, outcome: &RecordOutcome, destination: &str) -> Result<()> {
        self.write(outcome, destination).map_err(|message| MungerError::Write {
            destination: destination.to_string(),
            index: outcome.index(),
            message,
        })
    }

    fn finish(&mut self) -> Result<()> {
        for file in self.open.values_mut() {
            file.writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munger_types::{Diagnostic, DiagnosticKind, Stage, StageOutcome};
    use serde_json::json;
    use std::path::PathBuf;

    fn dest(path: PathBuf) -> ResolvedDestination {
        ResolvedDestination {
            path,
            fieldnames: None,
            include_errors: false,
        }
    }

    fn record(index: u64, value: serde_json::Value) -> Record {
        Record::new(index, value.as_object().cloned().unwrap_or_default())
    }

    #[test]
    fn reads_rows_as_string_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "id,amount\n1,5.0\n2,\n").unwrap();

        let rows: Vec<Fields> = read_records(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["amount"], json!("5.0"));
        assert_eq!(rows[1]["amount"], json!(""));
        let keys: Vec<&String> = rows[0].keys().collect();
        assert_eq!(keys, ["id", "amount"]);
    }

    #[test]
    fn ragged_rows_are_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "a,b\n1,2\n3\n4,5,6\n").unwrap();

        let rows: Vec<Fields> = read_records(&path).unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["a"], json!("3"));
        assert!(!rows[1].contains_key("b"));
        assert_eq!(rows[2].len(), 2);
        assert_eq!(rows[2]["b"], json!("5"));
    }

    #[test]
    fn files_are_created_lazily_with_first_record_header() {
        let dir = tempfile::tempdir().unwrap();
        let used = dir.path().join("out/used.csv");
        let unused = dir.path().join("unused.csv");
        let mut sink = CsvSink::new(BTreeMap::from([
            ("used".to_string(), dest(used.clone())),
            ("unused".to_string(), dest(unused.clone())),
        ]));

        sink.accept(&record(0, json!({"b": "1", "a": 2.5})), "used").unwrap();
        sink.accept(&record(1, json!({"a": "x", "c": "dropped"})), "used").unwrap();
        sink.finish().unwrap();

        assert_eq!(std::fs::read_to_string(&used).unwrap(), "b,a\n1,2.5\n,x\n");
        assert!(!unused.exists());
    }

    #[test]
    fn fieldnames_and_error_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.csv");
        let mut sink = CsvSink::new(BTreeMap::from([(
            "errors".to_string(),
            ResolvedDestination {
                path: path.clone(),
                fieldnames: Some(vec!["id".into(), "amount".into()]),
                include_errors: true,
            },
        )]));

        let mut outcome = RecordOutcome::new(record(0, json!({"amount": "-1", "id": "7"})));
        let mut stage = StageOutcome::new(Stage::Validate);
        stage.push(Diagnostic::new(
            DiagnosticKind::ValidationFailure,
            Some("amount"),
            "greater_than(0)",
            "must be greater than 0",
        ));
        outcome.stages.push(stage);

        sink.accept_outcome(&outcome, "errors").unwrap();
        sink.finish().unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,amount,ValidationErrors\n7,-1,amount: must be greater than 0\n"
        );
    }

    #[test]
    fn unknown_destination_is_a_write_error() {
        let mut sink = CsvSink::new(BTreeMap::new());
        let err = sink.accept(&record(3, json!({})), "nowhere").unwrap_err();
        match err {
            MungerError::Write { destination, index, .. } => {
                assert_eq!(destination, "nowhere");
                assert_eq!(index, 3);
            }
            other => panic!("Expected Write error, got: {other:?}"),
        }
    }
}
