//! Record sinks: where routed records are written.
//!
//! The core never opens files. A sink receives each routed record once per
//! destination and decides what a destination id means.

use munger_types::{DestinationId, Record, RecordOutcome, Result};

pub trait RecordSink {
    /// Write `record` to `destination`.
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()>;

    /// Write a record together with its stage results. Sinks that render
    /// diagnostics override this; the default writes the record only.
    fn accept_outcome(&mut self, outcome: &RecordOutcome, destination: &str) -> Result<()> {
        self.accept(&outcome.record, destination)
    }

    /// Flush buffered output. Called once after the last record.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<S: RecordSink + ?Sized> RecordSink for &mut S {
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()> {
        (**self).accept(record, destination)
    }

    fn accept_outcome(&mut self, outcome: &RecordOutcome, destination: &str) -> Result<()> {
        (**self).accept_outcome(outcome, destination)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

impl<S: RecordSink + ?Sized> RecordSink for Box<S> {
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()> {
        (**self).accept(record, destination)
    }

    fn accept_outcome(&mut self, outcome: &RecordOutcome, destination: &str) -> Result<()> {
        (**self).accept_outcome(outcome, destination)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Keeps every write in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Vec<(DestinationId, RecordOutcome)>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All writes as `(destination, outcome)` pairs.
    pub fn writes(&self) -> &[(DestinationId, RecordOutcome)] {
        &self.writes
    }

    /// Records written to one destination, in write order.
    pub fn records(&self, destination: &str) -> Vec<&Record> {
        self.outcomes(destination).into_iter().map(|o| &o.record).collect()
    }

    pub fn outcomes(&self, destination: &str) -> Vec<&RecordOutcome> {
        self.writes
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, o)| o)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl RecordSink for MemorySink {
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()> {
        self.writes
            .push((destination.to_string(), RecordOutcome::new(record.clone())));
        Ok(())
    }

    fn accept_outcome(&mut self, outcome: &RecordOutcome, destination: &str) -> Result<()> {
        self.writes.push((destination.to_string(), outcome.clone()));
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FnSink
// ---------------------------------------------------------------------------

/// Adapts a closure into a sink.
pub struct FnSink<F> {
    f: F,
}

impl<F> FnSink<F>
where
    F: FnMut(&Record, &str) -> Result<()>,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> RecordSink for FnSink<F>
where
    F: FnMut(&Record, &str) -> Result<()>,
{
    fn accept(&mut self, record: &Record, destination: &str) -> Result<()> {
        (self.f)(record, destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use munger_types::{Fields, MungerError};

    fn record(index: u64) -> Record {
        Record::new(index, Fields::new())
    }

    #[test]
    fn memory_sink_groups_by_destination() {
        let mut sink = MemorySink::new();
        sink.accept(&record(0), "a").unwrap();
        sink.accept(&record(1), "b").unwrap();
        sink.accept(&record(2), "a").unwrap();
        let a: Vec<u64> = sink.records("a").iter().map(|r| r.index).collect();
        assert_eq!(a, vec![0, 2]);
        assert_eq!(sink.len(), 3);
        assert!(sink.records("zzz").is_empty());
    }

    #[test]
    fn default_accept_outcome_forwards_record() {
        let mut seen = Vec::new();
        {
            let mut sink = FnSink::new(|r: &Record, d: &str| {
                seen.push((r.index, d.to_string()));
                Ok(())
            });
            sink.accept_outcome(&RecordOutcome::new(record(7)), "out").unwrap();
            sink.finish().unwrap();
        }
        assert_eq!(seen, vec![(7, "out".to_string())]);
    }

    #[test]
    fn fn_sink_propagates_errors() {
        let mut sink = FnSink::new(|_: &Record, _: &str| Err(MungerError::Other("full".into())));
        assert!(sink.accept(&record(0), "x").is_err());
    }

    #[test]
    fn borrowed_sink_forwards() {
        let mut inner = MemorySink::new();
        {
            let mut borrowed = &mut inner;
            borrowed.accept(&record(1), "x").unwrap();
            RecordSink::finish(&mut borrowed).unwrap();
        }
        assert_eq!(inner.len(), 1);
        assert!(inner.is_finished());
    }
}
