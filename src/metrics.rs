//! Per-job metrics output.
//!
//! Sinks receive one record per job as it becomes terminal and flush
//! immediately, so a long-running online session never loses finished rows.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::scheduler::{CompletionRecord, Dispatch};

pub const CSV_HEADER: &str =
    "Command,Finished,Error,Burst Time,Turnaround Time,Waiting Time,Response Time";

pub trait MetricsSink {
    fn record(&mut self, record: &CompletionRecord) -> Result<()>;

    /// Called after every slice, terminal or not.
    fn dispatch(&mut self, _dispatch: &Dispatch) -> Result<()> {
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// CSV rows, times in whole milliseconds.
#[derive(Debug)]
pub struct CsvSink<W: Write> {
    out: W,
}

impl CsvSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvSink<W> {
    /// Writes the header right away.
    pub fn new(mut out: W) -> Result<Self> {
        writeln!(out, "{}", CSV_HEADER)?;
        out.flush()?;
        Ok(Self { out })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsSink for CsvSink<W> {
    fn record(&mut self, record: &CompletionRecord) -> Result<()> {
        let m = &record.metrics;
        writeln!(
            self.out,
            "{},{},{},{},{},{},{}",
            quote(&record.command),
            yes_no(record.finished()),
            yes_no(record.error()),
            m.burst.as_millis(),
            m.turnaround.as_millis(),
            m.waiting.as_millis(),
            m.response.as_millis(),
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonRow<'a> {
    job: usize,
    command: &'a str,
    finished: bool,
    error: bool,
    burst_ms: u64,
    turnaround_ms: u64,
    waiting_ms: u64,
    response_ms: u64,
}

/// One JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    out: W,
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn record(&mut self, record: &CompletionRecord) -> Result<()> {
        let m = &record.metrics;
        let row = JsonRow {
            job: record.job.0,
            command: &record.command,
            finished: record.finished(),
            error: record.error(),
            burst_ms: m.burst.as_millis() as u64,
            turnaround_ms: m.turnaround.as_millis() as u64,
            waiting_ms: m.waiting.as_millis() as u64,
            response_ms: m.response.as_millis() as u64,
        };
        serde_json::to_writer(&mut self.out, &row)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Context-switch trace: `command|start_ms|end_ms` per slice.
#[derive(Debug)]
pub struct ContextSwitchTrace<W: Write> {
    out: W,
}

impl<W: Write> ContextSwitchTrace<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MetricsSink for ContextSwitchTrace<W> {
    fn record(&mut self, _record: &CompletionRecord) -> Result<()> {
        Ok(())
    }

    fn dispatch(&mut self, dispatch: &Dispatch) -> Result<()> {
        writeln!(
            self.out,
            "{}|{}|{}",
            dispatch.command,
            dispatch.start.as_millis(),
            dispatch.end.as_millis()
        )?;
        self.out.flush()?;
        Ok(())
    }
}
