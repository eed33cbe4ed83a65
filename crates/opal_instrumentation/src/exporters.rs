//! Destinations for recorded metric events.

use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::Path;
use std::sync::mpsc::Sender;

use crate::event::MetricEvent;

/// A destination the recorder thread drains events into.
///
/// Exporters are owned by that one thread, so they take `&mut self` and may
/// fail per event; the recorder tallies failures and keeps draining.
pub trait MetricExporter: Send {
    fn export(&mut self, event: &MetricEvent) -> io::Result<()>;
}

/// Appends events to a file, one JSON object per line.
pub struct JsonlExporter {
    out: LineWriter<File>,
}

impl JsonlExporter {
    /// Open `path` for appending, creating it on first use.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: LineWriter::new(file),
        })
    }
}

impl MetricExporter for JsonlExporter {
    fn export(&mut self, event: &MetricEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")
    }
}

/// Writes events to stderr for quick inspection during development.
#[derive(Default)]
pub struct ConsoleExporter;

impl ConsoleExporter {
    pub fn new() -> Self {
        Self
    }
}

impl MetricExporter for ConsoleExporter {
    fn export(&mut self, event: &MetricEvent) -> io::Result<()> {
        let mut err = io::stderr().lock();
        writeln!(err, "metric {}", serde_json::to_string(event)?)
    }
}

/// Hands events to an in-process channel, mainly so tests can observe what
/// the recorder saw.
pub struct ChannelExporter {
    sender: Sender<MetricEvent>,
}

impl ChannelExporter {
    pub fn new(sender: Sender<MetricEvent>) -> Self {
        Self { sender }
    }
}

impl MetricExporter for ChannelExporter {
    fn export(&mut self, event: &MetricEvent) -> io::Result<()> {
        self.sender
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "metric receiver dropped"))
    }
}
