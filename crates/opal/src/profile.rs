//! Append-only profile log: one space-separated line per dump.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;

use crate::config::DecimalSeparator;
use crate::geometry::{Geometry, Organisation};
use crate::replacement::ReplacementPolicy;
use crate::stats::TransferStats;

/// Snapshot of everything a profile line reports.
pub struct ProfileRecord<'a> {
    pub organisation: Organisation,
    pub policy: ReplacementPolicy,
    pub geometry: Geometry,
    pub stats: &'a TransferStats,
}

impl ProfileRecord<'_> {
    /// Render the line: timestamp, geometry, timings (µs), hit and byte
    /// counters with their ratios, then the caller's free-form fields.
    pub fn render(&self, separator: DecimalSeparator, extra: &[String]) -> String {
        let timestamp = Local::now().format("%y-%m-%d %H:%M:%S");
        let stats = self.stats;
        let mut fields = vec![
            timestamp.to_string(),
            self.organisation.to_string(),
            self.policy.to_string(),
            self.geometry.set_count.to_string(),
            self.geometry.line_count.to_string(),
            stats.host_to_device_us.to_string(),
            stats.device_to_host_us.to_string(),
            stats.kernel_us.to_string(),
            stats.total_us().to_string(),
            stats.hits.to_string(),
            stats.misses.to_string(),
            format_ratio(stats.hit_ratio_percent(), separator),
            stats.bytes_saved.to_string(),
            stats.bytes_total.to_string(),
            format_ratio(stats.byte_ratio_percent(), separator),
            stats.bytes_h2d_saved.to_string(),
            stats.bytes_h2d_total.to_string(),
            format_ratio(stats.h2d_ratio_percent(), separator),
            stats.bytes_d2h_saved.to_string(),
            stats.bytes_d2h_total.to_string(),
            format_ratio(stats.d2h_ratio_percent(), separator),
        ];
        fields.extend(extra.iter().cloned());
        fields.join(" ")
    }

    /// Append the rendered line to `path`, creating the file if needed.
    pub fn append_to(&self, path: &Path, separator: DecimalSeparator, extra: &[String]) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", self.render(separator, extra))
    }
}

fn format_ratio(value: f64, separator: DecimalSeparator) -> String {
    let rendered = format!("{value:.2}");
    match separator {
        DecimalSeparator::Point => rendered,
        DecimalSeparator::Comma => rendered.replace('.', ","),
    }
}
