//! Transfer and timing counters, monotonic between resets.

use std::fmt;

/// Counters accumulated by the cache since construction or the last
/// `reset_timers`. Byte counters are credited optimistically on the elision
/// paths and unwound (saturating) when a transfer turns out to be needed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub host_to_device_us: u64,
    pub device_to_host_us: u64,
    pub kernel_us: u64,
    pub hits: u64,
    pub misses: u64,
    pub bytes_saved: u64,
    pub bytes_total: u64,
    pub bytes_h2d_saved: u64,
    pub bytes_h2d_total: u64,
    pub bytes_d2h_saved: u64,
    pub bytes_d2h_total: u64,
}

impl TransferStats {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn transfer_us(&self) -> u64 {
        self.host_to_device_us + self.device_to_host_us
    }

    pub fn total_us(&self) -> u64 {
        self.transfer_us() + self.kernel_us
    }

    pub fn hit_ratio_percent(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }

    pub fn byte_ratio_percent(&self) -> f64 {
        ratio(self.bytes_saved, self.bytes_total)
    }

    pub fn h2d_ratio_percent(&self) -> f64 {
        ratio(self.bytes_h2d_saved, self.bytes_h2d_total)
    }

    pub fn d2h_ratio_percent(&self) -> f64 {
        ratio(self.bytes_d2h_saved, self.bytes_d2h_total)
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=========================================")?;
        writeln!(f, "{:<22} Time (us)", "Action")?;
        writeln!(f, "-----------------------------------------")?;
        writeln!(f, "{:<22} {}", "Host to device", self.host_to_device_us)?;
        writeln!(f, "{:<22} {}", "Device to host", self.device_to_host_us)?;
        writeln!(f, "{:<22} {}", "Total on transfers", self.transfer_us())?;
        writeln!(f, "{:<22} {}", "Kernel execution", self.kernel_us)?;
        writeln!(f, "{:<22} {}", "Total time", self.total_us())?;
        writeln!(f, "-----------------------------------------")?;
        writeln!(f, "{:<22} {}", "Cache hits", self.hits)?;
        writeln!(f, "{:<22} {}", "Cache misses", self.misses)?;
        writeln!(f, "{:<22} {:.2}%", "Hit ratio", self.hit_ratio_percent())?;
        writeln!(f, "{:<22} {}", "Bytes saved", self.bytes_saved)?;
        writeln!(f, "{:<22} {}", "Bytes total", self.bytes_total)?;
        writeln!(f, "{:<22} {:.2}%", "Byte ratio", self.byte_ratio_percent())?;
        writeln!(f, "{:<22} {}", "Bytes h2d saved", self.bytes_h2d_saved)?;
        writeln!(f, "{:<22} {}", "Bytes h2d total", self.bytes_h2d_total)?;
        writeln!(f, "{:<22} {:.2}%", "Byte h2d ratio", self.h2d_ratio_percent())?;
        writeln!(f, "{:<22} {}", "Bytes d2h saved", self.bytes_d2h_saved)?;
        writeln!(f, "{:<22} {}", "Bytes d2h total", self.bytes_d2h_total)?;
        writeln!(f, "{:<22} {:.2}%", "Byte d2h ratio", self.d2h_ratio_percent())?;
        write!(f, "=========================================")
    }
}
