//! Timing accounting for device work.
//!
//! Backends report host-measured completion events per blocking call; the
//! engine folds them into per-statistic [`DispatchTiming`] and per-run
//! [`TimingTotals`]. Kernel time and memory-transfer time are kept apart so
//! the comparison report can show where a plan spends its budget.

use std::ops::AddAssign;

use serde::Serialize;

/// Accumulated nanoseconds for one statistic: kernel execution plus
/// host-to-device writes and device-to-host reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchTiming {
    pub kernel_ns: u64,
    pub write_ns: u64,
    pub read_ns: u64,
}

impl DispatchTiming {
    pub fn total_ns(&self) -> u64 {
        self.kernel_ns + self.write_ns + self.read_ns
    }
}

impl AddAssign for DispatchTiming {
    fn add_assign(&mut self, rhs: Self) {
        self.kernel_ns += rhs.kernel_ns;
        self.write_ns += rhs.write_ns;
        self.read_ns += rhs.read_ns;
    }
}

/// Run-level totals: kernel time and combined transfer time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimingTotals {
    pub kernel_ns: u64,
    pub mem_ns: u64,
}

impl TimingTotals {
    pub fn overall_ns(&self) -> u64 {
        self.kernel_ns + self.mem_ns
    }

    pub fn absorb(&mut self, timing: DispatchTiming) {
        self.kernel_ns += timing.kernel_ns;
        self.mem_ns += timing.write_ns + timing.read_ns;
    }
}

impl AddAssign for TimingTotals {
    fn add_assign(&mut self, rhs: Self) {
        self.kernel_ns += rhs.kernel_ns;
        self.mem_ns += rhs.mem_ns;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_split_kernel_from_transfers() {
        let mut totals = TimingTotals::default();
        totals.absorb(DispatchTiming {
            kernel_ns: 100,
            write_ns: 30,
            read_ns: 20,
        });
        totals.absorb(DispatchTiming {
            kernel_ns: 50,
            write_ns: 10,
            read_ns: 0,
        });
        assert_eq!(totals.kernel_ns, 150);
        assert_eq!(totals.mem_ns, 60);
        assert_eq!(totals.overall_ns(), 210);
    }
}
