//! Text rendering of the comparison report.

use std::io::{self, Write};

use parstat_engine::{ComparisonReport, RunReport, StatisticSummary};

fn ms(ns: u64) -> f64 {
    ns as f64 / 1_000_000.0
}

fn render_statistic(w: &mut impl Write, name: &str, s: &StatisticSummary) -> io::Result<()> {
    writeln!(
        w,
        "  {:<8} {:>14.6}   kernel {:>9.3} ms  write {:>9.3} ms  read {:>9.3} ms",
        name,
        s.value,
        ms(s.kernel_ns),
        ms(s.write_ns),
        ms(s.read_ns)
    )
}

fn render_run(w: &mut impl Write, run: &RunReport) -> io::Result<()> {
    writeln!(w, "{} run ({} samples):", run.label, run.count)?;
    render_statistic(w, "mean", &run.mean)?;
    render_statistic(w, "min", &run.minimum)?;
    render_statistic(w, "max", &run.maximum)?;
    render_statistic(w, "std dev", &run.std_dev)?;
    writeln!(
        w,
        "  totals: kernel {:.3} ms, transfers {:.3} ms, overall {:.3} ms",
        ms(run.totals.kernel_ns),
        ms(run.totals.mem_ns),
        ms(run.totals.overall_ns())
    )
}

pub fn render(w: &mut impl Write, report: &ComparisonReport) -> io::Result<()> {
    writeln!(
        w,
        "device: {} ({}, vendor {})",
        report.optimized.device.name, report.optimized.device.backend, report.optimized.device.vendor
    )?;
    render_run(w, &report.optimized)?;
    render_run(w, &report.baseline)?;
    if report.saved_ns >= 0 {
        writeln!(
            w,
            "optimized plan saved {:.3} ms of device time",
            ms(report.saved_ns as u64)
        )
    } else {
        writeln!(
            w,
            "optimized plan lost {:.3} ms of device time",
            ms(report.saved_ns.unsigned_abs())
        )
    }
}
