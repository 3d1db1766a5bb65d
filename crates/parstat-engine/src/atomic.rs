//! Single-dispatch sum via the atomic split accumulator.
//!
//! Instead of iterating device passes, one dispatch pre-sums each work-group
//! and atomically adds the group total's integer and tenths parts into two
//! shared cells. The reconstructed value trades roughly a tenth of accuracy
//! per work-group for a single kernel round-trip.

use parstat_backend_api::{ComputeBackend, KernelInvocation};

use crate::error::{EngineError, Result};
use crate::pad::pad_to_workgroup;
use crate::split::SplitSum;
use crate::timing::DispatchTiming;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AtomicSum {
    pub value: f64,
    pub timing: DispatchTiming,
}

/// Sum `data` in one dispatch through the split accumulator.
pub fn atomic_split_sum(backend: &dyn ComputeBackend, data: &[f32]) -> Result<AtomicSum> {
    if data.is_empty() {
        return Err(EngineError::Config("cannot sum an empty dataset".into()));
    }
    let group = backend.workgroup_size();
    let padded = pad_to_workgroup(data, group, 0.0);
    let global = padded.len();

    let input = backend.create_f32(global)?;
    let cells = backend.create_split_cells()?;
    backend.fill_zero(&cells)?;

    let mut timing = DispatchTiming::default();
    timing.write_ns += backend.write_f32(&input, &padded)?.duration_ns();
    let invocation = KernelInvocation::AtomicSplitSum {
        input: &input,
        cells: &cells,
    };
    timing.kernel_ns += backend.dispatch(&invocation, global, group)?.duration_ns();
    let (raw_cells, read_event) = backend.read_split_cells(&cells)?;
    timing.read_ns += read_event.duration_ns();
    backend.free(&input)?;
    backend.free(&cells)?;

    Ok(AtomicSum {
        value: SplitSum::from_cells(raw_cells).value(),
        timing,
    })
}
