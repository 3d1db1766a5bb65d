//! Bitonic sort over the device (experimental).
//!
//! The host drives the classic (k, j) step sequence; each step is one
//! compare-exchange dispatch over the whole padded buffer. Padding with
//! `+inf` keeps the fill at the ascending tail so truncating the readback
//! recovers the sorted input.

use log::debug;

use parstat_backend_api::{ComputeBackend, KernelInvocation};

use crate::error::{EngineError, Result};
use crate::pad::pad_to_pow2;
use crate::timing::DispatchTiming;

/// Upper bound on sortable datasets. The network pads to a power of two, so
/// the capacity is one as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortPlan {
    pub capacity: usize,
}

impl Default for SortPlan {
    fn default() -> Self {
        Self { capacity: 32768 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sorted {
    pub values: Vec<f32>,
    pub timing: DispatchTiming,
}

/// Sort `data` ascending on the device.
pub fn bitonic_sort(
    backend: &dyn ComputeBackend,
    data: &[f32],
    plan: &SortPlan,
) -> Result<Sorted> {
    if data.is_empty() {
        return Err(EngineError::Config("cannot sort an empty dataset".into()));
    }
    if data.len() > plan.capacity {
        return Err(EngineError::CapacityExceeded {
            len: data.len(),
            capacity: plan.capacity,
        });
    }
    let group = backend.workgroup_size();
    let padded = pad_to_pow2(data, group, f32::INFINITY);
    let global = padded.len();

    let buffer = backend.create_f32(global)?;
    let mut timing = DispatchTiming::default();
    timing.write_ns += backend.write_f32(&buffer, &padded)?.duration_ns();

    let mut steps = 0u32;
    let mut k = 2u32;
    while (k as usize) <= global {
        let mut j = k >> 1;
        while j > 0 {
            let invocation = KernelInvocation::BitonicStep {
                data: &buffer,
                j,
                k,
            };
            timing.kernel_ns += backend.dispatch(&invocation, global, group)?.duration_ns();
            steps += 1;
            j >>= 1;
        }
        k <<= 1;
    }
    debug!("bitonic sort: {} elements in {} steps", global, steps);

    let mut values = vec![0.0f32; data.len()];
    timing.read_ns += backend.read_f32(&buffer, &mut values)?.duration_ns();
    backend.free(&buffer)?;
    Ok(Sorted { values, timing })
}
