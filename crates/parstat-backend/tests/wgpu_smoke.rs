//! Smoke tests against a real wgpu adapter.
//!
//! These exercise the actual WGSL kernels. When the machine has no
//! compatible adapter, each test logs and returns without asserting.

use parstat_backend::{WgpuBackend, WgpuBackendOptions};
use parstat_backend_api::{ComputeBackend, KernelInvocation, ReduceOp};

fn backend() -> Option<WgpuBackend> {
    match WgpuBackend::new(WgpuBackendOptions::default()) {
        Ok(b) => Some(b),
        Err(e) => {
            eprintln!("skipping wgpu smoke test: {e}");
            None
        }
    }
}

#[test]
fn reduce_kernels_produce_one_partial_per_group() {
    let Some(backend) = backend() else { return };
    let group = backend.workgroup_size();
    let data: Vec<f32> = (0..group * 2).map(|v| v as f32).collect();

    let input = backend.create_f32(data.len()).unwrap();
    let output = backend.create_f32(2).unwrap();
    backend.write_f32(&input, &data).unwrap();
    backend
        .dispatch(
            &KernelInvocation::Reduce {
                op: ReduceOp::Max,
                input: &input,
                output: &output,
            },
            data.len(),
            group,
        )
        .unwrap();
    let mut partials = vec![0.0f32; 2];
    backend.read_f32(&output, &mut partials).unwrap();
    assert_eq!(partials[0], (group - 1) as f32);
    assert_eq!(partials[1], (group * 2 - 1) as f32);

    backend.free(&input).unwrap();
    backend.free(&output).unwrap();
}

#[test]
fn atomic_split_kernel_accumulates_group_totals() {
    let Some(backend) = backend() else { return };
    let group = backend.workgroup_size();
    // Each group sums to exactly 8.25, splitting into (8, 2); two groups
    // leave the cells at (16, 4).
    let data: Vec<f32> = vec![8.25 / group as f32; group * 2];

    let input = backend.create_f32(data.len()).unwrap();
    let cells = backend.create_split_cells().unwrap();
    backend.write_f32(&input, &data).unwrap();
    backend.fill_zero(&cells).unwrap();
    backend
        .dispatch(
            &KernelInvocation::AtomicSplitSum {
                input: &input,
                cells: &cells,
            },
            data.len(),
            group,
        )
        .unwrap();
    let (raw, _) = backend.read_split_cells(&cells).unwrap();
    assert_eq!(raw[0], 16);
    assert_eq!(raw[1], 4);

    backend.free(&input).unwrap();
    backend.free(&cells).unwrap();
}
