//! In-process reference backend.
//!
//! Buffers live in a host registry and kernels are evaluated one work-group
//! at a time, reproducing the device kernels exactly: the same group-wise
//! combine order and the same truncated integer/tenths split in the atomic
//! accumulator. Events carry real wall-clock timestamps, so timing totals
//! are well-formed even though the durations are trivial.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use parstat_backend_api::{
    BufferHandle, CompletionEvent, ComputeBackend, DeviceInfo, KernelInvocation,
};

enum HostBuffer {
    F32(Vec<f32>),
    SplitCells([i32; 2]),
}

pub struct HostBackend {
    buffers: Mutex<HashMap<u64, HostBuffer>>,
    next_id: AtomicU64,
    epoch: Instant,
    workgroup_size: usize,
}

impl HostBackend {
    /// Backend with the reference work-group size of 32.
    pub fn new() -> Self {
        Self::with_workgroup_size(32)
    }

    /// Backend with an arbitrary positive work-group size, mainly for tests
    /// that want small groups.
    pub fn with_workgroup_size(workgroup_size: usize) -> Self {
        assert!(workgroup_size > 0, "work-group size must be positive");
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            epoch: Instant::now(),
            workgroup_size,
        }
    }

    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos().min(u64::MAX as u128) as u64
    }

    fn insert(&self, buf: HostBuffer, len: usize) -> BufferHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.buffers
            .lock()
            .expect("buffer mutex poisoned")
            .insert(id, buf);
        BufferHandle { buffer_id: id, len }
    }

    fn with_f32<R>(&self, handle: &BufferHandle, f: impl FnOnce(&mut Vec<f32>) -> R) -> Result<R> {
        let mut guard = self.buffers.lock().expect("buffer mutex poisoned");
        match guard.get_mut(&handle.buffer_id) {
            Some(HostBuffer::F32(data)) => Ok(f(data)),
            Some(HostBuffer::SplitCells(_)) => {
                Err(anyhow!("buffer {} is not an f32 buffer", handle.buffer_id))
            }
            None => Err(anyhow!("buffer not found: {}", handle.buffer_id)),
        }
    }

    fn take_f32(&self, handle: &BufferHandle) -> Result<Vec<f32>> {
        self.with_f32(handle, |data| data.clone())
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a group sum into the truncated integer part and the truncated
/// tenths part, matching the device kernel's arithmetic.
fn split_group_sum(sum: f32) -> (i32, i32) {
    let whole = sum.trunc();
    (whole as i32, ((sum - whole) * 10.0).trunc() as i32)
}

impl ComputeBackend for HostBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "in-process host backend".to_string(),
            vendor: "parstat".to_string(),
            backend: "host".to_string(),
        }
    }

    fn workgroup_size(&self) -> usize {
        self.workgroup_size
    }

    fn create_f32(&self, len: usize) -> Result<BufferHandle> {
        Ok(self.insert(HostBuffer::F32(vec![0.0; len]), len))
    }

    fn create_split_cells(&self) -> Result<BufferHandle> {
        Ok(self.insert(HostBuffer::SplitCells([0; 2]), 2))
    }

    fn write_f32(&self, handle: &BufferHandle, data: &[f32]) -> Result<CompletionEvent> {
        let start_ns = self.now_ns();
        self.with_f32(handle, |buf| {
            if buf.len() != data.len() {
                bail!(
                    "write length mismatch: buffer {} holds {} elements, got {}",
                    handle.buffer_id,
                    buf.len(),
                    data.len()
                );
            }
            buf.copy_from_slice(data);
            Ok(())
        })??;
        Ok(CompletionEvent {
            start_ns,
            end_ns: self.now_ns(),
        })
    }

    fn fill_zero(&self, handle: &BufferHandle) -> Result<()> {
        let mut guard = self.buffers.lock().expect("buffer mutex poisoned");
        match guard.get_mut(&handle.buffer_id) {
            Some(HostBuffer::F32(data)) => data.fill(0.0),
            Some(HostBuffer::SplitCells(cells)) => *cells = [0; 2],
            None => return Err(anyhow!("buffer not found: {}", handle.buffer_id)),
        }
        Ok(())
    }

    fn dispatch(
        &self,
        invocation: &KernelInvocation<'_>,
        global_size: usize,
        local_size: usize,
    ) -> Result<CompletionEvent> {
        if local_size == 0 || global_size % local_size != 0 {
            bail!(
                "invalid dispatch geometry for {}: global {} not a multiple of local {}",
                invocation.kernel_name(),
                global_size,
                local_size
            );
        }
        let start_ns = self.now_ns();
        match invocation {
            KernelInvocation::Reduce { op, input, output } => {
                let groups = global_size / local_size;
                let src = self.take_f32(input)?;
                if src.len() < global_size {
                    bail!("reduce input shorter than global size");
                }
                self.with_f32(output, |dst| {
                    if dst.len() < groups {
                        bail!("reduce output shorter than work-group count");
                    }
                    for g in 0..groups {
                        let chunk = &src[g * local_size..(g + 1) * local_size];
                        let mut acc = op.neutral();
                        for &v in chunk {
                            acc = op.combine(acc, v);
                        }
                        dst[g] = acc;
                    }
                    Ok(())
                })??;
            }
            KernelInvocation::AtomicSplitSum { input, cells } => {
                let groups = global_size / local_size;
                let src = self.take_f32(input)?;
                if src.len() < global_size {
                    bail!("atomic sum input shorter than global size");
                }
                let mut guard = self.buffers.lock().expect("buffer mutex poisoned");
                let slot = match guard.get_mut(&cells.buffer_id) {
                    Some(HostBuffer::SplitCells(slot)) => slot,
                    Some(HostBuffer::F32(_)) => {
                        bail!("buffer {} is not a split-cell buffer", cells.buffer_id)
                    }
                    None => bail!("buffer not found: {}", cells.buffer_id),
                };
                for g in 0..groups {
                    let sum: f32 = src[g * local_size..(g + 1) * local_size].iter().sum();
                    let (whole, tenths) = split_group_sum(sum);
                    slot[0] = slot[0].wrapping_add(whole);
                    slot[1] = slot[1].wrapping_add(tenths);
                }
            }
            KernelInvocation::SquaredDeviation {
                input,
                output,
                mean,
            } => {
                let src = self.take_f32(input)?;
                if src.len() < global_size {
                    bail!("map input shorter than global size");
                }
                self.with_f32(output, |dst| {
                    if dst.len() < global_size {
                        bail!("map output shorter than global size");
                    }
                    for i in 0..global_size {
                        let d = src[i] - mean;
                        dst[i] = d * d;
                    }
                    Ok(())
                })??;
            }
            KernelInvocation::BitonicStep { data, j, k } => {
                let j = *j as usize;
                let k = *k as usize;
                self.with_f32(data, |buf| {
                    if buf.len() < global_size {
                        bail!("sort buffer shorter than global size");
                    }
                    for i in 0..global_size {
                        let ixj = i ^ j;
                        if ixj <= i || ixj >= global_size {
                            continue;
                        }
                        let ascending = i & k == 0;
                        let (a, b) = (buf[i], buf[ixj]);
                        if (ascending && a > b) || (!ascending && a < b) {
                            buf[i] = b;
                            buf[ixj] = a;
                        }
                    }
                    Ok(())
                })??;
            }
        }
        Ok(CompletionEvent {
            start_ns,
            end_ns: self.now_ns(),
        })
    }

    fn read_f32(&self, handle: &BufferHandle, out: &mut [f32]) -> Result<CompletionEvent> {
        let start_ns = self.now_ns();
        self.with_f32(handle, |buf| {
            if buf.len() < out.len() {
                bail!(
                    "read length mismatch: buffer {} holds {} elements, wanted {}",
                    handle.buffer_id,
                    buf.len(),
                    out.len()
                );
            }
            out.copy_from_slice(&buf[..out.len()]);
            Ok(())
        })??;
        Ok(CompletionEvent {
            start_ns,
            end_ns: self.now_ns(),
        })
    }

    fn read_split_cells(&self, handle: &BufferHandle) -> Result<([i32; 2], CompletionEvent)> {
        let start_ns = self.now_ns();
        let guard = self.buffers.lock().expect("buffer mutex poisoned");
        let cells = match guard.get(&handle.buffer_id) {
            Some(HostBuffer::SplitCells(cells)) => *cells,
            Some(HostBuffer::F32(_)) => {
                bail!("buffer {} is not a split-cell buffer", handle.buffer_id)
            }
            None => bail!("buffer not found: {}", handle.buffer_id),
        };
        drop(guard);
        Ok((
            cells,
            CompletionEvent {
                start_ns,
                end_ns: self.now_ns(),
            },
        ))
    }

    fn free(&self, handle: &BufferHandle) -> Result<()> {
        self.buffers
            .lock()
            .expect("buffer mutex poisoned")
            .remove(&handle.buffer_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parstat_backend_api::ReduceOp;

    #[test]
    fn reduce_produces_one_partial_per_group() {
        let backend = HostBackend::with_workgroup_size(4);
        let input = backend.create_f32(8).unwrap();
        let output = backend.create_f32(2).unwrap();
        backend
            .write_f32(&input, &[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0, 6.0])
            .unwrap();
        backend
            .dispatch(
                &KernelInvocation::Reduce {
                    op: ReduceOp::Min,
                    input: &input,
                    output: &output,
                },
                8,
                4,
            )
            .unwrap();
        let mut partials = [0.0f32; 2];
        backend.read_f32(&output, &mut partials).unwrap();
        assert_eq!(partials, [1.0, 2.0]);
    }

    #[test]
    fn atomic_split_sum_truncates_to_tenths() {
        let backend = HostBackend::with_workgroup_size(2);
        let input = backend.create_f32(4).unwrap();
        let cells = backend.create_split_cells().unwrap();
        // group sums: 1.26 and -2.5
        backend
            .write_f32(&input, &[1.0, 0.26, -1.25, -1.25])
            .unwrap();
        backend.fill_zero(&cells).unwrap();
        backend
            .dispatch(
                &KernelInvocation::AtomicSplitSum {
                    input: &input,
                    cells: &cells,
                },
                4,
                2,
            )
            .unwrap();
        let (cells, _) = backend.read_split_cells(&cells).unwrap();
        // 1.26 -> (1, 2); -2.5 -> (-2, -5)
        assert_eq!(cells, [-1, -3]);
    }

    #[test]
    fn dispatch_rejects_ragged_geometry() {
        let backend = HostBackend::with_workgroup_size(4);
        let input = backend.create_f32(6).unwrap();
        let output = backend.create_f32(2).unwrap();
        let err = backend
            .dispatch(
                &KernelInvocation::Reduce {
                    op: ReduceOp::Sum,
                    input: &input,
                    output: &output,
                },
                6,
                4,
            )
            .unwrap_err();
        assert!(err.to_string().contains("not a multiple"));
    }

    #[test]
    fn bitonic_steps_sort_a_power_of_two_buffer() {
        let backend = HostBackend::with_workgroup_size(2);
        let data = backend.create_f32(8).unwrap();
        backend
            .write_f32(&data, &[7.0, 3.0, 1.0, 8.0, 2.0, 6.0, 5.0, 4.0])
            .unwrap();
        let n = 8u32;
        let mut k = 2u32;
        while k <= n {
            let mut j = k / 2;
            while j > 0 {
                backend
                    .dispatch(&KernelInvocation::BitonicStep { data: &data, j, k }, 8, 2)
                    .unwrap();
                j /= 2;
            }
            k *= 2;
        }
        let mut out = [0.0f32; 8];
        backend.read_f32(&data, &mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }
}
