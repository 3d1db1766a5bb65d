//! Padding helpers.
//!
//! Kernels assume a full final work-group, so every device-bound slice is
//! padded to a multiple of the backend's work-group size with the neutral
//! element of the operation it feeds. The bitonic network additionally
//! requires a power-of-two length.

/// Pad `data` to the next multiple of `multiple` with `fill`.
///
/// Returns the input unchanged (as an owned vector) when it already divides
/// evenly. `multiple` must be non-zero.
pub fn pad_to_workgroup(data: &[f32], multiple: usize, fill: f32) -> Vec<f32> {
    debug_assert!(multiple > 0);
    let rem = data.len() % multiple;
    let mut out = data.to_vec();
    if rem != 0 {
        out.resize(data.len() + (multiple - rem), fill);
    }
    out
}

/// Pad `data` with `fill` to the next power of two that is at least
/// `floor`. `floor` itself must be a power of two.
pub fn pad_to_pow2(data: &[f32], floor: usize, fill: f32) -> Vec<f32> {
    debug_assert!(floor.is_power_of_two());
    let target = data.len().next_power_of_two().max(floor);
    let mut out = data.to_vec();
    out.resize(target, fill);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_partial_group_with_fill() {
        let padded = pad_to_workgroup(&[1.0, 2.0, 3.0], 4, 0.0);
        assert_eq!(padded, vec![1.0, 2.0, 3.0, 0.0]);
    }

    #[test]
    fn exact_multiple_is_unchanged() {
        let padded = pad_to_workgroup(&[1.0, 2.0, 3.0, 4.0], 4, f32::INFINITY);
        assert_eq!(padded, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn pow2_padding_respects_the_floor() {
        let padded = pad_to_pow2(&[5.0; 3], 32, f32::INFINITY);
        assert_eq!(padded.len(), 32);
        assert!(padded[3..].iter().all(|v| v.is_infinite()));

        let padded = pad_to_pow2(&[5.0; 40], 32, f32::INFINITY);
        assert_eq!(padded.len(), 64);
    }
}
