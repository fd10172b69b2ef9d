//! Single-pass prefix sums with decoupled look-back.

pub mod collect;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod partition;
pub mod scan;
pub mod text;

pub use collect::{ScanReport, Timing};
pub use config::{ScanConfig, TeamShape};
pub use device::{ComputeResource, DeviceCapabilities, DeviceClass, Discovery};
pub use engine::Engine;
pub use error::{ErrorKind, ScanError, Stage};

#[cfg(test)]
mod tests {
    use std::fmt::Write;

    /// Plain sequential inclusive scan.
    pub(crate) fn reference_scan(input: &[f32]) -> Vec<f32> {
        input
            .iter()
            .scan(0f32, |acc, x| {
                *acc += x;
                Some(*acc)
            })
            .collect()
    }

    pub(crate) fn print_slice_comparison<T: std::fmt::Debug>(pos: usize, name_a: &str, a: &[T], name_b: &str, b: &[T]) {
        assert_eq!(a.len(), b.len());

        let mut msg = String::new();

        let start = pos.saturating_sub(30);
        let end = (pos + 30).min(a.len());

        writeln!(msg, "{: <10} | {: <45} | {: <45}", "idx", name_a, name_b).unwrap();

        for display_i in start..end {
            writeln!(
                msg,
                "{: <10} | {: <45} | {: <45}",
                display_i,
                format!("{:?}", a[display_i]),
                format!("{:?}", b[display_i])
            )
            .unwrap();
        }

        print!("{}", msg);
    }

    pub(crate) fn assert_slices_eq<T: PartialEq + std::fmt::Debug>(left: &[T], right: &[T]) {
        assert_eq!(left.len(), right.len());
        for (i, (a, b)) in std::iter::zip(left.iter(), right.iter()).enumerate() {
            if a != b {
                print_slice_comparison(i, "left", left, "right", right);

                panic!("assertion failure: vec mismatch at index {}\n", i);
            }
        }
    }

    #[test]
    fn reference_scan_is_inclusive() {
        assert_eq!(reference_scan(&[1.0, 2.0, 3.0, 4.0, 5.0]), vec![1.0, 3.0, 6.0, 10.0, 15.0]);
        assert!(reference_scan(&[]).is_empty());
    }
}
