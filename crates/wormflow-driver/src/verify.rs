//! Host-side reference and comparison of device results.

use crate::element::Element;
use crate::op::BinaryOp;

/// Result of comparing device output with the host reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    /// Elements compared
    pub total: usize,
    /// Elements that differ
    pub mismatches: usize,
    /// Index of the first differing element
    pub first_mismatch: Option<usize>,
}

impl Verification {
    /// True when every element matched
    pub const fn passed(&self) -> bool {
        self.mismatches == 0
    }
}

impl std::fmt::Display for Verification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.passed() {
            write!(f, "Completed successfully on the device, with {} elements", self.total)
        } else {
            write!(
                f,
                "Failure on the device, {} fails with {} elements",
                self.mismatches, self.total
            )
        }
    }
}

/// Compute `op(a[i], b[i])` on the host.
pub fn reference<E, O>(a: &[E], b: &[E], op: &O) -> Vec<E>
where
    E: Element,
    O: BinaryOp<E> + ?Sized,
{
    a.iter().zip(b).map(|(&x, &y)| op.apply(x, y)).collect()
}

/// Compare device output element by element against an expected array.
///
/// Elements missing from the shorter slice count as mismatches. Floats are
/// compared exactly: host and device apply the same IEEE-754 operation.
pub fn verify<E: Element>(actual: &[E], expected: &[E]) -> Verification {
    let total = actual.len().max(expected.len());
    let mut mismatches = total - actual.len().min(expected.len());
    let mut first_mismatch = (mismatches > 0).then(|| actual.len().min(expected.len()));

    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        if a != e {
            mismatches += 1;
            if first_mismatch.map_or(true, |f| i < f) {
                first_mismatch = Some(i);
            }
        }
    }

    Verification {
        total,
        mismatches,
        first_mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::EltwiseOp;

    #[test]
    fn matching_arrays_pass() {
        let a: Vec<f32> = (0..256).map(|i| i as f32).collect();
        let b: Vec<f32> = (0..256).map(|i| (256 - i) as f32).collect();
        let c = reference(&a, &b, &EltwiseOp::Add);
        assert!(c.iter().all(|&x| x == 256.0));

        let v = verify(&c, &c);
        assert!(v.passed());
        assert_eq!(
            v.to_string(),
            "Completed successfully on the device, with 256 elements"
        );
    }

    #[test]
    fn mismatches_are_counted() {
        let expected = vec![1u32, 2, 3, 4];
        let actual = vec![1u32, 0, 3, 0];
        let v = verify(&actual, &expected);
        assert_eq!(v.mismatches, 2);
        assert_eq!(v.first_mismatch, Some(1));
        assert_eq!(v.to_string(), "Failure on the device, 2 fails with 4 elements");
    }

    #[test]
    fn short_output_counts_missing_elements() {
        let v = verify(&[7i32, 8], &[7i32, 8, 9]);
        assert_eq!(v.total, 3);
        assert_eq!(v.mismatches, 1);
        assert_eq!(v.first_mismatch, Some(2));
    }
}
