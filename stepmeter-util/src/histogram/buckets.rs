use std::sync::OnceLock;

// 1, 2, 3, then for every even power of two 2^e below 2^62, steps of 2^e/3 up to
// 4 * 2^e - 2^e/3, capped with i64::MAX.
fn ladder() -> &'static [f64] {
    static LADDER: OnceLock<Vec<f64>> = OnceLock::new();
    LADDER.get_or_init(|| {
        let mut buckets = vec![1.0, 2.0, 3.0];
        let mut exp = 2;
        while exp < 62 {
            let mut current: u128 = 1 << exp;
            let delta = current / 3;
            let next = (current << 2) - delta;
            while current < next {
                buckets.push(current as f64);
                current += delta;
            }
            exp += 2;
        }
        buckets.push(i64::MAX as f64);
        buckets
    })
}

/// The default bucket ladder clipped to `[min, max]`.
pub fn percentile_buckets(min: f64, max: f64) -> &'static [f64] {
    let ladder = ladder();
    let start = ladder.partition_point(|b| *b < min);
    let end = ladder.partition_point(|b| *b <= max);
    if start >= end {
        &[]
    } else {
        &ladder[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::{ladder, percentile_buckets};

    #[test]
    fn ladder_is_strictly_increasing() {
        let ladder = ladder();
        assert!(ladder.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(&ladder[..5], &[1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn clipping_respects_both_edges() {
        assert_eq!(percentile_buckets(16.0, 30.0), &[16.0, 21.0, 26.0]);
        assert!(percentile_buckets(30.0, 16.0).is_empty());
        assert_eq!(percentile_buckets(1.0, f64::INFINITY).len(), ladder().len());
    }
}
