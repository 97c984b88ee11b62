//! Fixed-budget downsampling of chart series.

/// Points kept for the level chart regardless of source volume.
pub const DEFAULT_DISPLAY_BUDGET: usize = 24;

/// Reduce `points` to at most `budget` elements, always keeping the last one.
///
/// Takes every `stride`-th element starting from the first, where
/// `stride = len / budget`. If the most recent point was skipped it is
/// appended; when the picks already fill the budget the final pick is
/// replaced instead. The result depends only on `len` and `budget`.
pub fn downsample<T: Clone>(points: &[T], budget: usize) -> Vec<T> {
    if budget == 0 || points.is_empty() {
        return Vec::new();
    }
    if points.len() <= budget {
        return points.to_vec();
    }

    let last = points.len() - 1;
    let mut picked = sample_indices(points.len(), budget);
    if picked.last() != Some(&last) {
        if picked.len() == budget {
            picked.pop();
        }
        picked.push(last);
    }
    picked.into_iter().map(|i| points[i].clone()).collect()
}

fn sample_indices(len: usize, budget: usize) -> Vec<usize> {
    let stride = (len / budget).max(1);
    (0..len).step_by(stride).take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_zero_budget() {
        assert!(downsample::<u32>(&[], 24).is_empty());
        assert!(downsample(&[1, 2, 3], 0).is_empty());
    }

    #[test]
    fn test_short_series_untouched() {
        let pts: Vec<u32> = (0..10).collect();
        assert_eq!(downsample(&pts, 24), pts);
        let exact: Vec<u32> = (0..24).collect();
        assert_eq!(downsample(&exact, 24), exact);
    }

    #[test]
    fn test_exact_multiple_keeps_last_within_budget() {
        // 48 points, stride 2: picks 0,2,..,46 fill the budget; 47 replaces 46.
        let pts: Vec<u32> = (0..48).collect();
        let out = downsample(&pts, 24);
        assert_eq!(out.len(), 24);
        assert_eq!(out[0], 0);
        assert_eq!(out[22], 44);
        assert_eq!(*out.last().unwrap(), 47);
    }

    #[test]
    fn test_one_over_budget_replaces_final_pick() {
        // 25 points, budget 24, stride 1: picks 0..=23, 24 replaces 23.
        let pts: Vec<u32> = (0..25).collect();
        let out = downsample(&pts, 24);
        assert_eq!(out.len(), 24);
        assert_eq!(out[22], 22);
        assert_eq!(out[23], 24);
    }

    #[test]
    fn test_odd_length_replaces_final_pick() {
        // 49 points, stride 2: picks 0,2,..,46 fill the budget; 48 replaces 46.
        let pts: Vec<u32> = (0..49).collect();
        let out = downsample(&pts, 24);
        assert_eq!(out.len(), 24);
        assert_eq!(out[22], 44);
        assert_eq!(out[23], 48);
    }

    #[test]
    fn test_large_series_bounded() {
        let pts: Vec<u32> = (0..8000).collect();
        let out = downsample(&pts, 24);
        assert!(out.len() <= 24);
        assert_eq!(*out.last().unwrap(), 7999);
        // stride 333
        assert_eq!(out[1], 333);
    }

    #[test]
    fn test_deterministic() {
        let pts: Vec<u32> = (0..1000).map(|i| i * 7 % 13).collect();
        assert_eq!(downsample(&pts, 24), downsample(&pts, 24));
    }

    #[test]
    fn test_last_point_always_present_for_many_lengths() {
        for len in 1..300usize {
            let pts: Vec<usize> = (0..len).collect();
            let out = downsample(&pts, 24);
            assert_eq!(*out.last().unwrap(), len - 1, "len {}", len);
            assert!(out.len() <= 24, "len {}", len);
            assert!(out.windows(2).all(|w| w[0] < w[1]), "len {}", len);
        }
    }
}
