//! Correspondence filtering
//!
//! Matches are compared with their successor in the matcher's own output
//! order, not sorted by distance. A match is kept when its distance is below
//! `ratio` times the distance of the match that follows it; the last match
//! has no successor and is never kept.

use crate::pipeline::RawMatch;

/// Adjacency filter over raw matcher output.
///
/// Returns nothing unless more than `min_raw` raw matches are given.
pub fn adjacency_filter(raw: &[RawMatch], ratio: f32, min_raw: usize) -> Vec<RawMatch> {
    if raw.len() <= min_raw {
        return Vec::new();
    }

    raw.windows(2)
        .filter(|pair| pair[0].distance < ratio * pair[1].distance)
        .map(|pair| pair[0])
        .collect()
}

/// True when every match indexes into both keypoint sequences
pub fn indices_valid(matches: &[RawMatch], reference_len: usize, scene_len: usize) -> bool {
    matches
        .iter()
        .all(|m| m.query_idx < reference_len && m.train_idx < scene_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(distances: &[f32]) -> Vec<RawMatch> {
        distances
            .iter()
            .enumerate()
            .map(|(i, &d)| RawMatch::new(i, i, d))
            .collect()
    }

    #[test]
    fn test_keeps_earlier_of_each_qualifying_pair() {
        let kept = adjacency_filter(&raw(&[1.0, 10.0, 5.0, 6.0, 2.0, 100.0, 3.0, 4.0]), 0.6, 3);
        let idx: Vec<_> = kept.iter().map(|m| m.query_idx).collect();
        assert_eq!(idx, vec![0, 4]);
    }

    #[test]
    fn test_order_is_not_sorted() {
        // same distances, different order, different survivors
        let a = adjacency_filter(&raw(&[1.0, 5.0, 2.0, 9.0]), 0.6, 3);
        let b = adjacency_filter(&raw(&[5.0, 1.0, 9.0, 2.0]), 0.6, 3);
        assert_eq!(a.iter().map(|m| m.query_idx).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(b.iter().map(|m| m.query_idx).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_ratio_is_strict() {
        let kept = adjacency_filter(&raw(&[3.0, 5.0, 3.0, 5.0, 0.0]), 0.6, 3);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_zero_distances_never_survive() {
        assert!(adjacency_filter(&raw(&[0.0; 8]), 0.6, 3).is_empty());
    }

    #[test]
    fn test_requires_more_than_min_raw() {
        assert!(adjacency_filter(&raw(&[1.0, 10.0, 1.0]), 0.6, 3).is_empty());
        assert_eq!(adjacency_filter(&raw(&[1.0, 10.0, 1.0, 10.0]), 0.6, 3).len(), 2);
    }

    #[test]
    fn test_never_grows() {
        let input = raw(&[1.0, 2.0, 1.0, 2.0, 0.5, 9.0]);
        let kept = adjacency_filter(&input, 0.6, 3);
        assert!(kept.len() < input.len());
    }

    #[test]
    fn test_index_validation() {
        let matches = vec![RawMatch::new(0, 4, 1.0), RawMatch::new(2, 1, 1.0)];
        assert!(indices_valid(&matches, 3, 5));
        assert!(!indices_valid(&matches, 2, 5));
        assert!(!indices_valid(&matches, 3, 4));
    }
}
