use crate::pipeline::{DescriptorMatcher, Descriptors, RawMatch};
use anyhow::bail;
use ndarray::{ArrayView1, Axis};
use rayon::prelude::*;

/// Exhaustive nearest-neighbour matcher.
///
/// Binary descriptors are compared with Hamming distance, float descriptors
/// with Euclidean distance. One match per query row, in query order; ties go
/// to the lowest train index.
#[derive(Debug, Default, Clone)]
pub struct BruteForceMatcher;

impl BruteForceMatcher {
    pub fn new() -> Self {
        Self
    }
}

pub fn hamming_distance(a: ArrayView1<u8>, b: ArrayView1<u8>) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

pub fn euclidean_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

fn nearest<T, F>(query: ArrayView1<T>, train: &ndarray::Array2<T>, distance: F) -> Option<(usize, f32)>
where
    F: Fn(ArrayView1<T>, ArrayView1<T>) -> f32,
{
    let mut best: Option<(usize, f32)> = None;
    for (idx, row) in train.axis_iter(Axis(0)).enumerate() {
        let d = distance(query, row);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((idx, d)),
        }
    }
    best
}

impl DescriptorMatcher for BruteForceMatcher {
    fn name(&self) -> &'static str {
        "BruteForce"
    }

    fn match_descriptors(&self, query: &Descriptors, train: &Descriptors) -> crate::Result<Vec<RawMatch>> {
        if query.is_empty() || train.is_empty() {
            return Ok(Vec::new());
        }
        if query.width() != train.width() {
            bail!(
                "descriptor width mismatch: {} vs {}",
                query.width(),
                train.width()
            );
        }

        let matches: Vec<RawMatch> = match (query, train) {
            (Descriptors::Binary(q), Descriptors::Binary(t)) => (0..q.nrows())
                .into_par_iter()
                .filter_map(|i| {
                    nearest(q.row(i), t, |a, b| hamming_distance(a, b) as f32)
                        .map(|(j, d)| RawMatch::new(i, j, d))
                })
                .collect(),
            (Descriptors::Float(q), Descriptors::Float(t)) => (0..q.nrows())
                .into_par_iter()
                .filter_map(|i| {
                    nearest(q.row(i), t, euclidean_distance).map(|(j, d)| RawMatch::new(i, j, d))
                })
                .collect(),
            _ => bail!(
                "descriptor kind mismatch: {:?} vs {:?}",
                query.kind(),
                train.kind()
            ),
        };

        log::trace!("matched {} query descriptors", matches.len());
        Ok(matches)
    }
}
