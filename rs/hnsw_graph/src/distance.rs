use half::bf16;
use ndarray::ArrayView1;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, fmt};

use crate::error::HnswError;

/// A value that can be stored as an embedding in the graph.
///
/// The graph itself never looks inside a vector: it only hands pairs of them
/// to a [`Distance`]. The numeric view is what the built-in [`DistanceMetric`]s
/// work on, and the `Debug` bound is used for human inspection only.
pub trait Vector: Clone + fmt::Debug {
    /// Number of components.
    fn dims(&self) -> usize;

    /// Numeric view of the components.
    fn to_f32(&self) -> Cow<'_, [f32]>;
}

impl Vector for Vec<f32> {
    fn dims(&self) -> usize {
        self.len()
    }

    fn to_f32(&self) -> Cow<'_, [f32]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl Vector for Vec<bf16> {
    fn dims(&self) -> usize {
        self.len()
    }

    fn to_f32(&self) -> Cow<'_, [f32]> {
        Cow::Owned(self.iter().map(|v| v.to_f32()).collect())
    }
}

/// A byte-string embedding, each byte being one component.
///
/// Renders as space separated 8-bit binary groups, e.g. `[00000001 11111111]`.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinaryString(pub Vec<u8>);

impl BinaryString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for BinaryString {
    fn from(bytes: Vec<u8>) -> Self {
        BinaryString(bytes)
    }
}

impl From<&[u8]> for BinaryString {
    fn from(bytes: &[u8]) -> Self {
        BinaryString(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for BinaryString {
    fn from(bytes: [u8; N]) -> Self {
        BinaryString(bytes.to_vec())
    }
}

impl fmt::Display for BinaryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{:08b}", b)?;
        }
        f.write_str("]")
    }
}

impl fmt::Debug for BinaryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Vector for BinaryString {
    fn dims(&self) -> usize {
        self.0.len()
    }

    fn to_f32(&self) -> Cow<'_, [f32]> {
        Cow::Owned(self.0.iter().map(|&b| b as f32).collect())
    }
}

/// Pairwise distance capability over a vector type.
///
/// Smaller is closer. Implementations should be deterministic and symmetric
/// for practical purposes; they are not required to be a metric.
pub trait Distance<V>: Send + Sync {
    fn distance(&self, a: &V, b: &V) -> Result<f32, HnswError>;
}

impl<V, F> Distance<V> for F
where
    F: Fn(&V, &V) -> Result<f32, HnswError> + Send + Sync,
{
    fn distance(&self, a: &V, b: &V) -> Result<f32, HnswError> {
        self(a, b)
    }
}

/// Distance metric types.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DistanceMetric {
    /// Cosine distance (1 - cosine similarity).
    #[default]
    Cosine,
    /// Euclidean distance (L2 norm).
    Euclidean,
    /// Negative inner product (dot product).
    InnerProduct,
    /// Manhattan distance (L1 norm).
    Manhattan,
}

impl<V: Vector> Distance<V> for DistanceMetric {
    fn distance(&self, a: &V, b: &V) -> Result<f32, HnswError> {
        self.compute_f32(&a.to_f32(), &b.to_f32())
    }
}

impl DistanceMetric {
    /// Compute the distance between two vectors using the selected metric.
    ///
    /// # Returns
    ///
    /// * `Result<f32, HnswError>` - The computed distance or an error if the dimensions don't match.
    pub fn compute_f32(&self, a: &[f32], b: &[f32]) -> Result<f32, HnswError> {
        if a.len() != b.len() {
            return Err(HnswError::DimensionMismatch {
                name: String::new(),
                expected: a.len(),
                got: b.len(),
            });
        }

        match self {
            DistanceMetric::Cosine => Ok(cosine_distance(a, b)),
            DistanceMetric::Euclidean => Ok(euclidean_distance(a, b)),
            DistanceMetric::InnerProduct => Ok(inner_product(a, b)),
            DistanceMetric::Manhattan => Ok(manhattan_distance(a, b)),
        }
    }
}

#[inline]
fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }

    let a_array = ArrayView1::from(a);
    let b_array = ArrayView1::from(b);
    let diff = &a_array - &b_array;
    diff.dot(&diff).sqrt()
}

#[inline]
fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }

    let a_array = ArrayView1::from(a);
    let b_array = ArrayView1::from(b);
    let dot_product = a_array.dot(&b_array);
    let norm_a = a_array.dot(&a_array).sqrt();
    let norm_b = b_array.dot(&b_array).sqrt();

    // zero vectors have no direction
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 1.0;
    }

    (1.0 - dot_product / (norm_a * norm_b)).max(0.0)
}

#[inline]
fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }

    -ArrayView1::from(a).dot(&ArrayView1::from(b))
}

#[inline]
fn manhattan_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }

    let a_array = ArrayView1::from(a);
    let b_array = ArrayView1::from(b);
    (&a_array - &b_array).mapv(f32::abs).sum()
}

/// Estimates the highest level index a graph of `size` nodes reaches when
/// each level keeps a fraction `ml` of the level below.
///
/// Used as the cap for [`LevelGen::generate`] and for sizing diagnostics.
/// Returns 1 for an empty corpus or an `ml` outside `(0, 1)`.
pub fn estimate_max_level(ml: f64, size: usize) -> usize {
    if size == 0 || !(ml > 0.0 && ml < 1.0) {
        return 1;
    }

    let l = (size as f64).ln() / (1.0 / ml).ln();
    l.round() as usize + 1
}

/// Random level generator for HNSW
///
/// Uses an exponential distribution so that each level up holds roughly
/// `ml` times the nodes of the level below. The generator owns its seeded
/// RNG, so the same seed and call sequence always yields the same levels.
#[derive(Debug, Clone)]
pub struct LevelGen {
    rng: StdRng,
    ml: f64,
}

impl LevelGen {
    /// Creates a new level generator.
    ///
    /// # Arguments
    ///
    /// * `ml` - Level multiplier, must lie in `(0, 1)`
    /// * `seed` - Seed for the random source
    pub fn new(ml: f64, seed: u64) -> Self {
        LevelGen {
            rng: StdRng::seed_from_u64(seed),
            ml,
        }
    }

    pub fn ml(&self) -> f64 {
        self.ml
    }

    /// Draws a level for a node joining a graph that currently holds `size` nodes.
    ///
    /// The level is `floor(ln U / ln ml)` for `U` uniform in `(0, 1]`, so a
    /// node reaches level `l` with probability `ml^l`. The result is capped at
    /// [`estimate_max_level`]`(ml, size)`.
    pub fn generate(&mut self, size: usize) -> usize {
        let max_level = estimate_max_level(self.ml, size);
        // (0, 1], so ln never sees zero
        let u = 1.0 - self.rng.random::<f64>();
        let level = (u.ln() / self.ml.ln()).floor();
        (level as usize).min(max_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_max_level() {
        assert_eq!(estimate_max_level(0.5, 10), 4);
        assert_eq!(estimate_max_level(0.5, 1000), 11);
        assert_eq!(estimate_max_level(0.5, 0), 1);
        assert_eq!(estimate_max_level(0.5, 1), 1);

        for ml in [0.1, 0.25, 0.5, 0.9] {
            let mut prev = 0;
            for size in 0..5000 {
                let level = estimate_max_level(ml, size);
                assert!(level >= prev, "ml={ml} size={size}");
                prev = level;
            }
        }
    }

    #[test]
    fn test_level_distribution() {
        let mut lg = LevelGen::new(0.5, 42);
        let mut counts = [0usize; 32];

        const SAMPLES: usize = 100_000;
        for _ in 0..SAMPLES {
            let level = lg.generate(1_000_000);
            counts[level] += 1;
        }

        for i in 1..8 {
            assert!(counts[i] < counts[i - 1], "{counts:?}");
        }

        let bottom_ratio = counts[0] as f64 / SAMPLES as f64;
        assert!((0.47..0.53).contains(&bottom_ratio), "{bottom_ratio}");
    }

    #[test]
    fn test_level_cap() {
        let mut lg = LevelGen::new(0.5, 7);
        for _ in 0..10_000 {
            assert!(lg.generate(0) <= 1);
            assert!(lg.generate(10) <= 4);
        }
    }

    #[test]
    fn test_level_gen_reproducible() {
        let mut a = LevelGen::new(0.25, 1234);
        let mut b = LevelGen::new(0.25, 1234);
        let xs: Vec<usize> = (0..1000).map(|i| a.generate(i)).collect();
        let ys: Vec<usize> = (0..1000).map(|i| b.generate(i)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_distance_metrics() {
        let v1 = vec![1.0f32, 0.0];
        let v2 = vec![0.0f32, 1.0];

        let d = DistanceMetric::Euclidean.distance(&v1, &v2).unwrap();
        assert!((d - 1.4142135).abs() < 1e-6);

        let d = DistanceMetric::Cosine.distance(&v1, &v2).unwrap();
        assert!((d - 1.0).abs() < 1e-6);

        let d = DistanceMetric::Cosine.distance(&v1, &v1).unwrap();
        assert!(d.abs() < 1e-6);

        let d = DistanceMetric::InnerProduct.distance(&v1, &v2).unwrap();
        assert!(d.abs() < 1e-6);

        let d = DistanceMetric::Manhattan.distance(&v1, &v2).unwrap();
        assert!((d - 2.0).abs() < 1e-6);

        // zero vector never yields NaN
        let zero = vec![0.0f32, 0.0];
        let d = DistanceMetric::Cosine.distance(&zero, &v1).unwrap();
        assert_eq!(d, 1.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = DistanceMetric::Cosine.distance(&vec![1.0f32, 2.0], &vec![1.0f32]);
        assert!(matches!(
            result,
            Err(HnswError::DimensionMismatch {
                expected: 2,
                got: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_bf16_vectors() {
        let a: Vec<bf16> = [1.0f32, 2.0, 3.0].iter().map(|&x| bf16::from_f32(x)).collect();
        let b: Vec<bf16> = [1.0f32, 2.0, 4.0].iter().map(|&x| bf16::from_f32(x)).collect();
        assert_eq!(a.dims(), 3);
        let d = DistanceMetric::Euclidean.distance(&a, &b).unwrap();
        assert!((d - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_binary_string() {
        let bs = BinaryString::from([1u8, 255]);
        assert_eq!(bs.to_string(), "[00000001 11111111]");
        assert_eq!(format!("{bs:?}"), "[00000001 11111111]");
        assert_eq!(bs.dims(), 2);
        assert_eq!(bs.to_f32().as_ref(), &[1.0, 255.0]);

        let d = DistanceMetric::Cosine
            .distance(&BinaryString::from([1u8, 1]), &BinaryString::from([2u8, 2]))
            .unwrap();
        assert!(d.abs() < 1e-6);
    }

    #[test]
    fn test_closure_distance() {
        let hamming = |a: &BinaryString, b: &BinaryString| -> Result<f32, HnswError> {
            if a.dims() != b.dims() {
                return Err(HnswError::Distance {
                    name: String::new(),
                    source: "length differs".into(),
                });
            }
            Ok(a.0
                .iter()
                .zip(b.0.iter())
                .map(|(x, y)| (x ^ y).count_ones())
                .sum::<u32>() as f32)
        };

        let d = hamming
            .distance(&BinaryString::from([0b1010u8]), &BinaryString::from([0b0110u8]))
            .unwrap();
        assert_eq!(d, 2.0);

        let err = hamming
            .distance(&BinaryString::from([0u8]), &BinaryString::from([0u8, 1]))
            .unwrap_err();
        assert!(err.is_computation());
    }
}
