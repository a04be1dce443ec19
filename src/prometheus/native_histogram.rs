//! Exponential bucket math and sparse bucket state for native histograms.
//!
//! Bucket `k` at schema `s` covers `(base^(k-1), base^k]` with
//! `base = 2^(2^-s)`. Index 0 is the bucket with upper bound 1.

use dashmap::DashMap;
use lazy_static::lazy_static;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};

use super::atomic_update::AtomicF64;
use super::error::{Error, Result};
use super::fnv::FnvBuildHasher;
use super::snapshot::NativeBuckets;

pub const NATIVE_HISTOGRAM_SCHEMA_MAXIMUM: i32 = 8;
pub const NATIVE_HISTOGRAM_SCHEMA_MINIMUM: i32 = -4;

// DEF_NATIVE_HISTOGRAM_ZERO_THRESHOLD is 2^-128 (or 0.5*2^-127 in the actual
// IEEE 754 representation), which is a bucket boundary at all possible
// resolutions.
pub const DEF_NATIVE_HISTOGRAM_ZERO_THRESHOLD: f64 = 2.938735877055719e-39;

lazy_static! {
    // NATIVE_HISTOGRAM_BOUNDS[s] holds the 2^s fractional bucket boundaries
    // in [0.5, 1) for schema s >= 0. Each table is built by repeated
    // multiplication with the schema's base. Even entries are taken from the
    // previous schema's table, which keeps the rounding error from
    // accumulating across the table.
    static ref NATIVE_HISTOGRAM_BOUNDS: Vec<Vec<f64>> = {
        let mut tables: Vec<Vec<f64>> = vec![vec![0.5]];
        for schema in 1..=NATIVE_HISTOGRAM_SCHEMA_MAXIMUM {
            let base = 2f64.powf(2f64.powi(-schema));
            let len = 1usize << schema;
            let mut bounds = Vec::with_capacity(len);
            bounds.push(0.5);
            for i in 1..len {
                let bound = if i % 2 == 0 && schema > 1 {
                    tables[schema as usize - 1][i / 2]
                } else {
                    bounds[i - 1] * base
                };
                bounds.push(bound);
            }
            tables.push(bounds);
        }
        tables
    };
}

pub fn validate_schema(schema: i32) -> Result<i32> {
    if (NATIVE_HISTOGRAM_SCHEMA_MINIMUM..=NATIVE_HISTOGRAM_SCHEMA_MAXIMUM).contains(&schema) {
        Ok(schema)
    } else {
        Err(Error::InvalidSchema(schema))
    }
}

/// Picks the highest resolution whose growth factor does not exceed
/// `bucket_factor`, clamped to the supported schema range.
pub fn pick_schema(bucket_factor: f64) -> Result<i32> {
    if !(bucket_factor > 1.0) {
        return Err(Error::InvalidBucketFactor(bucket_factor));
    }
    let floor = bucket_factor.log2().log2().floor();
    Ok(match floor {
        f if f <= -8.0 => NATIVE_HISTOGRAM_SCHEMA_MAXIMUM,
        f if f >= 4.0 => NATIVE_HISTOGRAM_SCHEMA_MINIMUM,
        f => -f as i32,
    })
}

/// Splits a positive finite `v` into `frac * 2^exp` with `frac` in [0.5, 1).
/// Zero, infinities and NaN come back unchanged with exponent 0.
pub fn frexp(v: f64) -> (f64, i32) {
    if v == 0.0 || !v.is_finite() {
        return (v, 0);
    }
    let bits = v.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // Subnormal: scale into the normal range first.
        let (frac, exp) = frexp(v * 2f64.powi(64));
        return (frac, exp - 64);
    }
    let frac = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (frac, biased - 1022)
}

/// `frac * 2^exp`, split in two steps so the power of two itself never
/// overflows for exponents up to 1025.
pub fn ldexp(frac: f64, exp: i32) -> f64 {
    let half = exp / 2;
    frac * 2f64.powi(half) * 2f64.powi(exp - half)
}

// Smallest i with bounds[i] >= frac, or bounds.len().
fn search_bounds(bounds: &[f64], frac: f64) -> i32 {
    bounds.partition_point(|&b| b < frac) as i32
}

/// Bucket index of a positive value at `schema`. `+Inf` lands one past the
/// bucket that holds `f64::MAX`.
pub fn bucket_index(value: f64, schema: i32) -> i32 {
    if value == f64::INFINITY {
        return bucket_index(f64::MAX, schema) + 1;
    }
    let (frac, exp) = frexp(value);
    if schema >= 1 {
        let bounds = &NATIVE_HISTOGRAM_BOUNDS[schema as usize];
        return search_bounds(bounds, frac) + (exp - 1) * bounds.len() as i32;
    }
    let mut key = exp;
    if frac == 0.5 {
        key -= 1;
    }
    let offset = (1 << -schema) - 1;
    (key + offset) >> -schema
}

/// Upper bound of bucket `key` at `schema`. The last finite bucket reports
/// `f64::MAX` so that only actual `+Inf` observations fall above it.
pub fn upper_bound(key: i32, schema: i32) -> f64 {
    if schema < 0 {
        let exp = key << -schema;
        if exp == 1024 {
            return f64::MAX;
        }
        return ldexp(1.0, exp);
    }

    let frac_idx = key & ((1 << schema) - 1);
    let frac = NATIVE_HISTOGRAM_BOUNDS[schema as usize][frac_idx as usize];
    let exp = (key >> schema) + 1;
    if frac == 0.5 && exp == 1025 {
        return f64::MAX;
    }
    ldexp(frac, exp)
}

/// Halving the resolution merges buckets `2j-1` and `2j` into bucket `j`.
pub fn halved_index(key: i32) -> i32 {
    (key + 1).div_euclid(2)
}

/// Sparse `index -> count` map for one sign.
#[derive(Debug, Default)]
pub(crate) struct SparseBuckets {
    buckets: DashMap<i32, AtomicU64, FnvBuildHasher>,
}

impl SparseBuckets {
    /// Returns `true` if the bucket did not exist before.
    pub fn add(&self, key: i32, increment: u64) -> bool {
        if let Some(count) = self.buckets.get(&key) {
            count.fetch_add(increment, Ordering::Relaxed);
            return false;
        }
        match self.buckets.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => {
                e.get().fetch_add(increment, Ordering::Relaxed);
                false
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(AtomicU64::new(increment));
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn smallest_key(&self) -> Option<i32> {
        self.buckets.iter().map(|e| *e.key()).min()
    }

    pub fn remove(&self, key: i32) -> Option<u64> {
        self.buckets
            .remove(&key)
            .map(|(_, count)| count.into_inner())
    }

    pub fn clear(&self) {
        self.buckets.clear();
    }

    pub fn sorted(&self) -> Vec<(i32, u64)> {
        let mut buckets: Vec<_> = self
            .buckets
            .iter()
            .map(|e| (*e.key(), e.value().load(Ordering::Relaxed)))
            .collect();
        buckets.sort_unstable_by_key(|&(key, _)| key);
        buckets
    }

    // Must only run while no writer can touch the map.
    fn halve(&self) {
        let entries = self.sorted();
        self.buckets.clear();
        for (key, count) in entries {
            self.add(halved_index(key), count);
        }
    }
}

/// Mutable native-histogram state of one series.
///
/// `observe` may run concurrently with other `observe` calls. The rescaling
/// operations and `reset` require exclusive access, which the histogram
/// obtains through its quiescence buffer.
#[derive(Debug)]
pub(crate) struct NativeState {
    schema: AtomicI32,
    zero_threshold: AtomicF64,
    zero_count: AtomicU64,
    positive: SparseBuckets,
    negative: SparseBuckets,
    // Number of populated positive and negative buckets.
    bucket_number: AtomicUsize,
}

impl NativeState {
    pub fn new(schema: i32, zero_threshold: f64) -> Self {
        NativeState {
            schema: AtomicI32::new(schema),
            zero_threshold: AtomicF64::new(zero_threshold),
            zero_count: AtomicU64::new(0),
            positive: SparseBuckets::default(),
            negative: SparseBuckets::default(),
            bucket_number: AtomicUsize::new(0),
        }
    }

    pub fn schema(&self) -> i32 {
        self.schema.load(Ordering::Relaxed)
    }

    pub fn zero_threshold(&self) -> f64 {
        self.zero_threshold.load(Ordering::Relaxed)
    }

    pub fn bucket_number(&self) -> usize {
        self.bucket_number.load(Ordering::Relaxed)
    }

    /// Records a non-NaN value. Returns `true` if a new bucket was created.
    pub fn observe(&self, value: f64) -> bool {
        let zero_threshold = self.zero_threshold();
        let created = if value > zero_threshold {
            self.positive.add(bucket_index(value, self.schema()), 1)
        } else if value < -zero_threshold {
            self.negative.add(bucket_index(-value, self.schema()), 1)
        } else {
            self.zero_count.fetch_add(1, Ordering::Relaxed);
            false
        };
        if created {
            self.bucket_number.fetch_add(1, Ordering::Relaxed);
        }
        created
    }

    pub fn snapshot(&self) -> NativeBuckets {
        NativeBuckets {
            schema: self.schema(),
            zero_threshold: self.zero_threshold(),
            zero_count: self.zero_count.load(Ordering::Relaxed),
            positive: self.positive.sorted(),
            negative: self.negative.sorted(),
        }
    }

    /// Folds the bucket closest to zero (on both sides) into the zero bucket,
    /// unless the new threshold would exceed `max_zero_threshold`.
    pub fn widen_zero_bucket(&self, max_zero_threshold: f64) -> Option<f64> {
        if self.zero_threshold() >= max_zero_threshold {
            return None;
        }
        let smallest_key = match (self.positive.smallest_key(), self.negative.smallest_key()) {
            (Some(p), Some(n)) => p.min(n),
            (Some(k), None) | (None, Some(k)) => k,
            (None, None) => return None,
        };
        let new_zero_threshold = upper_bound(smallest_key, self.schema());
        if new_zero_threshold > max_zero_threshold {
            return None;
        }
        for side in [&self.positive, &self.negative] {
            if let Some(count) = side.remove(smallest_key) {
                self.zero_count.fetch_add(count, Ordering::Relaxed);
                self.bucket_number.fetch_sub(1, Ordering::Relaxed);
            }
        }
        self.zero_threshold.store(new_zero_threshold, Ordering::Relaxed);
        Some(new_zero_threshold)
    }

    /// Halves the resolution. Returns the new schema, or `None` if already
    /// at the minimum.
    pub fn double_bucket_width(&self) -> Option<i32> {
        let schema = self.schema();
        if schema <= NATIVE_HISTOGRAM_SCHEMA_MINIMUM {
            return None;
        }
        self.positive.halve();
        self.negative.halve();
        self.bucket_number
            .store(self.positive.len() + self.negative.len(), Ordering::Relaxed);
        self.schema.store(schema - 1, Ordering::Relaxed);
        Some(schema - 1)
    }

    pub fn reset(&self, schema: i32, zero_threshold: f64) {
        self.positive.clear();
        self.negative.clear();
        self.bucket_number.store(0, Ordering::Relaxed);
        self.zero_count.store(0, Ordering::Relaxed);
        self.zero_threshold.store(zero_threshold, Ordering::Relaxed);
        self.schema.store(schema, Ordering::Relaxed);
    }
}
