//! Consistent hash ring picker
//!
//! Every candidate is duplicated into `factor` virtual points on a 32-bit
//! ring. A hash is owned by the first point at or after its ring position,
//! wrapping around to the smallest point.
//!
//! The ring is memoized for the last candidate list seen. The memo is
//! invalidated by an element-wise list comparison, so a reordered list
//! triggers a rebuild even though the rebuilt ring is identical.

use super::Picker;
use crate::metrics::record_ring_rebuild;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default number of virtual points per candidate
pub const DEFAULT_FACTOR: usize = 1000;

/// Largest accepted number of virtual points per candidate
pub const MAX_FACTOR: usize = 1 << 16;

/// Multiplier used to derive the salt of each virtual point
const SALT_STRIDE: usize = 12394;

/// Sorted virtual points and their owners
#[derive(Debug, Default)]
struct Ring {
    points: Vec<u32>,
    owners: HashMap<u32, String>,
}

impl Ring {
    fn build(candidates: &[String], factor: usize) -> Self {
        let capacity = candidates.len().saturating_mul(factor);
        let mut points = Vec::with_capacity(capacity);
        let mut owners: HashMap<u32, String> = HashMap::with_capacity(capacity);

        for candidate in candidates {
            for ff in 0..factor {
                let salt = format!("{}-{}", ff * SALT_STRIDE + 1, candidate);
                let point = crc32fast::hash(salt.as_bytes());
                points.push(point);
                // colliding points go to the smaller address so the ring
                // does not depend on candidate order
                owners
                    .entry(point)
                    .and_modify(|owner| {
                        if candidate < owner {
                            *owner = candidate.clone();
                        }
                    })
                    .or_insert_with(|| candidate.clone());
            }
        }

        points.sort_unstable();
        points.dedup();
        Self { points, owners }
    }

    fn owner_of(&self, position: u32) -> Option<&String> {
        if self.points.is_empty() {
            return None;
        }
        let mut idx = self.points.partition_point(|p| *p < position);
        if idx == self.points.len() {
            idx = 0;
        }
        self.owners.get(&self.points[idx])
    }
}

struct Memo {
    candidates: Vec<String>,
    ring: Arc<Ring>,
}

/// Consistent-hash-ring picker
pub struct HashRing {
    factor: usize,
    memo: Mutex<Option<Memo>>,
    rebuilds: AtomicU64,
}

impl HashRing {
    /// Create a ring with the default factor of 1000 points per candidate
    pub fn new() -> Self {
        Self::with_factor(DEFAULT_FACTOR)
    }

    /// Create a ring with a custom number of points per candidate,
    /// clamped to `1..=MAX_FACTOR`
    pub fn with_factor(factor: usize) -> Self {
        Self {
            factor: factor.clamp(1, MAX_FACTOR),
            memo: Mutex::new(None),
            rebuilds: AtomicU64::new(0),
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Number of times the ring has been recomputed
    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    /// Ring position of a hash
    pub fn position(hash: u64) -> u32 {
        crc32fast::hash(hash.to_string().as_bytes())
    }

    fn ring_for(&self, candidates: &[String]) -> Arc<Ring> {
        let mut memo = self.memo.lock();
        match memo.as_ref() {
            Some(m) if m.candidates.as_slice() == candidates => Arc::clone(&m.ring),
            _ => {
                let ring = Arc::new(Ring::build(candidates, self.factor));
                self.rebuilds.fetch_add(1, Ordering::Relaxed);
                record_ring_rebuild(candidates.len());
                debug!(
                    candidates = candidates.len(),
                    points = ring.points.len(),
                    "Rebuilt hash ring"
                );
                *memo = Some(Memo {
                    candidates: candidates.to_vec(),
                    ring: Arc::clone(&ring),
                });
                ring
            }
        }
    }
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new()
    }
}

impl Picker for HashRing {
    fn pick(&self, candidates: &[String], hash: u64) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }
        let ring = self.ring_for(candidates);
        ring.owner_of(Self::position(hash)).cloned()
    }

    fn name(&self) -> &'static str {
        "hash_ring"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.1.{}:9090", i)).collect()
    }

    #[test]
    fn test_empty_candidates() {
        let ring = HashRing::new();
        assert_eq!(ring.pick(&[], 7), None);
        assert_eq!(ring.rebuild_count(), 0);
    }

    #[test]
    fn test_memoized_for_same_list() {
        let ring = HashRing::with_factor(50);
        let list = nodes(4);
        for hash in 0..100u64 {
            ring.pick(&list, hash);
        }
        assert_eq!(ring.rebuild_count(), 1);
    }

    #[test]
    fn test_reorder_rebuilds_but_same_owner() {
        let ring = HashRing::with_factor(50);
        let list = nodes(4);
        let mut reversed = list.clone();
        reversed.reverse();

        let before: Vec<_> = (0..200u64).map(|h| ring.pick(&list, h)).collect();
        let after: Vec<_> = (0..200u64).map(|h| ring.pick(&reversed, h)).collect();

        assert_eq!(before, after);
        assert_eq!(ring.rebuild_count(), 2);
    }

    #[test]
    fn test_wraps_around() {
        let list = nodes(3);
        let ring = Ring::build(&list, 5);
        let last = *ring.points.last().unwrap();
        let first = ring.points[0];
        if last < u32::MAX {
            assert_eq!(ring.owner_of(last + 1), ring.owners.get(&first));
            assert_eq!(ring.owner_of(u32::MAX), ring.owners.get(&first));
        }
        assert_eq!(ring.owner_of(0), ring.owners.get(&first));
    }

    #[test]
    fn test_exact_point_is_owned_by_that_point() {
        let list = nodes(3);
        let ring = Ring::build(&list, 5);
        for point in &ring.points {
            assert_eq!(ring.owner_of(*point), ring.owners.get(point));
        }
    }

    #[test]
    fn test_point_salt_format() {
        let list = vec!["a".to_string()];
        let ring = Ring::build(&list, 2);
        let expected_first = crc32fast::hash(b"1-a");
        let expected_second = crc32fast::hash(format!("{}-a", SALT_STRIDE + 1).as_bytes());
        assert!(ring.points.contains(&expected_first));
        assert!(ring.points.contains(&expected_second));
    }

    #[test]
    fn test_single_candidate_owns_everything() {
        let ring = HashRing::with_factor(10);
        let list = nodes(1);
        for hash in 0..50u64 {
            assert_eq!(ring.pick(&list, hash), Some(list[0].clone()));
        }
    }

    #[test]
    fn test_zero_factor_clamped() {
        let ring = HashRing::with_factor(0);
        assert_eq!(ring.factor(), 1);
        assert!(ring.pick(&nodes(2), 1).is_some());
    }

    #[test]
    fn test_huge_factor_clamped() {
        let ring = HashRing::with_factor(usize::MAX);
        assert_eq!(ring.factor(), MAX_FACTOR);
    }
}
