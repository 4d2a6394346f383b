//! Highest-random-weight picker
//!
//! See <https://en.wikipedia.org/wiki/Rendezvous_hashing>. Each candidate is
//! scored with CRC-32 over the hex form of the hash followed by the address;
//! the highest score owns the hash.

use super::Picker;

/// Rendezvous (highest-random-weight) picker
#[derive(Debug, Clone, Copy, Default)]
pub struct RendezvousPicker;

impl RendezvousPicker {
    pub fn new() -> Self {
        Self
    }

    /// Score of `candidate` for `hash`
    pub fn score(hash: u64, candidate: &str) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(format!("{:x}", hash).as_bytes());
        hasher.update(candidate.as_bytes());
        hasher.finalize()
    }
}

impl Picker for RendezvousPicker {
    fn pick(&self, candidates: &[String], hash: u64) -> Option<String> {
        let mut best: Option<(&String, u32)> = None;
        for candidate in candidates {
            let score = Self::score(hash, candidate);
            // strictly greater: ties keep the first candidate seen
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((candidate, score));
            }
        }
        best.map(|(candidate, _)| candidate.clone())
    }

    fn name(&self) -> &'static str {
        "rendezvous"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("10.0.0.{}:9090", i)).collect()
    }

    #[test]
    fn test_empty_candidates() {
        assert_eq!(RendezvousPicker::new().pick(&[], 42), None);
    }

    #[test]
    fn test_single_candidate() {
        let list = nodes(1);
        assert_eq!(RendezvousPicker::new().pick(&list, 42), Some(list[0].clone()));
    }

    #[test]
    fn test_picks_highest_score() {
        let list = nodes(5);
        let picked = RendezvousPicker::new().pick(&list, 12345).unwrap();
        let top = list
            .iter()
            .map(|c| RendezvousPicker::score(12345, c))
            .max()
            .unwrap();
        assert_eq!(RendezvousPicker::score(12345, &picked), top);
    }

    #[test]
    fn test_order_independent() {
        let list = nodes(7);
        let mut reversed = list.clone();
        reversed.reverse();
        let picker = RendezvousPicker::new();
        for hash in 0..500u64 {
            assert_eq!(picker.pick(&list, hash), picker.pick(&reversed, hash));
        }
    }

    #[test]
    fn test_score_uses_hex_encoding() {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(b"ff");
        hasher.update(b"node-a");
        assert_eq!(RendezvousPicker::score(255, "node-a"), hasher.finalize());
    }

    #[test]
    fn test_duplicate_candidates_collapse() {
        let a = "10.0.0.1:9090".to_string();
        let b = "10.0.0.2:9090".to_string();
        let picker = RendezvousPicker::new();
        for hash in 0..100u64 {
            let once = picker.pick(&[a.clone(), b.clone()], hash);
            let twice = picker.pick(&[a.clone(), b.clone(), a.clone()], hash);
            assert_eq!(once, twice);
        }
    }
}
