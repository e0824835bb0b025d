//! Identifier allocation
//!
//! Candidates are time-based (last four digits of the millisecond clock plus a
//! random two-digit salt) so ids mostly sort by creation time. After
//! `MAX_RANDOM_ATTEMPTS` collisions the allocator switches to a sequential
//! search, which always terminates.

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::{GraphError, Result};
use crate::models::{find_identifier_numbers, IdPrefix, Identifier, MAX_ID_NUMBER};
use crate::repository::DocumentRepository;

/// Time-based candidates tried before the sequential fallback
pub const MAX_RANDOM_ATTEMPTS: usize = 100;

/// First number tried by the sequential fallback
pub const SEQUENTIAL_START: u32 = 100_000;

/// Hands out identifiers that collide neither with the corpus nor with
/// anything this allocator already issued.
#[derive(Debug, Default)]
pub struct IdAllocator {
    issued: Mutex<HashMap<IdPrefix, HashSet<u32>>>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh identifier, scanning every document under every root
    pub fn allocate(&self, repo: &DocumentRepository, prefix: IdPrefix) -> Result<Identifier> {
        let mut used = used_numbers(repo, prefix)?;

        // Held across selection so two callers cannot pick the same candidate
        let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
        let issued_for_prefix = issued.entry(prefix).or_default();
        used.extend(issued_for_prefix.iter().copied());

        let number = pick_free_number(&used, &mut rand::thread_rng(), current_millis)
            .ok_or(GraphError::CollisionExhausted(prefix))?;
        issued_for_prefix.insert(number);

        let id = Identifier::new(prefix, number)?;
        log::info!("Allocated {}", id);
        Ok(id)
    }
}

/// Numbers already taken by `{prefix}-NNNNNN` occurrences anywhere in the corpus
pub fn used_numbers(repo: &DocumentRepository, prefix: IdPrefix) -> Result<HashSet<u32>> {
    Ok(repo
        .scan_texts()?
        .iter()
        .flat_map(|(_, text)| find_identifier_numbers(text, prefix))
        .collect())
}

fn current_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().unsigned_abs()
}

/// Six-digit candidate from the clock and a salt in 0..100
fn time_candidate(millis: u64, salt: u32) -> u32 {
    let low = (millis % 10_000) as u32;
    (low * 100 + salt) % (MAX_ID_NUMBER + 1)
}

/// Chooses a number outside `used`: up to `MAX_RANDOM_ATTEMPTS` time-based
/// candidates, then a sequential search from `SEQUENTIAL_START` upward that
/// wraps to the numbers below it. None only when all million are taken.
pub fn pick_free_number<R, C>(used: &HashSet<u32>, rng: &mut R, mut clock: C) -> Option<u32>
where
    R: Rng,
    C: FnMut() -> u64,
{
    for _ in 0..MAX_RANDOM_ATTEMPTS {
        let candidate = time_candidate(clock(), rng.gen_range(0..100));
        if !used.contains(&candidate) {
            return Some(candidate);
        }
    }

    log::debug!(
        "{} time-based candidates collided, falling back to sequential search",
        MAX_RANDOM_ATTEMPTS
    );

    (SEQUENTIAL_START..=MAX_ID_NUMBER)
        .chain(0..SEQUENTIAL_START)
        .find(|n| !used.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GraphConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_time_candidate_is_six_digits() {
        assert_eq!(time_candidate(1_700_000_123_456, 7), 345_607);
        assert_eq!(time_candidate(9_999, 99), 999_999);
        assert_eq!(time_candidate(0, 0), 0);
    }

    #[test]
    fn test_pick_free_number_prefers_time_candidate() {
        let mut rng = StdRng::seed_from_u64(7);
        let used = HashSet::new();
        let n = pick_free_number(&used, &mut rng, || 1_234).unwrap();
        assert!((123_400..123_500).contains(&n));
    }

    #[test]
    fn test_pick_free_number_falls_back_to_sequential() {
        // Every time-based candidate for millis ending in 1234 is taken
        let used: HashSet<u32> = (123_400..123_500).collect();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_free_number(&used, &mut rng, || 1_234), Some(SEQUENTIAL_START));
    }

    #[test]
    fn test_pick_free_number_terminates_in_nearly_full_namespace() {
        let free = 42;
        let used: HashSet<u32> = (0..=MAX_ID_NUMBER).filter(|n| *n != free).collect();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pick_free_number(&used, &mut rng, || 123_456), Some(free));

        let full: HashSet<u32> = (0..=MAX_ID_NUMBER).collect();
        assert_eq!(pick_free_number(&full, &mut rng, || 1), None);
    }

    #[test]
    fn test_allocate_avoids_corpus_and_issued_ids() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("specs");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.md"), "- **ID**: CAP-100001\nsee ENB-000007").unwrap();
        let repo = DocumentRepository::new(GraphConfig::with_roots([root]));

        let used = used_numbers(&repo, IdPrefix::Capability).unwrap();
        assert_eq!(used, HashSet::from([100_001]));

        let allocator = IdAllocator::new();
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = allocator.allocate(&repo, IdPrefix::Capability).unwrap();
            assert_eq!(id.prefix, IdPrefix::Capability);
            assert_ne!(id.number, 100_001);
            assert!(seen.insert(id.number), "{} issued twice", id);
        }
    }
}
