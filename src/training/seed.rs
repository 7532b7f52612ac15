/// Seed for a 1-based run index: `base + run_index - 1`.
///
/// Depends on nothing but its arguments, so any run of a campaign can be
/// reproduced in isolation.
pub fn run_seed(base: u64, run_index: u32) -> u64 {
    base.wrapping_add(u64::from(run_index).wrapping_sub(1))
}

/// Hands out the seed sequence of one campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSequencer {
    base: u64,
}

impl SeedSequencer {
    pub fn new(base: u64) -> Self {
        SeedSequencer { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn seed_for(&self, run_index: u32) -> u64 {
        run_seed(self.base, run_index)
    }

    /// Whether every run in `1..=runs` gets a distinct, increasing seed.
    pub fn covers(&self, runs: u32) -> bool {
        runs == 0 || self.base.checked_add(u64::from(runs) - 1).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_run_uses_base() {
        assert_eq!(run_seed(42, 1), 42);
    }

    #[test]
    fn test_offsets_by_run_index() {
        let seq = SeedSequencer::new(200);
        let seeds: Vec<u64> = (1..=3).map(|i| seq.seed_for(i)).collect();
        assert_eq!(seeds, vec![200, 201, 202]);
    }

    #[test]
    fn test_sequencer_is_stateless() {
        let seq = SeedSequencer::new(7);
        assert_eq!(seq.seed_for(5), seq.seed_for(5));
        assert_eq!(seq.seed_for(5), SeedSequencer::new(7).seed_for(5));
    }

    #[test]
    fn test_covers_rejects_overflow() {
        assert!(SeedSequencer::new(u64::MAX).covers(1));
        assert!(!SeedSequencer::new(u64::MAX).covers(2));
        assert!(SeedSequencer::new(0).covers(u32::MAX));
    }
}
