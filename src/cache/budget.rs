//! Byte budget derived from memory pressure.

use crate::config::Config;
use crate::monitor::MemoryPressureLevel;

/// Maps pressure levels to a cache byte budget.
#[derive(Debug, Clone)]
pub struct BudgetPolicy {
    max_bytes: usize,
    min_bytes: usize,
    medium_fraction: f64,
    high_fraction: f64,
}

impl BudgetPolicy {
    pub fn new(max_bytes: usize, min_bytes: usize, medium_fraction: f64, high_fraction: f64) -> Self {
        Self {
            max_bytes,
            min_bytes: min_bytes.min(max_bytes),
            medium_fraction,
            high_fraction,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_cache_bytes,
            config.cache.min_budget_bytes,
            config.cache.medium_fraction,
            config.cache.high_fraction,
        )
    }

    /// Configured ceiling.
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Budget for a pressure level. Never above the ceiling, never below the floor.
    pub fn budget_for(&self, pressure: MemoryPressureLevel) -> usize {
        let scaled = |fraction: f64| (self.max_bytes as f64 * fraction) as usize;
        let budget = match pressure {
            MemoryPressureLevel::Low => self.max_bytes,
            MemoryPressureLevel::Medium => scaled(self.medium_fraction),
            MemoryPressureLevel::High => scaled(self.high_fraction),
            MemoryPressureLevel::Critical => self.min_bytes,
        };
        budget.clamp(self.min_bytes, self.max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_shrinks_with_pressure() {
        let policy = BudgetPolicy::new(1000, 100, 0.75, 0.5);
        assert_eq!(policy.budget_for(MemoryPressureLevel::Low), 1000);
        assert_eq!(policy.budget_for(MemoryPressureLevel::Medium), 750);
        assert_eq!(policy.budget_for(MemoryPressureLevel::High), 500);
        assert_eq!(policy.budget_for(MemoryPressureLevel::Critical), 100);

        let mut previous = usize::MAX;
        for level in MemoryPressureLevel::ALL {
            let budget = policy.budget_for(level);
            assert!(budget <= previous);
            previous = budget;
        }
    }

    #[test]
    fn test_floor_applies() {
        let policy = BudgetPolicy::new(1000, 600, 0.75, 0.5);
        assert_eq!(policy.budget_for(MemoryPressureLevel::High), 600);
    }

    #[test]
    fn test_from_default_config() {
        let config = Config::default();
        let policy = BudgetPolicy::from_config(&config);
        assert_eq!(policy.budget_for(MemoryPressureLevel::Low), config.max_cache_bytes);
        assert_eq!(
            policy.budget_for(MemoryPressureLevel::Critical),
            config.cache.min_budget_bytes
        );
    }
}
