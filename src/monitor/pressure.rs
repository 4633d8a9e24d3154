//! Memory pressure levels and the hysteretic classifier.

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;

/// Coarse classification of available memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPressureLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPressureLevel {
    pub const ALL: [MemoryPressureLevel; 4] = [
        MemoryPressureLevel::Low,
        MemoryPressureLevel::Medium,
        MemoryPressureLevel::High,
        MemoryPressureLevel::Critical,
    ];

    /// Numeric level (0 = low).
    pub fn level(&self) -> u8 {
        match self {
            MemoryPressureLevel::Low => 0,
            MemoryPressureLevel::Medium => 1,
            MemoryPressureLevel::High => 2,
            MemoryPressureLevel::Critical => 3,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            0 => MemoryPressureLevel::Low,
            1 => MemoryPressureLevel::Medium,
            2 => MemoryPressureLevel::High,
            _ => MemoryPressureLevel::Critical,
        }
    }

    /// One step more severe, saturating at critical.
    pub fn raise(&self) -> Self {
        Self::from_level(self.level().saturating_add(1))
    }

    /// One step less severe, saturating at low.
    pub fn lower(&self) -> Self {
        Self::from_level(self.level().saturating_sub(1))
    }
}

impl std::fmt::Display for MemoryPressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryPressureLevel::Low => write!(f, "low"),
            MemoryPressureLevel::Medium => write!(f, "medium"),
            MemoryPressureLevel::High => write!(f, "high"),
            MemoryPressureLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Enter/exit thresholds on the free-memory ratio for one level.
#[derive(Debug, Clone, Copy)]
struct Band {
    enter_below: f64,
    exit_above: f64,
}

/// Maps free-memory ratios to pressure levels with a hysteresis band per
/// boundary, so a ratio hovering around one threshold does not flip the
/// level on every sample.
#[derive(Debug, Clone)]
pub struct PressureClassifier {
    /// Bands for medium, high, critical (in that order).
    bands: [Band; 3],
}

impl PressureClassifier {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            bands: [
                Band {
                    enter_below: config.medium_enter,
                    exit_above: config.medium_exit,
                },
                Band {
                    enter_below: config.high_enter,
                    exit_above: config.high_exit,
                },
                Band {
                    enter_below: config.critical_enter,
                    exit_above: config.critical_exit,
                },
            ],
        }
    }

    fn band(&self, level: MemoryPressureLevel) -> Option<&Band> {
        match level {
            MemoryPressureLevel::Low => None,
            other => self.bands.get(other.level() as usize - 1),
        }
    }

    /// Next level given the current one and a fresh free ratio.
    ///
    /// Escalation jumps straight to the most severe level whose enter
    /// threshold is crossed. De-escalation steps down only while the free
    /// ratio is above the current level's exit threshold.
    pub fn classify(&self, current: MemoryPressureLevel, free_ratio: f64) -> MemoryPressureLevel {
        let entered = MemoryPressureLevel::ALL
            .iter()
            .rev()
            .copied()
            .find(|level| {
                self.band(*level)
                    .map(|band| free_ratio < band.enter_below)
                    .unwrap_or(true)
            })
            .unwrap_or(MemoryPressureLevel::Low);

        if entered > current {
            return entered;
        }

        let mut level = current;
        while let Some(band) = self.band(level) {
            if free_ratio > band.exit_above {
                level = level.lower();
            } else {
                break;
            }
        }
        level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PressureClassifier {
        PressureClassifier::new(&MonitorConfig::default())
    }

    #[test]
    fn test_level_ordering() {
        assert!(MemoryPressureLevel::Low < MemoryPressureLevel::Medium);
        assert!(MemoryPressureLevel::High < MemoryPressureLevel::Critical);
        assert_eq!(MemoryPressureLevel::Critical.raise(), MemoryPressureLevel::Critical);
        assert_eq!(MemoryPressureLevel::Low.lower(), MemoryPressureLevel::Low);
        assert_eq!(MemoryPressureLevel::from_level(2), MemoryPressureLevel::High);
    }

    #[test]
    fn test_escalation_jumps_levels() {
        let c = classifier();
        assert_eq!(c.classify(MemoryPressureLevel::Low, 0.9), MemoryPressureLevel::Low);
        assert_eq!(c.classify(MemoryPressureLevel::Low, 0.35), MemoryPressureLevel::Medium);
        assert_eq!(c.classify(MemoryPressureLevel::Low, 0.15), MemoryPressureLevel::High);
        assert_eq!(c.classify(MemoryPressureLevel::Low, 0.05), MemoryPressureLevel::Critical);
    }

    #[test]
    fn test_hysteresis_holds_inside_band() {
        let c = classifier();
        // Entered high at < 20% free; 25% is inside the band, so stay high.
        let level = c.classify(MemoryPressureLevel::Low, 0.19);
        assert_eq!(level, MemoryPressureLevel::High);
        assert_eq!(c.classify(level, 0.25), MemoryPressureLevel::High);
        assert_eq!(c.classify(level, 0.29), MemoryPressureLevel::High);
        // Above 30% the level drops to medium (inside medium's band).
        assert_eq!(c.classify(level, 0.31), MemoryPressureLevel::Medium);
    }

    #[test]
    fn test_recovery_steps_through_levels() {
        let c = classifier();
        assert_eq!(c.classify(MemoryPressureLevel::Critical, 0.9), MemoryPressureLevel::Low);
        assert_eq!(c.classify(MemoryPressureLevel::Critical, 0.45), MemoryPressureLevel::Medium);
        assert_eq!(c.classify(MemoryPressureLevel::Critical, 0.10), MemoryPressureLevel::Critical);
    }

    #[test]
    fn test_oscillating_ratio_does_not_flap() {
        let c = classifier();
        let mut level = c.classify(MemoryPressureLevel::Low, 0.19);
        let mut transitions = 0;
        for ratio in [0.21, 0.19, 0.22, 0.18, 0.21, 0.19] {
            let next = c.classify(level, ratio);
            if next != level {
                transitions += 1;
            }
            level = next;
        }
        assert_eq!(transitions, 0);
        assert_eq!(level, MemoryPressureLevel::High);
    }
}
