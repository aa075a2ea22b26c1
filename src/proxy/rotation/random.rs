//! Random proxy selection strategy

use rand::Rng;

use super::ProxySelector;
use crate::models::ProxyRecord;

/// Selects a uniformly random proxy from the healthy set
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RandomSelector {
    fn select(&self, healthy: &[&ProxyRecord]) -> Option<usize> {
        if healthy.is_empty() {
            return None;
        }

        Some(rand::thread_rng().gen_range(0..healthy.len()))
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_record;
    use super::*;

    #[test]
    fn test_random_selector_empty() {
        assert_eq!(RandomSelector::new().select(&[]), None);
    }

    #[test]
    fn test_random_selector_single_proxy() {
        let record = test_record(40001, 0.0);
        assert_eq!(RandomSelector::new().select(&[&record]), Some(0));
    }

    #[test]
    fn test_random_selector_stays_in_bounds_and_covers_set() {
        let selector = RandomSelector::new();
        let records = [
            test_record(40001, 0.0),
            test_record(40002, 0.0),
            test_record(40003, 0.0),
        ];
        let healthy: Vec<&ProxyRecord> = records.iter().collect();

        let mut seen = [false; 3];
        for _ in 0..500 {
            let idx = selector.select(&healthy).unwrap();
            assert!(idx < 3);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
