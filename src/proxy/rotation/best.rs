//! Lowest-latency proxy selection strategy

use super::ProxySelector;
use crate::models::ProxyRecord;

/// Selects the healthy proxy with the lowest last observed response time
///
/// Ties go to the first record in key order.
pub struct BestSelector;

impl BestSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BestSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for BestSelector {
    fn select(&self, healthy: &[&ProxyRecord]) -> Option<usize> {
        let mut selected: Option<(usize, f64)> = None;

        for (idx, record) in healthy.iter().enumerate() {
            match selected {
                Some((_, fastest)) if record.response_time >= fastest => {}
                _ => selected = Some((idx, record.response_time)),
            }
        }

        selected.map(|(idx, _)| idx)
    }

    fn strategy_name(&self) -> &'static str {
        "best"
    }
}
