//! Last observed price per instrument.
//!
//! Written on every tick by the ingestion path and read for heartbeat
//! diagnostics. Matching never consults it: the engine uses the price
//! carried by the tick itself.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct PriceCache {
    prices: Mutex<HashMap<String, f64>>,
}

impl PriceCache {
    pub fn new() -> Self {
        PriceCache::default()
    }

    pub fn update(&self, instrument: &str, price: f64) {
        let mut prices = self.prices.lock();
        match prices.get_mut(instrument) {
            Some(slot) => *slot = price,
            None => {
                prices.insert(instrument.to_string(), price);
            }
        }
    }

    /// Last price seen for `instrument`, if any tick arrived yet.
    pub fn last_price(&self, instrument: &str) -> Option<f64> {
        self.prices.lock().get(instrument).copied()
    }

    /// Sorted copy of the whole cache.
    pub fn snapshot(&self) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .prices
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_latest_price() {
        let cache = PriceCache::new();
        assert_eq!(cache.last_price("IF2512"), None);

        cache.update("IF2512", 4500.0);
        cache.update("IF2512", 4510.4);
        cache.update("IH2512", 2700.0);

        assert_eq!(cache.last_price("IF2512"), Some(4510.4));
        assert_eq!(
            cache.snapshot(),
            vec![("IF2512".to_string(), 4510.4), ("IH2512".to_string(), 2700.0)]
        );
    }
}
