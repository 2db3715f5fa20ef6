//! Market data observations.

/// One `(instrument, price)` observation from the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub instrument: String,
    pub price: f64,
}

impl Tick {
    pub fn new(instrument: impl Into<String>, price: f64) -> Self {
        Tick {
            instrument: instrument.into(),
            price,
        }
    }
}
