use std::sync::{Arc, RwLock};

use crate::domain::WeightReading;

/// single-slot holder of the last known reading
///
/// one writer (the device link), any number of readers. the slot holds a
/// `Copy` value behind one lock, so value and timestamp always come from the
/// same update.
#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    slot: Arc<RwLock<WeightReading>>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// replace the reading, returning what was stored
    ///
    /// timestamps never go backwards: if the wall clock stepped back, the new
    /// value keeps the previous timestamp.
    pub fn set(&self, reading: WeightReading) -> WeightReading {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        let stored = WeightReading {
            value: reading.value,
            captured_at: reading.captured_at.max(slot.captured_at),
        };
        *slot = stored;
        stored
    }

    pub fn get(&self) -> WeightReading {
        *self.slot.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};

    #[test]
    fn starts_with_zero_reading() {
        assert_eq!(WeightStore::new().get(), WeightReading::zero());
    }

    #[test]
    fn keeps_only_latest_reading() {
        let store = WeightStore::new();
        store.set(WeightReading::now(10.0));
        store.set(WeightReading::now(20.0));
        assert_eq!(store.get().value, 20.0);
    }

    #[test]
    fn timestamp_is_monotonic_when_clock_steps_back() {
        let store = WeightStore::new();
        let now = Utc::now();
        store.set(WeightReading::new(1.0, now));
        let stored = store.set(WeightReading::new(2.0, now - Duration::seconds(30)));
        assert_eq!(stored.value, 2.0);
        assert_eq!(stored.captured_at, now);
        assert_eq!(store.get(), stored);
    }

    #[test]
    fn clones_share_the_slot() {
        let store = WeightStore::new();
        let reader = store.clone();
        store.set(WeightReading::now(42.0));
        assert_eq!(reader.get().value, 42.0);
    }

    #[test]
    fn concurrent_readers_never_see_a_torn_or_older_reading() {
        let store = WeightStore::new();
        let epoch = DateTime::<Utc>::UNIX_EPOCH;
        let writes = 2_000i64;

        std::thread::scope(|s| {
            for _ in 0..4 {
                let reader = store.clone();
                s.spawn(move || {
                    let mut last = reader.get();
                    while last.value < writes as f64 {
                        let seen = reader.get();
                        // value n is always written with timestamp epoch + n ms
                        assert_eq!(seen.captured_at, epoch + Duration::milliseconds(seen.value as i64));
                        assert!(seen.captured_at >= last.captured_at);
                        last = seen;
                    }
                });
            }
            let writer = store.clone();
            s.spawn(move || {
                for n in 1..=writes {
                    writer.set(WeightReading::new(n as f64, epoch + Duration::milliseconds(n)));
                }
            });
        });

        assert_eq!(store.get().value, writes as f64);
    }
}
