//! Simulated Event Generator
//!
//! Fallback producer used when no backend is configured. On every tick it
//! fires with a fixed probability and emits one canned notification picked
//! uniformly from a small catalog.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::domain::notification::{NotificationCategory, NotificationInput};

/// Canned notifications: (title, message, category).
const CATALOG: &[(&str, &str, NotificationCategory)] = &[
    (
        "New match found",
        "A listing matching your search was just published.",
        NotificationCategory::Info,
    ),
    (
        "Price drop",
        "A property you follow lowered its asking price.",
        NotificationCategory::Success,
    ),
    (
        "Visit request",
        "Someone asked to schedule a visit to your listing.",
        NotificationCategory::Info,
    ),
    (
        "Proposal received",
        "You received a new proposal. Review it before it expires.",
        NotificationCategory::Warning,
    ),
    (
        "Listing expiring",
        "One of your listings expires in 3 days.",
        NotificationCategory::Warning,
    ),
];

/// Configuration for the simulated event generator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Probability that a tick emits a notification.
    pub probability: f64,
    /// Fixed RNG seed, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probability: 0.3,
            seed: None,
        }
    }
}

/// Timer-driven producer of synthetic notifications.
#[derive(Debug)]
pub struct SimulatedEventGenerator {
    config: SimulatorConfig,
    rng: StdRng,
}

impl SimulatedEventGenerator {
    /// Create a generator.
    #[must_use]
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self { config, rng }
    }

    /// Number of templates in the catalog.
    #[must_use]
    pub const fn catalog_len() -> usize {
        CATALOG.len()
    }

    /// Roll one tick. Returns a notification when the gate opens.
    pub fn tick(&mut self) -> Option<NotificationInput> {
        let probability = self.config.probability.clamp(0.0, 1.0);
        if !self.rng.random_bool(probability) {
            return None;
        }

        let (title, message, category) = CATALOG[self.rng.random_range(0..CATALOG.len())];
        Some(NotificationInput::new(title, message, category))
    }

    /// Run until cancelled, handing every emitted notification to `sink`.
    ///
    /// The first tick fires one full interval after start.
    pub async fn run<F>(mut self, cancel: CancellationToken, mut sink: F)
    where
        F: FnMut(NotificationInput) + Send,
    {
        let period = self.config.interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = period.as_secs(),
            probability = self.config.probability,
            "Simulated event generator started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Simulated event generator cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Some(input) = self.tick() {
                        tracing::debug!(title = %input.title, "Simulated notification");
                        sink(input);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    fn config(probability: f64) -> SimulatorConfig {
        SimulatorConfig {
            interval: Duration::from_secs(30),
            probability,
            seed: Some(7),
        }
    }

    #[test]
    fn always_fires_at_probability_one() {
        let mut generator = SimulatedEventGenerator::new(config(1.0));
        for _ in 0..20 {
            let input = generator.tick().unwrap();
            assert!(CATALOG.iter().any(|(title, _, _)| *title == input.title));
        }
    }

    #[test]
    fn never_fires_at_probability_zero() {
        let mut generator = SimulatedEventGenerator::new(config(0.0));
        assert!((0..100).all(|_| generator.tick().is_none()));
    }

    #[test]
    fn gate_rate_is_roughly_probability() {
        let mut generator = SimulatedEventGenerator::new(config(0.3));
        let fired = (0..10_000).filter(|_| generator.tick().is_some()).count();
        assert!((2_500..3_500).contains(&fired), "fired {fired} times");
    }

    #[test]
    fn seeded_generators_agree() {
        let mut a = SimulatedEventGenerator::new(config(0.5));
        let mut b = SimulatedEventGenerator::new(config(0.5));
        for _ in 0..50 {
            assert_eq!(a.tick(), b.tick());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn run_emits_once_per_interval_until_cancelled() {
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let sink = Arc::clone(&emitted);

        let handle = tokio::spawn(
            SimulatedEventGenerator::new(config(1.0))
                .run(cancel.clone(), move |input| sink.lock().push(input)),
        );

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(emitted.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(62)).await;
        assert_eq!(emitted.lock().len(), 3);

        cancel.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(emitted.lock().len(), 3);
    }
}
