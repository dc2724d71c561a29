//! Provides the policies that decide which stream addresses a scan probes.
//!
//! Every strategy hands out its targets as a lazy, single-pass iterator and
//! reports an upper bound on how many it will produce so progress can be
//! tracked before the first probe resolves.
mod batch;
mod multicast;
mod preset;
mod template;

pub use batch::BatchStrategy;
pub use multicast::{MulticastProtocol, MulticastStrategy};
pub use preset::{PresetLoader, ScanPreset};
pub use template::{TemplateStrategy, MAX_TEMPLATE_ADDRESSES, PLACEHOLDER};

/// A single stream address, probed at most once per scan.
pub type Target = String;

/// Lazy sequence of targets. Consumed once, never restarted.
pub type Targets = Box<dyn Iterator<Item = Target> + Send>;

/// Represents the target generation policy of a scan.
#[derive(Debug, Clone)]
pub enum ScanStrategy {
    Template(TemplateStrategy),
    Multicast(MulticastStrategy),
    Batch(BatchStrategy),
}

impl ScanStrategy {
    /// Upper bound on the number of targets [`produce`](Self::produce) yields.
    pub fn estimated_count(&self) -> u64 {
        match self {
            Self::Template(template) => template.estimated_count(),
            Self::Multicast(multicast) => multicast.estimated_count(),
            Self::Batch(batch) => batch.estimated_count(),
        }
    }

    /// Turns the strategy into its target sequence.
    ///
    /// Takes `self` by value: a strategy is good for exactly one pass.
    pub fn produce(self) -> Targets {
        match self {
            Self::Template(template) => template.produce(),
            Self::Multicast(multicast) => multicast.produce(),
            Self::Batch(batch) => batch.produce(),
        }
    }
}

impl From<TemplateStrategy> for ScanStrategy {
    fn from(template: TemplateStrategy) -> Self {
        Self::Template(template)
    }
}

impl From<MulticastStrategy> for ScanStrategy {
    fn from(multicast: MulticastStrategy) -> Self {
        Self::Multicast(multicast)
    }
}

impl From<BatchStrategy> for ScanStrategy {
    fn from(batch: BatchStrategy) -> Self {
        Self::Batch(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::{BatchStrategy, MulticastStrategy, ScanStrategy, TemplateStrategy};

    #[test]
    fn produced_targets_match_estimate() {
        let strategies: Vec<ScanStrategy> = vec![
            TemplateStrategy::new("http://x/{ip}", "10.0.0.1", "10.0.0.3")
                .unwrap()
                .into(),
            MulticastStrategy::new("udp", &["239.1.1.1-239.1.1.2"], &[8000, 8004])
                .unwrap()
                .into(),
            BatchStrategy::new(["rtp://239.0.0.1:5000", "http://10.0.0.9/live"]).into(),
        ];

        for strategy in strategies {
            let estimate = strategy.estimated_count();
            assert_eq!(strategy.produce().count() as u64, estimate);
        }
    }
}
