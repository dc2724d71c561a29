use super::{Target, Targets};

/// Replays a list of stream addresses that was filtered elsewhere.
#[derive(Debug, Clone, Default)]
pub struct BatchStrategy {
    targets: Vec<Target>,
}

impl BatchStrategy {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Target>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    /// Reads one target per line. Blank lines and `#` comments are skipped.
    ///
    /// ```rust
    /// # use iptvscan::strategy::BatchStrategy;
    /// let batch = BatchStrategy::from_list("# lobby\nhttp://10.0.0.5/live\n\nrtp://239.0.0.1:5000\n");
    /// assert_eq!(batch.estimated_count(), 2);
    /// ```
    pub fn from_list(list: &str) -> Self {
        Self::new(
            list.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn estimated_count(&self) -> u64 {
        self.targets.len() as u64
    }

    pub fn produce(self) -> Targets {
        Box::new(self.targets.into_iter())
    }
}

#[cfg(test)]
mod tests {
    use super::BatchStrategy;

    #[test]
    fn replays_targets_unchanged() {
        let input = ["rtsp://10.0.0.2/ch1", "http://10.0.0.2/ch1", "rtsp://10.0.0.2/ch1"];
        let batch = BatchStrategy::new(input);
        assert_eq!(batch.estimated_count(), 3);
        assert_eq!(batch.produce().collect::<Vec<_>>(), input);
    }

    #[test]
    fn empty_batch_produces_nothing() {
        let batch = BatchStrategy::default();
        assert_eq!(batch.estimated_count(), 0);
        assert_eq!(batch.produce().next(), None);
    }

    #[test]
    fn list_skips_comments_and_blanks() {
        let batch = BatchStrategy::from_list("  udp://239.0.0.1:1234  \n#skip\n\n\thttp://x/a\n");
        assert_eq!(batch.targets(), ["udp://239.0.0.1:1234", "http://x/a"]);
    }
}
