use std::net::Ipv4Addr;

use log::debug;

use super::Targets;
use crate::address::AddressRange;
use crate::errors::ScanError;

/// Marker substituted with each address of the range.
pub const PLACEHOLDER: &str = "{ip}";

/// Largest address span a template scan may cover.
pub const MAX_TEMPLATE_ADDRESSES: u64 = 1024;

/// Substitutes every address of a private IPv4 range into a URL pattern.
///
/// Only RFC1918 ranges are accepted so the scanner cannot be pointed at
/// someone else's network.
#[derive(Debug, Clone)]
pub struct TemplateStrategy {
    base_url: String,
    range: AddressRange,
}

impl TemplateStrategy {
    /// # Example
    ///
    /// ```rust
    /// # use iptvscan::strategy::TemplateStrategy;
    /// let template = TemplateStrategy::new("http://10.0.0.1:8080/{ip}/live", "10.0.0.1", "10.0.0.4").unwrap();
    /// assert_eq!(template.estimated_count(), 4);
    /// ```
    pub fn new(base_url: &str, start_ip: &str, end_ip: &str) -> Result<Self, ScanError> {
        if !base_url.contains(PLACEHOLDER) {
            return Err(ScanError::MissingPlaceholder(base_url.to_owned()));
        }

        let start = parse_endpoint(start_ip)?;
        let end = parse_endpoint(end_ip)?;
        let range = AddressRange::new(start, end)?;

        if !range.is_private() {
            return Err(ScanError::PublicRange { start, end });
        }

        let count = range.count();
        if count > MAX_TEMPLATE_ADDRESSES {
            return Err(ScanError::RangeTooLarge {
                count,
                max: MAX_TEMPLATE_ADDRESSES,
            });
        }

        debug!("Template strategy over {range} ({count} targets) for {base_url}");

        Ok(Self {
            base_url: base_url.to_owned(),
            range,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub const fn range(&self) -> AddressRange {
        self.range
    }

    pub fn estimated_count(&self) -> u64 {
        self.range.count()
    }

    /// Only the literal `{ip}` marker is replaced; any other braces in the
    /// URL are left alone.
    pub fn produce(self) -> Targets {
        let segments: Vec<String> = self.base_url.split(PLACEHOLDER).map(str::to_owned).collect();
        Box::new(self.range.iter().map(move |ip| segments.join(&ip.to_string())))
    }
}

fn parse_endpoint(raw: &str) -> Result<Ipv4Addr, ScanError> {
    raw.trim()
        .parse()
        .map_err(|_| ScanError::InvalidAddress(raw.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::TemplateStrategy;
    use crate::errors::ScanError;
    use parameterized::parameterized;

    #[test]
    fn substitutes_each_address_in_order() {
        let template = TemplateStrategy::new("http://x/{ip}", "10.0.0.1", "10.0.0.3").unwrap();
        assert_eq!(template.estimated_count(), 3);

        let targets: Vec<_> = template.produce().collect();
        assert_eq!(
            targets,
            ["http://x/10.0.0.1", "http://x/10.0.0.2", "http://x/10.0.0.3"]
        );
    }

    #[test]
    fn other_braces_are_left_untouched() {
        let template =
            TemplateStrategy::new("http://x/{ip}/play?t={tok}&fmt={hls}", "10.0.0.1", "10.0.0.2")
                .unwrap();
        let targets: Vec<_> = template.produce().collect();
        assert_eq!(
            targets,
            [
                "http://x/10.0.0.1/play?t={tok}&fmt={hls}",
                "http://x/10.0.0.2/play?t={tok}&fmt={hls}",
            ]
        );
    }

    #[test]
    fn every_marker_is_substituted() {
        let template = TemplateStrategy::new("udp://{ip}:1234?src={ip}", "10.1.1.7", "10.1.1.7").unwrap();
        let targets: Vec<_> = template.produce().collect();
        assert_eq!(targets, ["udp://10.1.1.7:1234?src=10.1.1.7"]);
    }

    #[test]
    fn keeps_the_rest_of_the_url() {
        let template =
            TemplateStrategy::new("rtsp://{ip}:554/stream?ch=1", "192.168.1.10", "192.168.1.10")
                .unwrap();
        let targets: Vec<_> = template.produce().collect();
        assert_eq!(targets, ["rtsp://192.168.1.10:554/stream?ch=1"]);
    }

    #[test]
    fn public_start_is_rejected() {
        let err = TemplateStrategy::new("http://x/{ip}", "8.8.8.8", "8.8.8.9").unwrap_err();
        assert!(matches!(err, ScanError::PublicRange { .. }));
    }

    #[parameterized(start = {
        "10.255.255.250", "172.31.255.255", "192.168.0.1",
    }, end = {
        "11.0.0.1", "172.32.0.0", "193.0.0.0",
    })]
    fn ranges_leaving_private_space_are_rejected(start: &str, end: &str) {
        let err = TemplateStrategy::new("http://x/{ip}", start, end).unwrap_err();
        assert!(matches!(err, ScanError::PublicRange { .. }));
    }

    #[test]
    fn oversized_range_is_rejected() {
        let err = TemplateStrategy::new("http://x/{ip}", "10.0.0.0", "10.0.4.0").unwrap_err();
        assert!(matches!(
            err,
            ScanError::RangeTooLarge {
                count: 1025,
                max: 1024
            }
        ));
    }

    #[test]
    fn largest_allowed_range_is_accepted() {
        let template = TemplateStrategy::new("http://x/{ip}", "10.0.0.0", "10.0.3.255").unwrap();
        assert_eq!(template.estimated_count(), 1024);
    }

    #[test]
    fn missing_placeholder_is_rejected() {
        let err = TemplateStrategy::new("http://x/live", "10.0.0.1", "10.0.0.2").unwrap_err();
        assert!(matches!(err, ScanError::MissingPlaceholder(_)));
    }

    #[test]
    fn reversed_endpoints_are_rejected() {
        let err = TemplateStrategy::new("http://x/{ip}", "10.0.0.9", "10.0.0.1").unwrap_err();
        assert!(matches!(err, ScanError::ReversedRange { .. }));
    }

    #[test]
    fn malformed_endpoint_is_rejected() {
        let err = TemplateStrategy::new("http://x/{ip}", "10.0.0.x", "10.0.0.1").unwrap_err();
        assert!(matches!(err, ScanError::InvalidAddress(_)));
    }
}
