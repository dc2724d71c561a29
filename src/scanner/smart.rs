//! Two-phase multicast scan.
//!
//! Operators tend to reuse the same handful of ports across a whole
//! multicast block, so instead of probing every address against every port
//! we first probe all ports on one address, then probe only the ports that
//! answered on every other address. A port that is live only on addresses
//! other than the first will be missed; disable the optimization with
//! [`SmartPortScanner::smart_scan`] when that matters.
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::{OutcomeStream, Pull, ScanOrchestrator, ScanPlan};
use crate::errors::ScanError;
use crate::limiter::{check_timeout, RateLimiter};
use crate::strategy::{MulticastStrategy, Target, Targets};
use crate::validator::{Prober, StreamValidator, ValidationOutcome, RTP_TIMEOUT_FLOOR};

/// Timeout for discovery probes.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = RTP_TIMEOUT_FLOOR;

#[derive(Debug, Clone)]
pub struct SmartPortScanner {
    multicast: MulticastStrategy,
    enabled: bool,
    discovery_timeout: Duration,
}

impl SmartPortScanner {
    pub const fn new(multicast: MulticastStrategy) -> Self {
        Self {
            multicast,
            enabled: true,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// With `false`, scans the full cross product like a plain multicast
    /// strategy.
    #[must_use]
    pub const fn smart_scan(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Timeout for each discovery probe, within the limiter's bounds.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Result<Self, ScanError> {
        self.discovery_timeout = check_timeout(timeout)?;
        Ok(self)
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub const fn multicast(&self) -> &MulticastStrategy {
        &self.multicast
    }

    /// Size of the full cross product, an upper bound on probes.
    pub fn estimated_count(&self) -> u64 {
        self.multicast.estimated_count()
    }

    /// Runs the scan on a fresh orchestrator.
    pub fn scan<P: Prober>(
        self,
        validator: Arc<StreamValidator<P>>,
        limiter: RateLimiter,
    ) -> Result<OutcomeStream, ScanError> {
        ScanOrchestrator::new(validator, limiter).start_smart(self)
    }

    pub(crate) fn into_plan(self) -> ScanPlan {
        if !self.enabled {
            debug!("Smart scan disabled, probing the full cross product");
            return ScanPlan::Direct(self.multicast.produce());
        }
        ScanPlan::Smart(SmartSchedule::new(self.multicast, self.discovery_timeout))
    }
}

enum Phase {
    /// Ports still to probe on the first address.
    Discovery(VecDeque<Target>),
    /// Every discovery probe is dispatched; waiting for them to resolve.
    Awaiting,
    Application(Targets),
    Done,
}

pub(crate) struct SmartSchedule {
    multicast: MulticastStrategy,
    first: Option<Ipv4Addr>,
    phase: Phase,
    discovery_timeout: Duration,
    probe_ports: HashMap<Target, u16>,
    discovered: HashSet<u16>,
}

impl SmartSchedule {
    fn new(multicast: MulticastStrategy, discovery_timeout: Duration) -> Self {
        let first = multicast.first_address();
        let mut probe_ports = HashMap::new();
        let mut queue = VecDeque::new();

        if let Some(first) = first {
            for &port in multicast.ports() {
                let target = multicast.target(first, port);
                probe_ports.insert(target.clone(), port);
                queue.push_back(target);
            }
        }

        Self {
            multicast,
            first,
            phase: Phase::Discovery(queue),
            discovery_timeout,
            probe_ports,
            discovered: HashSet::new(),
        }
    }

    pub(crate) fn pull(&mut self, idle: bool) -> Pull {
        loop {
            match &mut self.phase {
                Phase::Discovery(queue) => {
                    if let Some(target) = queue.pop_front() {
                        return Pull::Probe(target, Some(self.discovery_timeout));
                    }
                }
                Phase::Awaiting => {
                    if !idle {
                        return Pull::Barrier;
                    }
                }
                Phase::Application(targets) => {
                    if let Some(target) = targets.next() {
                        return Pull::Probe(target, None);
                    }
                }
                Phase::Done => return Pull::Exhausted,
            }

            // The current phase ran dry.
            self.phase = match self.phase {
                Phase::Discovery(_) => Phase::Awaiting,
                Phase::Awaiting => self.apply_discovery(),
                Phase::Application(_) | Phase::Done => Phase::Done,
            };
        }
    }

    pub(crate) fn observe(&mut self, outcome: &ValidationOutcome) {
        if !outcome.is_valid {
            return;
        }
        if let Some(&port) = self.probe_ports.get(&outcome.target) {
            self.discovered.insert(port);
        }
    }

    /// Ports found in discovery, in configured order.
    fn discovered_ports(&self) -> Vec<u16> {
        self.multicast
            .ports()
            .iter()
            .copied()
            .filter(|port| self.discovered.contains(port))
            .collect()
    }

    fn apply_discovery(&mut self) -> Phase {
        let Some(first) = self.first else {
            return Phase::Done;
        };
        self.probe_ports.clear();

        if !self.multicast.addresses().any(|ip| ip != first) {
            debug!("Single multicast address {first}, nothing left after discovery");
            return Phase::Done;
        }

        let ports = self.discovered_ports();
        if ports.is_empty() {
            warn!(
                "No valid ports discovered on {first} out of {} probed, skipping the remaining addresses",
                self.multicast.ports().len()
            );
            return Phase::Done;
        }

        info!(
            "Discovered ports {ports:?} on {first}, applying them to the remaining {} addresses",
            self.multicast.address_count().saturating_sub(1)
        );
        Phase::Application(self.multicast.with_ports(ports).targets_excluding(Some(first)))
    }
}
