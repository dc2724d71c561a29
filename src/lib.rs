//! This crate exposes the internal functionality of the `iptvscan` stream
//! discovery tool.
//!
//! `iptvscan` walks a private or multicast address space looking for
//! working IPTV streams. Every candidate address is probed with `ffprobe`,
//! and the ones that decode are reported with their resolution and codecs.
//!
//! ## Architecture Overview
//!
//! The scanning process follows this flow:
//!
//! 1. **Target generation**: a [`ScanStrategy`](crate::strategy::ScanStrategy)
//!    expands a URL template, a multicast range/port product or a plain list
//!    into stream URLs
//! 2. **Admission**: the [`RateLimiter`](crate::limiter::RateLimiter) bounds
//!    how many probes are in flight and how long each may take
//! 3. **Validation**: the [`StreamValidator`](crate::validator::StreamValidator)
//!    runs a [`Prober`](crate::validator::Prober) on a worker pool and
//!    classifies the result
//! 4. **Orchestration**: the [`ScanOrchestrator`](crate::scanner::ScanOrchestrator)
//!    ties the above together, tracks progress and supports cancellation
//!
//! Multicast scans usually go through the
//! [`SmartPortScanner`](crate::scanner::SmartPortScanner), which learns the
//! live ports on the first address before probing the rest.
//!
//! ## Basic Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use futures::StreamExt;
//! use iptvscan::limiter::RateLimiter;
//! use iptvscan::scanner::SmartPortScanner;
//! use iptvscan::strategy::MulticastStrategy;
//! use iptvscan::validator::{FfprobeProber, StreamValidator};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let prober = FfprobeProber::from_path().ok_or_else(|| anyhow::anyhow!("ffprobe missing"))?;
//!     let validator = Arc::new(StreamValidator::new(prober, 10)?);
//!     let limiter = RateLimiter::new(10, Duration::from_secs(10))?;
//!
//!     // 254 groups on three ports
//!     let multicast =
//!         MulticastStrategy::new("rtp", &["239.3.1.1-239.3.1.254"], &[8000, 8004, 8008])?;
//!
//!     let mut outcomes = SmartPortScanner::new(multicast).scan(validator, limiter)?;
//!     while let Some(outcome) = outcomes.next().await {
//!         let outcome = outcome?;
//!         if outcome.is_valid {
//!             println!("{} {:?}", outcome.target, outcome.resolution);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Configuration mistakes surface as [`ScanError`](crate::errors::ScanError)
//! before any probe runs. Once a scan is running, a broken stream is not an
//! error: it is an outcome with `is_valid == false` and an
//! [`ErrorCategory`](crate::validator::ErrorCategory).
#![allow(clippy::needless_doctest_main)]

pub mod tui;

pub mod input;

pub mod address;

pub mod errors;

pub mod strategy;

pub mod limiter;

pub mod validator;

pub mod scanner;
