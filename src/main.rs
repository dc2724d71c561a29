//! Command line front end. Builds one scan from the options, prints what it
//! finds and a summary once the scan reaches a terminal state.
use std::fs;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::debug;

use iptvscan::input::{Config, Opts, ScanMode};
use iptvscan::limiter::RateLimiter;
use iptvscan::scanner::{ScanOrchestrator, ScanState, SmartPortScanner};
use iptvscan::strategy::{
    BatchStrategy, MulticastStrategy, PresetLoader, ScanStrategy, TemplateStrategy,
};
use iptvscan::validator::{FfprobeProber, StreamValidator, ValidationOutcome};
use iptvscan::{detail, output, warning};

/// Targets the options asked for.
enum Plan {
    Direct(ScanStrategy),
    Smart(SmartPortScanner),
}

impl Plan {
    fn estimated_count(&self) -> u64 {
        match self {
            Self::Direct(strategy) => strategy.estimated_count(),
            Self::Smart(scanner) => scanner.estimated_count(),
        }
    }
}

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut opts = Opts::read();
    let config = Config::read(opts.config_path.clone()).context("could not parse the config file")?;
    opts.merge(&config);

    debug!("Main() `opts` arguments are {opts:?}");

    let quiet = opts.greppable || opts.json;
    let plan = build_plan(&opts)?;

    let prober = match &opts.ffprobe {
        Some(path) => FfprobeProber::new(path.clone()),
        None => FfprobeProber::from_path()
            .context("ffprobe was not found on PATH, install FFmpeg or pass --ffprobe")?,
    };
    debug!("Probing with {}", prober.path().display());

    let limiter = RateLimiter::new(opts.concurrency, opts.probe_timeout())?;
    let validator = Arc::new(StreamValidator::new(prober, opts.concurrency)?);
    let mut orchestrator = ScanOrchestrator::new(validator, limiter);

    let total = plan.estimated_count();
    detail!(
        format!("Probing up to {total} targets, {} at a time", opts.concurrency),
        quiet,
        opts.accessible
    );

    let bar = progress_bar(&opts, total);
    let observer_bar = bar.clone();
    orchestrator.on_progress(move |progress| {
        observer_bar.set_position(progress.completed);
        observer_bar.set_message(format!("{} valid", progress.valid));
        Ok(())
    });

    let token = orchestrator.cancel_token();
    let accessible = opts.accessible;
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warning!(
                "Interrupted, waiting for the probes in flight to finish",
                quiet,
                accessible
            );
            token.cancel();
        }
    });

    let started = Instant::now();
    let mut outcomes = match plan {
        Plan::Direct(strategy) => orchestrator.start(strategy)?,
        Plan::Smart(scanner) => orchestrator.start_smart(scanner)?,
    };

    while let Some(outcome) = outcomes.next().await {
        let outcome = outcome.context("scan aborted")?;
        report(&opts, &bar, &outcome)?;
    }
    bar.finish_and_clear();

    let state = orchestrator.state();
    if let Some(progress) = orchestrator.progress() {
        let summary = format!(
            "Scan {state}: {} valid, {} invalid, {} of {} probed in {:.1}s",
            progress.valid,
            progress.invalid,
            progress.completed,
            progress.total,
            started.elapsed().as_secs_f64()
        );
        if state == ScanState::Completed {
            output!(summary, quiet, opts.accessible);
        } else {
            warning!(summary, quiet, opts.accessible);
        }
    }

    Ok(())
}

fn build_plan(opts: &Opts) -> anyhow::Result<Plan> {
    match opts.mode {
        ScanMode::Template => {
            let (Some(base_url), Some(start_ip), Some(end_ip)) =
                (&opts.base_url, &opts.start_ip, &opts.end_ip)
            else {
                bail!("template mode needs --base-url along with --start-ip and --end-ip");
            };
            let strategy = TemplateStrategy::new(base_url, start_ip, end_ip)?;
            Ok(Plan::Direct(strategy.into()))
        }
        ScanMode::Multicast => {
            let multicast = if let Some(id) = &opts.preset {
                let path = opts
                    .preset_file
                    .as_ref()
                    .context("--preset needs --preset-file")?;
                let preset = PresetLoader::new(path).get_by_id(id)?;
                detail!(
                    format!("Using preset {} ({})", preset.name, preset.id),
                    opts.greppable || opts.json,
                    opts.accessible
                );
                preset.to_strategy()?
            } else {
                let ports = opts
                    .ports
                    .as_deref()
                    .context("multicast mode needs --ports or --preset")?;
                MulticastStrategy::new(opts.protocol.scheme(), &opts.ranges, ports)?
            };
            Ok(Plan::Smart(
                SmartPortScanner::new(multicast).smart_scan(!opts.no_smart_scan),
            ))
        }
        ScanMode::Batch => {
            let path = opts.input.as_ref().context("batch mode needs --input")?;
            let list = fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            Ok(Plan::Direct(BatchStrategy::from_list(&list).into()))
        }
    }
}

fn progress_bar(opts: &Opts, total: u64) -> ProgressBar {
    if opts.greppable || opts.json || opts.accessible {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")
    {
        bar.set_style(style);
    }
    bar
}

/// Prints above the progress bar when one is drawn.
fn emit(bar: &ProgressBar, line: &str) {
    if bar.is_hidden() {
        println!("{line}");
    } else {
        bar.println(line);
    }
}

fn report(opts: &Opts, bar: &ProgressBar, outcome: &ValidationOutcome) -> anyhow::Result<()> {
    if opts.json {
        emit(bar, &serde_json::to_string(outcome)?);
        return Ok(());
    }

    if !outcome.is_valid {
        debug!(
            "{} failed: {}",
            outcome.target,
            outcome.error_message.as_deref().unwrap_or_default()
        );
        return Ok(());
    }

    if opts.greppable {
        emit(bar, &outcome.target);
        return Ok(());
    }

    let details = [
        outcome.resolution.as_deref(),
        outcome.video_codec.as_deref(),
        outcome.audio_codec.as_deref(),
    ]
    .into_iter()
    .flatten()
    .join(" ");

    let line = if opts.accessible {
        format!("Valid {} {details}", outcome.target)
    } else {
        format!("Valid {} {details}", outcome.target.purple())
    };
    emit(bar, &line);
    Ok(())
}
