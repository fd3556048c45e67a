//! Core application runner (business logic) for `scale-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically with an injected scanner and output.

use crate::advertisement::RawAdvertisement;
use crate::filter::FrameFilter;
use crate::gate::{DEFAULT_DEBOUNCE, parse_duration};
use crate::output::{DEFAULT_DEVICE_TAG, DEFAULT_MEASUREMENT_NAME, OutputFormat, Sink};
use crate::pipeline::{DEFAULT_LISTEN_TIMEOUT, IgnoreReason, Outcome, Pipeline, Timing};
use crate::scanner::{AdvertisementResult, Backend, ScanError};
use clap::Parser;
use log::{debug, error, info, trace, warn};
use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, timeout_at};

/// Configuration for the core run loop.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Identifier (MAC address) of the scale, compared case-insensitively.
    /// Without it, frames from any scale are accepted.
    #[arg(long, value_name = "MAC")]
    pub mac: Option<String>,

    /// The name of the measurement in the output records.
    #[arg(long, default_value = DEFAULT_MEASUREMENT_NAME)]
    pub influxdb_measurement: String,

    /// Value of the `device` tag in the output records.
    #[arg(long, default_value = DEFAULT_DEVICE_TAG)]
    pub device_tag: String,

    /// Output record format
    #[arg(long, default_value_t, value_enum)]
    pub format: OutputFormat,

    /// Verbose output, log rejected frames and debounce decisions
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Minimum time between two emitted measurements.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub debounce: Duration,

    /// How long to wait for a stabilized reading once the scale is seen.
    #[arg(long, value_parser = parse_duration, default_value = "30s")]
    pub listen_timeout: Duration,

    /// Delay before retrying after a Bluetooth or output failure.
    #[arg(long, value_parser = parse_duration, default_value = "5s")]
    pub retry_delay: Duration,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// List devices broadcasting service data and exit.
    /// The bluer backend only reports scales, use `--backend hci` to see
    /// every device.
    #[arg(long)]
    pub discover: bool,

    /// How long to scan in discovery mode.
    #[arg(long, value_parser = parse_duration, default_value = "10s")]
    pub discover_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mac: None,
            influxdb_measurement: DEFAULT_MEASUREMENT_NAME.to_string(),
            device_tag: DEFAULT_DEVICE_TAG.to_string(),
            format: OutputFormat::default(),
            verbose: false,
            debounce: DEFAULT_DEBOUNCE,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
            retry_delay: Duration::from_secs(5),
            backend: Backend::default(),
            discover: false,
            discover_timeout: Duration::from_secs(10),
        }
    }
}

impl Options {
    fn timing(&self) -> Timing {
        Timing {
            debounce: self.debounce,
            listen_timeout: self.listen_timeout,
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Future resolving to the advertisement channel of a started scan.
pub type ScanFuture<'a> = Pin<
    Box<dyn Future<Output = Result<mpsc::Receiver<AdvertisementResult>, ScanError>> + Send + 'a>,
>;

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(&self, backend: Backend) -> ScanFuture<'_> {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Start scanning, retrying after `retry_delay` until the backend comes up.
async fn start_scan_with_retry(
    scanner: &dyn Scanner,
    backend: Backend,
    retry_delay: Duration,
) -> mpsc::Receiver<AdvertisementResult> {
    loop {
        match scanner.start_scan(backend).await {
            Ok(advertisements) => {
                info!("Scanning for scale advertisements ({backend} backend)");
                return advertisements;
            }
            Err(e) => {
                error!("Failed to start scan: {e}, retrying in {retry_delay:?}");
                sleep(retry_delay).await;
            }
        }
    }
}

/// Run one advertisement through the pipeline and write an admitted measurement.
async fn process(
    pipeline: &mut Pipeline,
    sink: &mut Sink<'_>,
    advertisement: RawAdvertisement,
    retry_delay: Duration,
) {
    let device = advertisement.device.clone();
    match pipeline.handle(advertisement, Instant::now().into_std()) {
        Outcome::Ignored(IgnoreReason::NotMatched) => {
            trace!("{device}: not a frame from the scale");
        }
        Outcome::Ignored(IgnoreReason::CoolingDown) => {
            trace!("{device}: cooling down after emission");
        }
        Outcome::Rejected(e) if e.is_routine() => debug!("{device}: {e}"),
        Outcome::Rejected(e) => warn!("{device}: discarded frame: {e}"),
        Outcome::Suppressed => debug!("{device}: reading suppressed by debounce"),
        Outcome::Emitted(measurement) => {
            info!(
                "{device}: {:.2} kg / {:.2} lbs",
                measurement.weight_kg, measurement.weight_lbs
            );
            if let Err(e) = sink.write(&measurement) {
                error!("Failed to write measurement: {e}, retrying in {retry_delay:?}");
                sleep(retry_delay).await;
                pipeline.reset();
            }
        }
    }
}

/// Run the core processing loop, writing one record per admitted measurement to `out`.
///
/// - Scan start failures are retried after `options.retry_delay`.
/// - A listen phase without an admitted reading ends after `options.listen_timeout`.
/// - Returns when the scanner closes its channel.
pub async fn run_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let mut pipeline = Pipeline::new(FrameFilter::new(options.mac.clone()), options.timing());
    let mut sink = Sink::new(
        options.format.formatter(),
        options.influxdb_measurement,
        options.device_tag,
        out,
    );

    match pipeline.filter().target() {
        Some(target) => info!("Listening for scale {target}"),
        None => info!("Listening for any scale"),
    }

    let mut advertisements =
        start_scan_with_retry(scanner, options.backend, options.retry_delay).await;

    loop {
        let next = match pipeline.deadline() {
            Some(deadline) => {
                match timeout_at(Instant::from_std(deadline), advertisements.recv()).await {
                    Ok(next) => next,
                    Err(_) => {
                        if pipeline.expire(Instant::now().into_std()) {
                            debug!(
                                "No stabilized reading within {:?}, scanning again",
                                options.listen_timeout
                            );
                        }
                        continue;
                    }
                }
            }
            None => advertisements.recv().await,
        };

        match next {
            Some(Ok(advertisement)) => {
                process(&mut pipeline, &mut sink, advertisement, options.retry_delay).await;
            }
            Some(Err(e)) => {
                error!("Scanner error: {e}");
                pipeline.reset();
            }
            None => break,
        }
    }

    info!("Scanner stopped");
    Ok(())
}

/// Scan for `options.discover_timeout` and list every device seen with service
/// data, marking scales and the configured target.
///
/// Devices are whatever the backend delivers. The bluer backend filters on the
/// weight service in BlueZ, so only the hci backend lists `other` devices.
pub async fn discover_with_io(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    let filter = FrameFilter::new(options.mac.clone());
    let mut advertisements = scanner.start_scan(options.backend).await?;
    let deadline = Instant::now() + options.discover_timeout;
    info!("Discovering devices for {:?}", options.discover_timeout);

    // device -> carries body-composition data
    let mut seen: BTreeMap<String, bool> = BTreeMap::new();
    while let Ok(Some(result)) = timeout_at(deadline, advertisements.recv()).await {
        match result {
            Ok(advertisement) => {
                let is_scale = advertisement.has_weight_service();
                *seen.entry(advertisement.device).or_default() |= is_scale;
            }
            Err(e) => warn!("Scanner error: {e}"),
        }
    }
    // Dropping the receiver stops the scan
    drop(advertisements);

    if seen.is_empty() {
        warn!("No devices found");
    }
    for (device, is_scale) in &seen {
        let kind = if *is_scale { "scale" } else { "other" };
        let target = if options.mac.is_some() && filter.matches_device(device) {
            " (target)"
        } else {
            ""
        };
        writeln!(out, "{device}\t{kind}{target}")?;
    }
    out.flush()?;

    Ok(())
}

/// Run discovery or the measurement loop depending on `options.discover`.
pub async fn run(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
) -> Result<(), RunError> {
    if options.discover {
        discover_with_io(options, scanner, out).await
    } else {
        run_with_io(options, scanner, out).await
    }
}
