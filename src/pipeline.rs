//! Scan-cycle state machine tying the frame filter, decoder and admission gate
//! together.
//!
//! ```text
//! Scanning --frame matched--> Listening --admitted--> Cooldown --expired--> Scanning
//!                                 |
//!                                 +--listen timeout / rejected--> Scanning
//! ```
//!
//! Phase transitions are pure ([`ScanPhase::next`]). [`Pipeline`] is the
//! context object that owns the phase together with the gate, so a single
//! owner drives every read-modify-write of the gate.

use crate::advertisement::RawAdvertisement;
use crate::decoder::{DecodeError, PlausibilityBounds, decode_with};
use crate::filter::FrameFilter;
use crate::gate::{AdmissionGate, DEFAULT_DEBOUNCE};
use crate::measurement::Measurement;
use std::fmt;
use std::time::{Duration, Instant};

/// Default bound on how long to listen to a matched scale.
pub const DEFAULT_LISTEN_TIMEOUT: Duration = Duration::from_secs(30);

/// Phase durations of the scan cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub debounce: Duration,
    pub listen_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            listen_timeout: DEFAULT_LISTEN_TIMEOUT,
        }
    }
}

/// Where the scan cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    /// Waiting for a frame from the target scale.
    Scanning,
    /// A scale frame was seen at `since`, waiting for an admitted reading.
    Listening { since: Instant },
    /// A measurement was emitted, further frames are skipped until `until`.
    Cooldown { until: Instant },
}

/// Inputs driving [`ScanPhase::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A frame from the target scale arrived.
    FrameMatched,
    /// A reading passed the gate.
    Admitted,
    /// A frame was rejected by the decoder.
    Rejected,
    /// Time passed without input.
    Tick,
}

impl ScanPhase {
    /// Compute the phase after `transition` at `now`.
    pub fn next(self, transition: Transition, now: Instant, timing: &Timing) -> ScanPhase {
        let phase = self.expired(now, timing);
        match (phase, transition) {
            (ScanPhase::Cooldown { .. }, _) => phase,
            (ScanPhase::Scanning, Transition::FrameMatched) => ScanPhase::Listening { since: now },
            (_, Transition::Admitted) => ScanPhase::Cooldown {
                until: now + timing.debounce,
            },
            (ScanPhase::Listening { .. }, Transition::Rejected) => ScanPhase::Scanning,
            (phase, _) => phase,
        }
    }

    /// Phase after applying timeouts only.
    fn expired(self, now: Instant, timing: &Timing) -> ScanPhase {
        match self.deadline(timing) {
            Some(deadline) if now >= deadline => ScanPhase::Scanning,
            _ => self,
        }
    }

    /// When this phase ends on its own, if ever.
    pub fn deadline(&self, timing: &Timing) -> Option<Instant> {
        match *self {
            ScanPhase::Scanning => None,
            ScanPhase::Listening { since } => Some(since + timing.listen_timeout),
            ScanPhase::Cooldown { until } => Some(until),
        }
    }
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Scanning => write!(f, "scanning"),
            ScanPhase::Listening { .. } => write!(f, "listening"),
            ScanPhase::Cooldown { .. } => write!(f, "cooldown"),
        }
    }
}

/// Why an advertisement was skipped without decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Not the target device, or no weight-service data.
    NotMatched,
    /// A measurement was just emitted.
    CoolingDown,
}

/// Result of feeding one advertisement through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Rejected(DecodeError),
    Suppressed,
    Emitted(Measurement),
}

/// Frame filter, decoder and gate with the scan phase they drive.
#[derive(Debug)]
pub struct Pipeline {
    filter: FrameFilter,
    bounds: PlausibilityBounds,
    timing: Timing,
    gate: AdmissionGate,
    phase: ScanPhase,
}

impl Pipeline {
    pub fn new(filter: FrameFilter, timing: Timing) -> Self {
        Self {
            filter,
            bounds: PlausibilityBounds::default(),
            timing,
            gate: AdmissionGate::new(timing.debounce),
            phase: ScanPhase::Scanning,
        }
    }

    pub fn with_bounds(mut self, bounds: PlausibilityBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn filter(&self) -> &FrameFilter {
        &self.filter
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// When the current phase times out.
    pub fn deadline(&self) -> Option<Instant> {
        self.phase.deadline(&self.timing)
    }

    /// Apply phase timeouts at `now`. Returns `true` if a listen phase ended
    /// without an admitted reading.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.phase;
        self.phase = before.next(Transition::Tick, now, &self.timing);
        matches!(before, ScanPhase::Listening { .. }) && self.phase == ScanPhase::Scanning
    }

    /// Return to scanning. The gate keeps its last emission time.
    pub fn reset(&mut self) {
        self.phase = ScanPhase::Scanning;
    }

    /// Feed one advertisement received at `now`.
    pub fn handle(&mut self, advertisement: RawAdvertisement, now: Instant) -> Outcome {
        if self.expire(now) {
            log::debug!("Listen timeout, back to scanning");
        }
        if let ScanPhase::Cooldown { .. } = self.phase {
            return Outcome::Ignored(IgnoreReason::CoolingDown);
        }

        let device = advertisement.device.clone();
        let Some(payload) = self.filter.extract(advertisement) else {
            return Outcome::Ignored(IgnoreReason::NotMatched);
        };
        self.phase = self.phase.next(Transition::FrameMatched, now, &self.timing);

        let reading = match decode_with(payload.as_bytes(), &self.bounds) {
            Ok(reading) => reading,
            Err(err) if err.is_routine() => return Outcome::Rejected(err),
            Err(err) => {
                self.phase = self.phase.next(Transition::Rejected, now, &self.timing);
                return Outcome::Rejected(err);
            }
        };

        match self.gate.admit(&device, reading, now) {
            Some(measurement) => {
                self.phase = self.phase.next(Transition::Admitted, now, &self.timing);
                Outcome::Emitted(measurement)
            }
            None => Outcome::Suppressed,
        }
    }
}
