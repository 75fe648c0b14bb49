//! Telemetry Sink
//!
//! Latest-value slots shared between the connection loop (single writer) and
//! any number of readers. Nothing here is a queue: a reader that is slow to
//! look sees only the newest state and frame.

use crate::domain::models::{ConnectionState, Diagnostic, Telemetry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Lagging diagnostic receivers drop the oldest entries past this.
const DIAGNOSTIC_CAPACITY: usize = 64;

/// Writer half, owned by the connection loop.
pub struct TelemetrySink {
    state: watch::Sender<ConnectionState>,
    telemetry: watch::Sender<Option<Telemetry>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    decode_failures: Arc<AtomicU64>,
}

/// Reader half, cheap to clone.
#[derive(Clone)]
pub struct TelemetryView {
    state: watch::Receiver<ConnectionState>,
    telemetry: watch::Receiver<Option<Telemetry>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    decode_failures: Arc<AtomicU64>,
}

impl TelemetrySink {
    pub fn new() -> (Self, TelemetryView) {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (telemetry_tx, telemetry_rx) = watch::channel(None);
        let (diag_tx, _) = broadcast::channel(DIAGNOSTIC_CAPACITY);
        let decode_failures = Arc::new(AtomicU64::new(0));

        let view = TelemetryView {
            state: state_rx,
            telemetry: telemetry_rx,
            diagnostics: diag_tx.clone(),
            decode_failures: decode_failures.clone(),
        };

        (
            Self {
                state: state_tx,
                telemetry: telemetry_tx,
                diagnostics: diag_tx,
                decode_failures,
            },
            view,
        )
    }

    pub fn publish_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    pub fn publish_telemetry(&self, telemetry: Telemetry) {
        self.telemetry.send_replace(Some(telemetry));
    }

    /// Report a non-fatal event. Published telemetry is left as is.
    pub fn report(&self, diagnostic: Diagnostic) {
        if matches!(diagnostic, Diagnostic::DecodeFailed { .. }) {
            self.decode_failures.fetch_add(1, Ordering::Relaxed);
        }
        // No subscribers is fine
        let _ = self.diagnostics.send(diagnostic);
    }
}

impl TelemetryView {
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn latest(&self) -> Option<Telemetry> {
        *self.telemetry.borrow()
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Receiver that wakes on every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Receiver that wakes on every new frame.
    pub fn watch_telemetry(&self) -> watch::Receiver<Option<Telemetry>> {
        self.telemetry.clone()
    }

    /// Diagnostics emitted after this call.
    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }
}
