use std::collections::VecDeque;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// In-memory history of what the controller observed and did. Lost on
/// restart.
pub(crate) struct EventLog {
    events: VecDeque<ControllerEvent>,
}

#[derive(Debug, Clone)]
pub(crate) struct ControllerEvent {
    pub(crate) ts: OffsetDateTime,
    pub(crate) kind: EventKind,
    pub(crate) detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EventKind {
    Command,
    Relay,
    Report,
    Error,
    System,
}

impl EventKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Relay => "relay",
            Self::Report => "report",
            Self::Error => "error",
            Self::System => "system",
        }
    }
}

impl ControllerEvent {
    pub(crate) fn timestamp(&self) -> String {
        self.ts
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.ts.unix_timestamp().to_string())
    }
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl EventLog {
    pub(crate) fn new() -> Self {
        Self {
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record an inbound command that needed no relay action.
    pub(crate) fn record_command(&mut self, detail: String) {
        self.push_event(EventKind::Command, detail);
    }

    /// Record a relay sequence.
    pub(crate) fn record_relay(&mut self, detail: String) {
        self.push_event(EventKind::Relay, detail);
    }

    /// Record a water-level publish.
    pub(crate) fn record_report(&mut self, detail: String) {
        self.push_event(EventKind::Report, detail);
    }

    /// Record an error event.
    pub(crate) fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a lifecycle event.
    pub(crate) fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// The newest `n` events, oldest first.
    pub(crate) fn recent(&self, n: usize) -> impl Iterator<Item = &ControllerEvent> {
        self.events.iter().skip(self.events.len().saturating_sub(n))
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    #[cfg(test)]
    pub(crate) fn last(&self) -> Option<&ControllerEvent> {
        self.events.back()
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(ControllerEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
