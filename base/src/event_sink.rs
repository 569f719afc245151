// Stand-in for the original's event-push client (§7): a side channel for
// operationally-interesting anomalies (md5 mismatches, audit errors, handoff
// activity) that isn't part of any request's own reply. The production
// implementation just logs; tests can swap in a sink that records calls.

use tracing::{error, info, warn};

pub trait EventSink: Send {
    fn info(&self, tag: &str, description: &str);
    fn warn(&self, tag: &str, description: &str);
    fn error(&self, tag: &str, description: &str);
}

/// Routes every event through `tracing`, matching how this codebase reports
/// everything else.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn info(&self, tag: &str, description: &str) {
        info!(target: "cluster::event", tag, "{}", description);
    }

    fn warn(&self, tag: &str, description: &str) {
        warn!(target: "cluster::event", tag, "{}", description);
    }

    fn error(&self, tag: &str, description: &str) {
        error!(target: "cluster::event", tag, "{}", description);
    }
}

/// An `EventSink` that records calls instead of logging them, so crate
/// tests (here and downstream) can assert on what was reported without
/// scraping log output.
#[derive(Default)]
pub struct RecordingEventSink {
    pub events: std::sync::Mutex<Vec<(String, String, String)>>,
}

impl EventSink for RecordingEventSink {
    fn info(&self, tag: &str, description: &str) {
        self.events
            .lock()
            .unwrap()
            .push(("info".into(), tag.into(), description.into()));
    }
    fn warn(&self, tag: &str, description: &str) {
        self.events
            .lock()
            .unwrap()
            .push(("warn".into(), tag.into(), description.into()));
    }
    fn error(&self, tag: &str, description: &str) {
        self.events
            .lock()
            .unwrap()
            .push(("error".into(), tag.into(), description.into()));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test]
    fn recording_sink_captures_events() {
        let sink = RecordingEventSink::default();
        sink.error("md5-mismatch", "oops");
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, "md5-mismatch");
    }

    #[test]
    fn tracing_sink_does_not_panic() {
        let sink = TracingEventSink;
        sink.info("program-start", "data_reader starts");
    }
}
