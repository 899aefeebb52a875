/// Structured per-cycle pipeline events.
///
/// Every dispatch, stage firing and completion is reported to a `TraceSink`.
/// Sinks are diagnostics only: a sink that fails to record an event must not
/// stop the simulation.
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::pipeline::Stage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Work-group dispatched to a compute unit
    Run,
    /// Stage consumed a latched slot
    Consume,
    /// Stage pushed a slot into its output latch
    Produce,
    /// Execute stage issued a memory request
    MemoryIssue,
    /// Wavefront executed its end instruction
    Retire,
    /// Work-group finished, compute unit back to idle
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraceEvent {
    pub cycle: u64,
    pub compute_unit: usize,
    pub work_group: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wavefront: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    pub action: Action,
    /// Cycle in which the consumed slot was produced (Consume only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub produced_at: Option<u64>,
}

impl TraceEvent {
    pub fn new(cycle: u64, compute_unit: usize, work_group: usize, action: Action) -> Self {
        TraceEvent {
            cycle,
            compute_unit,
            work_group,
            wavefront: None,
            stage: None,
            action,
            produced_at: None,
        }
    }

    pub fn at_stage(mut self, stage: Stage, wavefront: usize) -> Self {
        self.stage = Some(stage);
        self.wavefront = Some(wavefront);
        self
    }

    pub fn produced_at(mut self, cycle: u64) -> Self {
        self.produced_at = Some(cycle);
        self
    }
}

pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent);

    /// Whether stage-level events are wanted. Dispatch and completion events
    /// are always recorded.
    fn wants_stage_events(&self) -> bool {
        true
    }

    fn flush(&mut self) {}
}

impl<T: TraceSink + ?Sized> TraceSink for Box<T> {
    fn record(&mut self, event: &TraceEvent) {
        (**self).record(event)
    }

    fn wants_stage_events(&self) -> bool {
        (**self).wants_stage_events()
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn record(&mut self, _event: &TraceEvent) {}

    fn wants_stage_events(&self) -> bool {
        false
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<TraceEvent>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_action(&self, action: Action) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter().filter(move |e| e.action == action)
    }
}

impl TraceSink for VecSink {
    fn record(&mut self, event: &TraceEvent) {
        self.events.push(event.clone());
    }
}

/// Writes one JSON object per line. The first write error is logged and
/// further events are dropped.
pub struct JsonLinesSink {
    out: BufWriter<File>,
    failed: bool,
}

impl JsonLinesSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(JsonLinesSink {
            out: BufWriter::new(file),
            failed: false,
        })
    }
}

impl TraceSink for JsonLinesSink {
    fn record(&mut self, event: &TraceEvent) {
        if self.failed {
            return;
        }
        let res = serde_json::to_writer(&mut self.out, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.out.write_all(b"\n"));
        if let Err(e) = res {
            warn!("trace sink disabled after write error: {}", e);
            self.failed = true;
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.out.flush() {
            warn!("trace flush failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_without_empty_fields() {
        let ev = TraceEvent::new(3, 1, 7, Action::Run);
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"cycle":3,"compute_unit":1,"work_group":7,"action":"run"}"#);

        let ev = TraceEvent::new(4, 0, 2, Action::Consume)
            .at_stage(Stage::Decode, 5)
            .produced_at(3);
        let back: TraceEvent = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn json_lines_sink_writes_one_event_per_line() {
        let path = std::env::temp_dir().join(format!("ndrsim-trace-{}.jsonl", std::process::id()));
        {
            let mut sink = JsonLinesSink::create(&path).unwrap();
            sink.record(&TraceEvent::new(1, 0, 0, Action::Run));
            sink.record(&TraceEvent::new(9, 0, 0, Action::Complete));
            sink.flush();
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains(r#""action":"complete""#));
    }
}
