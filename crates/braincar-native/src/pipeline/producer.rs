//! Blocking producer loop
//!
//! Runs on a dedicated thread (`tokio::task::spawn_blocking`): reads samples,
//! drives the [`Pipeline`], publishes the latest report through a `watch`
//! channel and queues wire tokens for the async channel task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use braincar_core::types::CycleReport;

use super::Pipeline;
use crate::bridge::source::{SampleSource, SourceError};

/// Shared stop switch between the producer thread and its owner.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// New flag in the running state.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// Whether the loop should keep going.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Ask every holder to stop.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the producer loop returned.
#[derive(Debug, PartialEq, Eq)]
pub enum ProducerExit {
    /// The run flag was cleared
    Stopped,
    /// The source reached end of stream
    SourceExhausted,
    /// The source failed irrecoverably
    SourceFailed(String),
    /// The command queue's receiver is gone
    ChannelClosed,
}

/// Drive `pipeline` from `source` until stopped, exhausted or disconnected.
///
/// Every report replaces the value in `reports`. When `commands` is given,
/// the report's wire token is queued with backpressure; a closed queue ends
/// the loop. Must not be called from inside an async context.
pub fn run_producer<S: SampleSource + ?Sized>(
    pipeline: &mut Pipeline,
    source: &mut S,
    flag: &RunFlag,
    reports: &watch::Sender<Option<CycleReport>>,
    commands: Option<&mpsc::Sender<&'static str>>,
) -> ProducerExit {
    let exit = loop {
        if !flag.is_running() {
            break ProducerExit::Stopped;
        }

        let sample = match source.next_sample() {
            Ok(Some(sample)) => sample,
            Ok(None) => break ProducerExit::SourceExhausted,
            Err(SourceError::Stalled) => continue,
            Err(e) => {
                tracing::error!("Sample source failed: {}", e);
                break ProducerExit::SourceFailed(e.to_string());
            }
        };

        let Some(report) = pipeline.push_sample(sample) else {
            continue;
        };
        let token = pipeline.token(&report);
        reports.send_replace(Some(report));

        if let Some(tx) = commands {
            if tx.blocking_send(token).is_err() {
                tracing::warn!("Command queue closed, stopping producer");
                break ProducerExit::ChannelClosed;
            }
        }
    };

    let stats = pipeline.stats();
    tracing::info!(
        samples = stats.samples,
        windows = stats.windows,
        overrides = stats.overrides,
        rejected = stats.rejected,
        "Producer finished: {:?}",
        exit
    );
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::source::LineSource;
    use crate::pipeline::tests::{constant, small_config};
    use braincar_core::protocol::LineFormat;
    use braincar_core::types::Label;

    fn text_source(lines: usize) -> LineSource<std::io::Cursor<Vec<u8>>> {
        let text: String = (0..lines).map(|i| format!("{i},{}\n", if i % 2 == 0 { 0.01 } else { -0.01 })).collect();
        LineSource::new(std::io::Cursor::new(text.into_bytes()), LineFormat::COUNTER_VALUE)
    }

    #[test]
    fn test_runs_to_exhaustion() {
        let mut pipeline = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        let mut source = text_source(32);
        let (report_tx, report_rx) = watch::channel(None);
        let (cmd_tx, mut cmd_rx) = mpsc::channel(16);

        let exit = run_producer(&mut pipeline, &mut source, &RunFlag::new(), &report_tx, Some(&cmd_tx));
        assert_eq!(exit, ProducerExit::SourceExhausted);

        let latest = report_rx.borrow().clone().unwrap();
        assert_eq!(latest.window_index, 3);

        let mut tokens = Vec::new();
        while let Ok(t) = cmd_rx.try_recv() {
            tokens.push(t);
        }
        assert_eq!(tokens, ["GO"; 4]);
    }

    #[test]
    fn test_cleared_flag_stops_immediately() {
        let mut pipeline = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        let flag = RunFlag::new();
        flag.stop();
        let (report_tx, report_rx) = watch::channel(None);
        let exit = run_producer(&mut pipeline, &mut text_source(32), &flag, &report_tx, None);
        assert_eq!(exit, ProducerExit::Stopped);
        assert!(report_rx.borrow().is_none());
    }

    #[test]
    fn test_closed_queue_stops_producer() {
        let mut pipeline = Pipeline::new(&small_config(), constant(Label::Focused)).unwrap();
        let (report_tx, _report_rx) = watch::channel(None);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        drop(cmd_rx);
        let exit = run_producer(&mut pipeline, &mut text_source(32), &RunFlag::new(), &report_tx, Some(&cmd_tx));
        assert_eq!(exit, ProducerExit::ChannelClosed);
    }
}
