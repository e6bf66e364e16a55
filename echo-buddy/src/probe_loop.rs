use std::io::Write;
use std::sync::Arc;

use anyhow::anyhow;
use log::{debug, error, info, trace, warn};
use ping_crab::pubsub::{Publisher, Subscriber, SubscriptionId};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::echo_call::{EchoRequest, EchoTransport, OpenTransport};
use crate::model::ProbeResult;
use crate::probe_config::ProbeConfig;

#[cfg(test)]
mod test_utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Sending,
    Waiting,
    Reporting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop was requested from the outside
    Stopped,
    /// The transport could not be opened, nothing was probed
    StartupFailed,
}

impl LoopExit {
    pub fn code(self) -> u8 {
        match self {
            LoopExit::Stopped => 0,
            LoopExit::StartupFailed => 1,
        }
    }
}

/// Probes the configured target until stopped, printing one line per attempt to `sink` and
/// then publishing the [ProbeResult] to all subscribers.
pub struct ProbeLoop<O, W> {
    config: ProbeConfig,
    opener: O,
    sink: W,
    publisher: Arc<Publisher<ProbeResult>>,
    state: LoopState,
    sequence: u64,
}

impl<O, W> ProbeLoop<O, W>
where
    O: OpenTransport,
    W: Write + Send,
{
    pub fn new(config: ProbeConfig, opener: O, sink: W) -> Self {
        ProbeLoop {
            config,
            opener,
            sink,
            publisher: Arc::new(Publisher::new()),
            state: LoopState::Idle,
            sequence: 0,
        }
    }

    pub fn with_subscriber(self, subscriber: Arc<dyn Subscriber<ProbeResult>>) -> Self {
        self.subscribe(subscriber);
        self
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<ProbeResult>>) -> SubscriptionId {
        self.publisher.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.publisher.unsubscribe(id)
    }

    /// Shared handle to the result channel, for attaching from elsewhere while running.
    pub fn publisher(&self) -> Arc<Publisher<ProbeResult>> {
        Arc::clone(&self.publisher)
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    #[cfg(test)]
    fn into_sink(self) -> W {
        self.sink
    }

    /// Runs until `stop` is cancelled. Stop is checked before each attempt and while
    /// sleeping between attempts; an attempt in flight is always allowed to finish.
    pub async fn execute(&mut self, stop: CancellationToken) -> LoopExit {
        let transport = match self.opener.open(&self.config).await {
            Ok(transport) => transport,
            Err(e) => {
                error!("Unable to start probing {}: {:#}", self.config.target(), anyhow!(e));
                self.transition(LoopState::Stopped);
                return LoopExit::StartupFailed;
            }
        };
        info!(
            "Initialized with ping target {}, data size is {}",
            self.config.target(),
            self.config.payload_size()
        );

        self.transition(LoopState::Running);
        self.run(transport, &stop).await;
        self.transition(LoopState::Stopped);
        LoopExit::Stopped
    }

    async fn run(&mut self, mut transport: O::Transport, stop: &CancellationToken) {
        // transport is moved in here and dropped on every way out
        loop {
            if stop.is_cancelled() {
                trace!("Cancellation signal received by probe loop.");
                return;
            }

            let result = self.probe_once(&mut transport).await;
            self.report(&result);
            self.transition(LoopState::Running);

            select! {
                biased; // Stop should take prio
                _ = stop.cancelled() => {
                    trace!("Cancellation signal received by probe loop while sleeping.");
                    return;
                }
                _ = time::sleep(self.config.interval()) => {}
            }
        }
    }

    async fn probe_once(&mut self, transport: &mut O::Transport) -> ProbeResult {
        self.transition(LoopState::Sending);
        self.sequence += 1;
        let payload = vec![0u8; self.config.payload_size()];
        let request = EchoRequest {
            payload: &payload,
            timeout: self.config.timeout(),
            ttl: self.config.ttl(),
        };

        self.transition(LoopState::Waiting);
        let outcome = transport.send_echo(request).await;
        ProbeResult {
            sequence: self.sequence,
            outcome,
        }
    }

    fn report(&mut self, result: &ProbeResult) {
        self.transition(LoopState::Reporting);
        // printed first, so the line is out even if subscribers take their time
        if let Err(e) = writeln!(self.sink, "{}", result).and_then(|_| self.sink.flush()) {
            warn!("Unable to print result #{}: {}", result.sequence, e);
        }

        debug!("Got reply {:?} and publishing it.", result);
        let report = self.publisher.publish(result);
        trace!("Published to {} subscriber(s), {} failed.", report.delivered, report.failed);
    }

    fn transition(&mut self, next: LoopState) {
        trace!("Probe loop {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}
