use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::echo_call::{EchoRequest, EchoTransport, OpenTransport, TransportError};
use crate::model::{EchoOutcome, EchoReply};
use crate::probe_config::ProbeConfig;

pub struct RecordedRequest {
    pub payload: Vec<u8>,
    pub timeout: Duration,
    pub ttl: u16,
    pub sent_at: Instant,
}

pub type Requests = Arc<Mutex<Vec<RecordedRequest>>>;

pub fn reply_after(address: &str, millis: u64) -> EchoOutcome {
    EchoOutcome::Reply(EchoReply {
        address: address.parse().expect(address),
        round_trip: Duration::from_millis(millis),
        bytes: 32,
        ttl: 256,
    })
}

/// Hands out transports that answer from a script. Once the script runs dry, every
/// further attempt times out.
pub struct FakeOpener {
    script: Vec<EchoOutcome>,
    fail: bool,
    stop_when_done: Option<CancellationToken>,
    released: Arc<AtomicBool>,
    requests: Requests,
}

impl FakeOpener {
    pub fn scripted(script: Vec<EchoOutcome>) -> Self {
        FakeOpener {
            script,
            fail: false,
            stop_when_done: None,
            released: Arc::new(AtomicBool::new(false)),
            requests: Requests::default(),
        }
    }

    pub fn failing() -> Self {
        FakeOpener { fail: true, ..Self::scripted(vec![]) }
    }

    /// Cancel `stop` right after the last scripted outcome was handed out.
    pub fn stopping(mut self, stop: &CancellationToken) -> Self {
        self.stop_when_done = Some(stop.clone());
        self
    }

    pub fn released(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    pub fn requests(&self) -> Requests {
        Arc::clone(&self.requests)
    }
}

#[async_trait]
impl OpenTransport for FakeOpener {
    type Transport = FakeTransport;

    async fn open(&self, _config: &ProbeConfig) -> Result<FakeTransport, TransportError> {
        if self.fail {
            return Err(TransportError::Unusable {
                path: PathBuf::from("ping"),
                reason: "socket: Operation not permitted".to_string(),
            });
        }
        Ok(FakeTransport {
            script: self.script.iter().cloned().collect(),
            stop_when_done: self.stop_when_done.clone(),
            released: Arc::clone(&self.released),
            requests: Arc::clone(&self.requests),
        })
    }
}

pub struct FakeTransport {
    script: VecDeque<EchoOutcome>,
    stop_when_done: Option<CancellationToken>,
    released: Arc<AtomicBool>,
    requests: Requests,
}

#[async_trait]
impl EchoTransport for FakeTransport {
    async fn send_echo(&mut self, request: EchoRequest<'_>) -> EchoOutcome {
        self.requests.lock().unwrap().push(RecordedRequest {
            payload: request.payload.to_vec(),
            timeout: request.timeout,
            ttl: request.ttl,
            sent_at: Instant::now(),
        });
        let outcome = self.script.pop_front().unwrap_or(EchoOutcome::Timeout);
        if self.script.is_empty() {
            if let Some(stop) = &self.stop_when_done {
                stop.cancel();
            }
        }
        outcome
    }
}

impl Drop for FakeTransport {
    fn drop(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}
