use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::time::Duration;

/// What came back for a successful echo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub address: IpAddr,
    pub round_trip: Duration,
    /// Payload bytes in the reply, excluding any headers
    pub bytes: usize,
    pub ttl: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EchoOutcome {
    Reply(EchoReply),
    Timeout,
    Unreachable {
        /// Router or host that reported the failure, if known
        from: Option<IpAddr>,
        reason: String,
    },
    Error(String),
}

/// Outcome of a single probe attempt. `sequence` starts at 1 for each run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub sequence: u64,
    pub outcome: EchoOutcome,
}

/// Renders the time part of a reply line, including its relation sign: `=12ms` or `<1ms`.
pub fn format_round_trip(round_trip: Duration) -> String {
    match round_trip.as_millis() {
        0 => "<1ms".to_string(),
        millis => format!("={}ms", millis),
    }
}

/// One human-readable console line, without line terminator.
impl Display for ProbeResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            EchoOutcome::Reply(reply) => write!(
                f,
                "Reply from {}: bytes={} time{} TTL={}",
                reply.address,
                reply.bytes,
                format_round_trip(reply.round_trip),
                reply.ttl
            ),
            EchoOutcome::Timeout => write!(f, "Request timed out."),
            EchoOutcome::Unreachable { from: Some(from), reason } => {
                write!(f, "Reply from {}: Destination unreachable ({}).", from, reason)
            }
            EchoOutcome::Unreachable { from: None, reason } => {
                write!(f, "Destination unreachable ({}).", reason)
            }
            EchoOutcome::Error(message) => write!(f, "General failure: {}.", message),
        }
    }
}
