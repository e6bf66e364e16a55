use anyhow::Result;
use log::{debug, info};
use ping_crab::pubsub::Subscriber;

use crate::model::{EchoOutcome, ProbeResult};

/// Mirrors every published result into the diagnostic log. Failed attempts are logged
/// at info level, replies only at debug.
pub struct LogSubscriber;

impl Subscriber<ProbeResult> for LogSubscriber {
    fn handle(&self, result: &ProbeResult) -> Result<()> {
        match &result.outcome {
            EchoOutcome::Reply(reply) => debug!(
                "#{}: {} answered after {:?} (ttl {})",
                result.sequence, reply.address, reply.round_trip, reply.ttl
            ),
            EchoOutcome::Timeout => info!("#{}: no reply in time", result.sequence),
            EchoOutcome::Unreachable { from, reason } => info!(
                "#{}: unreachable according to {:?}: {}",
                result.sequence, from, reason
            ),
            EchoOutcome::Error(message) => info!("#{}: attempt failed: {}", result.sequence, message),
        }
        Ok(())
    }
}
