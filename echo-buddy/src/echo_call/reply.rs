use std::net::IpAddr;
use std::sync::OnceLock;
use std::time::Duration;

use log::trace;
use regex::{Captures, Regex};

use crate::model::{EchoOutcome, EchoReply};

/// ICMP / ICMPv6 echo header; ping reports it as part of the byte count
const ECHO_HEADER_BYTES: usize = 8;

fn reply_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?P<bytes>\d+) bytes from (?:\S+ \()?(?P<addr>[0-9a-f:.]+?)\)?(?:%[\w.-]+)?: .*?ttl=(?P<ttl>\d+)(?:.*?time\s*(?P<sign>[=<])\s*(?P<time>[\d.]+)\s*ms)?",
        )
        .expect("Unable to compile ping reply line regex")
    })
}

fn icmp_error_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*From (?:\S+ \()?(?P<addr>[0-9a-f:.]+?)\)?(?:%[\w.-]+)?:?\s+(?:icmp_seq=\d+\s+)?(?P<reason>.+?)\s*$",
        )
        .expect("Unable to compile ping ICMP error line regex")
    })
}

/// Makes sense of the output of a single `ping -c 1` run. `elapsed` is what we measured
/// ourselves; it stands in for the round trip if ping does not print one, which iputils
/// does for payloads too small to carry a timestamp.
pub fn interpret(
    exited_successfully: bool,
    stdout: &str,
    stderr: &str,
    elapsed: Duration,
) -> EchoOutcome {
    if let Some(reply) = stdout.lines().find_map(|line| parse_reply_line(line, elapsed)) {
        return EchoOutcome::Reply(reply);
    }
    if let Some(outcome) = stdout.lines().find_map(parse_icmp_error_line) {
        return outcome;
    }
    let stderr = stderr.trim();
    if let Some(line) = stderr.lines().find(|it| it.to_lowercase().contains("unreachable")) {
        return EchoOutcome::Unreachable {
            from: None,
            reason: strip_program_prefix(line).to_string(),
        };
    }
    match (exited_successfully, stderr.lines().next()) {
        (_, Some(first_line)) => EchoOutcome::Error(strip_program_prefix(first_line).to_string()),
        (true, None) => EchoOutcome::Error("ping reported success, but printed no reply".to_string()),
        (false, None) => {
            trace!("No reply and no complaint from ping, treating as timeout");
            EchoOutcome::Timeout
        }
    }
}

fn parse_reply_line(line: &str, elapsed: Duration) -> Option<EchoReply> {
    let caps = reply_line_re().captures(line)?;
    let address: IpAddr = caps["addr"].parse().ok()?;
    let bytes: usize = caps["bytes"].parse().ok()?;
    let ttl: u16 = caps["ttl"].parse().ok()?;
    Some(EchoReply {
        address,
        round_trip: parse_round_trip(&caps, elapsed)?,
        bytes: bytes.saturating_sub(ECHO_HEADER_BYTES),
        ttl,
    })
}

fn parse_round_trip(caps: &Captures<'_>, elapsed: Duration) -> Option<Duration> {
    match caps.name("sign").map(|it| it.as_str()) {
        None => {
            trace!("ping printed no round trip time, using our own measurement");
            return Some(elapsed);
        }
        Some("<") => return Some(Duration::ZERO),
        Some(_) => {}
    }
    let millis: f64 = caps["time"].parse().ok()?;
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_secs_f64(millis / 1000.0))
}

fn parse_icmp_error_line(line: &str) -> Option<EchoOutcome> {
    let caps = icmp_error_line_re().captures(line)?;
    Some(EchoOutcome::Unreachable {
        from: caps["addr"].parse().ok(),
        reason: caps["reason"].to_string(),
    })
}

fn strip_program_prefix(line: &str) -> &str {
    line.trim().strip_prefix("ping: ").unwrap_or(line.trim())
}
