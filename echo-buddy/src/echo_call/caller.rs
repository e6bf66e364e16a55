use std::borrow::Cow;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::Level::Trace;
use log::{debug, log_enabled, trace, warn};
use tokio::net::lookup_host;
use tokio::process::Command;
use tokio::time::{self, Instant};

use crate::model::EchoOutcome;
use crate::probe_config::ProbeConfig;

use super::reply;
use super::{EchoRequest, EchoTransport, OpenTransport, TransportError};

/// IP TTL / hop limit is a single octet on the wire
const MAX_WIRE_TTL: u16 = 255;
const PREFLIGHT_WAIT_SECS: &str = "1";

/// Opens [PingCaller]s backed by the host's `ping` binary (iputils or busybox flavour).
#[derive(Debug, Clone)]
pub struct SystemPing {
    bin_path: PathBuf,
}

impl SystemPing {
    pub fn new(bin_path: PathBuf) -> Self {
        SystemPing { bin_path }
    }

    async fn resolve(target: &str) -> Result<IpAddr, TransportError> {
        let mut addrs = lookup_host((target, 0u16))
            .await
            .map_err(|source| TransportError::Unresolvable {
                target: target.to_string(),
                source,
            })?;
        addrs
            .next()
            .map(|it| it.ip())
            .ok_or_else(|| TransportError::NoAddress(target.to_string()))
    }

    /// Pings loopback once to find out early whether we are allowed to send echo requests
    /// at all, e.g. missing capabilities or a broken binary.
    async fn verify_ping_access(&self, family_of: IpAddr) -> Result<(), TransportError> {
        let loopback = match family_of {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        };
        let mut check_cmd = Command::new(&self.bin_path);
        check_cmd
            .arg(family_flag(loopback))
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(PREFLIGHT_WAIT_SECS)
            .arg(loopback.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        detach(&mut check_cmd);
        let output = check_cmd
            .output()
            .await
            .map_err(|source| TransportError::Unavailable {
                path: self.bin_path.clone(),
                source,
            })?;
        debug!("ping pre-flight check exited with {}", output.status);
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.trim();
        if reason.is_empty() {
            warn!("Loopback did not answer the pre-flight ping, continuing anyways.");
            Ok(())
        } else {
            Err(TransportError::Unusable {
                path: self.bin_path.clone(),
                reason: reason.to_string(),
            })
        }
    }
}

#[async_trait]
impl OpenTransport for SystemPing {
    type Transport = PingCaller;

    async fn open(&self, config: &ProbeConfig) -> Result<PingCaller, TransportError> {
        let address = Self::resolve(config.target()).await?;
        debug!("Resolved {} to {}", config.target(), address);
        self.verify_ping_access(address).await?;
        if config.ttl() > MAX_WIRE_TTL {
            debug!("TTL {} does not fit on the wire, sending {} instead", config.ttl(), MAX_WIRE_TTL);
        }
        Ok(PingCaller {
            bin_path: self.bin_path.clone(),
            address,
        })
    }
}

/// Sends one echo request per call by running the system ping once.
#[derive(Debug)]
pub struct PingCaller {
    bin_path: PathBuf,
    address: IpAddr,
}

impl PingCaller {
    fn make_command(&self, request: &EchoRequest<'_>) -> Command {
        let mut cmd = Command::new(&self.bin_path);
        cmd.arg(family_flag(self.address))
            .arg("-c")
            .arg("1")
            .arg("-W")
            .arg(wait_secs(request.timeout).to_string())
            .arg("-t")
            .arg(request.ttl.min(MAX_WIRE_TTL).to_string())
            .arg("-s")
            .arg(request.payload.len().to_string())
            .arg(self.address.to_string());
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        detach(&mut cmd);
        cmd
    }
}

#[async_trait]
impl EchoTransport for PingCaller {
    async fn send_echo(&mut self, request: EchoRequest<'_>) -> EchoOutcome {
        let mut cmd = self.make_command(&request);
        if log_enabled!(Trace) {
            let args: Vec<Cow<'_, str>> = cmd
                .as_std()
                .get_args()
                .map(|os_str| os_str.to_string_lossy())
                .collect();
            trace!("Calling ping with arguments: {}", args.join(" "));
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return EchoOutcome::Error(format!("failed to spawn ping: {}", e)),
        };

        let started = Instant::now();
        match time::timeout(request.timeout, child.wait_with_output()).await {
            Err(_) => {
                trace!("ping did not finish within {:?}", request.timeout);
                EchoOutcome::Timeout
            }
            Ok(Err(e)) => EchoOutcome::Error(format!("failed to wait for ping: {}", e)),
            Ok(Ok(output)) => {
                trace!("ping exited with {}", output.status);
                reply::interpret(
                    output.status.success(),
                    &String::from_utf8_lossy(&output.stdout),
                    &String::from_utf8_lossy(&output.stderr),
                    started.elapsed(),
                )
            }
        }
    }
}

/// Settings shared by every ping we run.
fn detach(cmd: &mut Command) {
    // Output is parsed, so it must not be localised
    cmd.env("LC_ALL", "C");
    // Own process group: a Ctrl-C on the terminal reaches us, not the ping in flight.
    // Stopping is up to the probe loop, which lets the current attempt finish.
    cmd.process_group(0);
    // An attempt abandoned after its timeout must not leave a ping behind
    cmd.kill_on_drop(true);
}

fn family_flag(address: IpAddr) -> &'static str {
    match address {
        IpAddr::V4(_) => "-4",
        IpAddr::V6(_) => "-6",
    }
}

/// ping only takes whole seconds; the exact bound is enforced by us.
fn wait_secs(timeout: Duration) -> u128 {
    timeout.as_millis().div_ceil(1000).max(1)
}

#[cfg(test)]
mod tests {
    use std::ffi::OsStr;
    use std::time::Duration;

    use assertor::*;

    use super::*;

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(OsStr::to_string_lossy)
            .map(|it| it.into_owned())
            .collect()
    }

    #[test]
    fn wait_is_rounded_up_to_whole_seconds() {
        assert_that!(wait_secs(Duration::from_millis(5000))).is_equal_to(5);
        assert_that!(wait_secs(Duration::from_millis(1001))).is_equal_to(2);
        assert_that!(wait_secs(Duration::from_millis(10))).is_equal_to(1);
    }

    #[test]
    fn command_carries_request_parameters() {
        // given
        let caller = PingCaller {
            bin_path: PathBuf::from("/usr/bin/ping"),
            address: "203.0.113.1".parse().unwrap(),
        };
        let payload = vec![0u8; 32];
        let request = EchoRequest {
            payload: &payload,
            timeout: Duration::from_millis(1500),
            ttl: 64,
        };
        // when
        let cmd = caller.make_command(&request);
        // then
        assert_that!(cmd.as_std().get_program()).is_equal_to(OsStr::new("/usr/bin/ping"));
        assert_that!(args_of(&cmd)).contains_exactly_in_order(
            ["-4", "-c", "1", "-W", "2", "-t", "64", "-s", "32", "203.0.113.1"]
                .map(String::from)
                .to_vec(),
        );
    }

    #[test]
    fn oversized_ttl_is_clamped_and_v6_selected() {
        // given
        let caller = PingCaller {
            bin_path: PathBuf::from("ping"),
            address: "2001:db8::1".parse().unwrap(),
        };
        let request = EchoRequest {
            payload: &[],
            timeout: Duration::from_millis(5000),
            ttl: 256,
        };
        // when
        let args = args_of(&caller.make_command(&request));
        // then
        assert_that!(args).contains("-6".to_string());
        assert_that!(args).contains_exactly_in_order(
            ["-6", "-c", "1", "-W", "5", "-t", "255", "-s", "0", "2001:db8::1"]
                .map(String::from)
                .to_vec(),
        );
    }

    #[tokio::test]
    async fn ping_runs_in_its_own_process_group() {
        // given
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg("echo $$; cut -d' ' -f5 /proc/$$/stat")
            .stdout(Stdio::piped());
        detach(&mut cmd);
        // when
        let output = cmd.output().await.unwrap();
        // then
        let stdout = String::from_utf8(output.stdout).unwrap();
        let lines: Vec<&str> = stdout.lines().collect();
        assert_that!(lines).has_length(2);
        // process group id equals the child's own pid, so it leads a fresh group
        assert_that!(lines[1]).is_equal_to(lines[0]);
    }

    #[tokio::test]
    async fn missing_binary_is_fatal_on_open() {
        // given
        let opener = SystemPing::new(PathBuf::from("/nonexistent/definitely-not-ping"));
        let config = ProbeConfig::with_defaults("127.0.0.1").unwrap();
        // when
        let res = opener.open(&config).await;
        // then
        assert_that!(matches!(res, Err(TransportError::Unavailable { .. }))).is_true();
    }
}
