use std::time::Duration;

use clap::Args;
use thiserror::Error;

pub const DEFAULT_PAYLOAD_SIZE: usize = 32;
const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS);
pub const DEFAULT_TTL: u16 = 256;
const DEFAULT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(DEFAULT_INTERVAL_MS);

#[derive(Args, Debug, Clone)]
#[group(id = "probe")]
pub struct Params {
    /// Host name or address to probe
    #[arg(value_name = "HOSTNAME OR ADDRESS")]
    target: String,

    /// Time to Live.
    #[arg(short = 'i', value_name = "TTL", default_value_t = DEFAULT_TTL)]
    ttl: u16,

    /// Send buffer size.
    #[arg(short = 'l', value_name = "BYTES", default_value_t = DEFAULT_PAYLOAD_SIZE)]
    payload_size: usize,

    /// Timeout in milliseconds to wait for each reply.
    #[arg(short = 'w', value_name = "MILLIS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Milliseconds to wait after each attempt before sending the next one.
    #[arg(long = "interval", value_name = "MILLIS", default_value_t = DEFAULT_INTERVAL_MS, env = "PING_INTERVAL_MS")]
    interval_ms: u64,
}

impl Params {
    pub fn to_config(&self) -> Result<ProbeConfig, ConfigError> {
        ProbeConfig::new(
            &self.target,
            self.payload_size,
            Duration::from_millis(self.timeout_ms),
            self.ttl,
            Duration::from_millis(self.interval_ms),
        )
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("target host name or address must not be empty")]
    EmptyTarget,

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },
}

/// Validated, immutable parameters of one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    target: String,
    payload_size: usize,
    timeout: Duration,
    ttl: u16,
    interval: Duration,
}

impl ProbeConfig {
    pub fn new(
        target: &str,
        payload_size: usize,
        timeout: Duration,
        ttl: u16,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(ConfigError::EmptyTarget);
        }
        if timeout.is_zero() {
            return Err(ConfigError::NotPositive { field: "timeout" });
        }
        if interval.is_zero() {
            return Err(ConfigError::NotPositive { field: "interval" });
        }
        if ttl == 0 {
            return Err(ConfigError::NotPositive { field: "TTL" });
        }
        Ok(Self {
            target: target.to_string(),
            payload_size,
            timeout,
            ttl,
            interval,
        })
    }

    pub fn with_defaults(target: &str) -> Result<Self, ConfigError> {
        Self::new(target, DEFAULT_PAYLOAD_SIZE, DEFAULT_TIMEOUT, DEFAULT_TTL, DEFAULT_INTERVAL)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn ttl(&self) -> u16 {
        self.ttl
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;
    use clap::{CommandFactory, Parser};

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[clap(flatten)]
        probe: Params,
    }

    #[test]
    fn defaults() {
        // given
        let cli = TestCli::try_parse_from(["echo-buddy", "203.0.113.1"]).unwrap();
        // when
        let config = cli.probe.to_config().unwrap();
        // then
        assert_that!(config).is_equal_to(ProbeConfig::with_defaults("203.0.113.1").unwrap());
        assert_that!(config.payload_size()).is_equal_to(32);
        assert_that!(config.timeout()).is_equal_to(Duration::from_millis(5000));
        assert_that!(config.ttl()).is_equal_to(256);
        assert_that!(config.interval()).is_equal_to(Duration::from_millis(1000));
    }

    #[test]
    fn help_shows_the_defaults_in_use() {
        // when
        let help = TestCli::command().render_help().to_string();
        // then
        assert_that!(help).contains(format!("[default: {}]", DEFAULT_TIMEOUT.as_millis()));
        assert_that!(help).contains(format!("[default: {}]", DEFAULT_INTERVAL.as_millis()));
    }

    #[test]
    fn short_flags() {
        // given
        let cli = TestCli::try_parse_from([
            "echo-buddy", "-i", "64", "-l", "0", "-w", "250", "--interval", "20", "example.org",
        ]).unwrap();
        // when
        let config = cli.probe.to_config().unwrap();
        // then
        assert_that!(config.target()).is_equal_to("example.org");
        assert_that!(config.ttl()).is_equal_to(64);
        assert_that!(config.payload_size()).is_equal_to(0);
        assert_that!(config.timeout()).is_equal_to(Duration::from_millis(250));
        assert_that!(config.interval()).is_equal_to(Duration::from_millis(20));
    }

    #[test]
    fn missing_target_is_rejected_by_parser() {
        let res = TestCli::try_parse_from(["echo-buddy", "-w", "10"]);

        assert_that!(res.is_err()).is_true();
    }

    #[test]
    fn invalid_values_are_rejected() {
        let ms = Duration::from_millis;

        assert_that!(ProbeConfig::new("  ", 32, ms(1), 1, ms(1)))
            .is_equal_to(Err(ConfigError::EmptyTarget));
        assert_that!(ProbeConfig::new("h", 32, ms(0), 1, ms(1)))
            .is_equal_to(Err(ConfigError::NotPositive { field: "timeout" }));
        assert_that!(ProbeConfig::new("h", 32, ms(1), 1, ms(0)))
            .is_equal_to(Err(ConfigError::NotPositive { field: "interval" }));
        assert_that!(ProbeConfig::new("h", 32, ms(1), 0, ms(1)))
            .is_equal_to(Err(ConfigError::NotPositive { field: "TTL" }));
    }

    #[test]
    fn target_is_trimmed() {
        let config = ProbeConfig::with_defaults(" example.org\n").unwrap();

        assert_that!(config.target()).is_equal_to("example.org");
    }
}
