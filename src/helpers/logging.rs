use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use flexi_logger::{colored_default_format, detailed_format, Logger, LoggerHandle, WriteMode};
use log::Level;

#[derive(Args, Debug)]
#[group(id = "bootstrap")]
pub struct Params {
    #[clap(flatten)]
    verbose: Verbosity<InfoLevel>,

    /// Use a flexi_logger configuration file instead of -v/-q
    #[arg(long = "log-spec")]
    use_log_spec: bool,

    /// Path to log spec
    #[arg(long, value_name = "TOML FILE", default_value = "logspec.toml", env = "LOG_SPEC_FILE")]
    log_spec_file: PathBuf,
}

impl Params {
    /// `RUST_LOG` wins over this, see [Logger::try_with_env_or_str].
    fn level_spec(&self) -> String {
        // log_level() returns None iff verbosity < 0, i.e. being most quiet seems reasonable
        self.verbose.log_level().unwrap_or(Level::Error).to_string()
    }
}

/// Starts the global logger on stderr; stdout belongs to the probe results.
pub fn configure_from(params: &Params) -> Result<LoggerHandle> {
    let log_builder = Logger::try_with_env_or_str(params.level_spec())
        .context("Failed to parse logger spec from env RUST_LOG or cli level")?
        .log_to_stderr()
        // Direct, so that diagnostics interleave with result lines in the order they happened
        .write_mode(WriteMode::Direct)
        .format_for_stderr(colored_default_format)
        .format_for_files(detailed_format);

    if params.use_log_spec {
        log_builder
            .start_with_specfile(&params.log_spec_file)
            .with_context(|| format!("Failed to start logger with specfile {:?}", params.log_spec_file))
    } else {
        log_builder
            .start()
            .context("Failed to start logger handle w/o specfile")
    }
}
