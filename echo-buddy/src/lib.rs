pub mod echo_call;
pub mod log_subscriber;
pub mod model;
pub mod probe_config;
pub mod probe_loop;
