pub mod helpers;
pub mod pubsub;
