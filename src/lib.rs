pub mod access_log;
pub mod body_multiplexer;
pub mod cluster;
pub mod config;
pub mod connection_counter;
pub mod errors;
pub mod logging;
pub mod metrics_server;
pub mod proxy;
pub mod ring;
pub mod selector;
pub mod shard;
pub mod sync_log;
pub mod timeout_reader;
pub mod transport;
