//! Tracing subscriber setup. Controlled via `RUST_LOG`, the way every binary in the wider
//! codebase wires up logging — simplified from `dekaf::logging::install` since this proxy
//! has no per-session log-forwarding journal to multiplex onto.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub fn install() {
    let fmt_layer = tracing_subscriber::fmt::Layer::default()
        .with_writer(std::io::stderr)
        .with_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        );

    tracing_subscriber::registry().with(fmt_layer).init();
}
