//! Structured logging setup (SPEC_FULL §2). Every log line in the crate
//! goes through `tracing::{info,warn,error,debug}` — never `println!`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().compact();
    tracing_subscriber::Registry::default().with(env_filter).with(fmt_layer).init();
}
