#[path = "servers/collector.v1.rs"]
#[rustfmt::skip]
pub mod collector;
