#[path = "clients/collector.v1.rs"]
#[rustfmt::skip]
pub mod collector;
