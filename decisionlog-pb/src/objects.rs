#[path = "objects/decision.v1.rs"]
#[rustfmt::skip]
pub mod decision;
