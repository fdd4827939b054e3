/// Walks an explicit list of delays and then holds the last one.
pub mod stepped;
