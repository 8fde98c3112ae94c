pub mod context;
pub mod effects;
pub mod event_bridge;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;
