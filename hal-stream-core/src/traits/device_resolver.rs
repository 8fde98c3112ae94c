use std::collections::BTreeSet;

use crate::models::device::{DeviceId, LogicalDevice};

/// Maps framework devices onto engine device identifiers.
///
/// Must return exactly one id per requested device; a shorter or longer
/// answer is treated as a fatal routing error by the caller.
pub trait DeviceResolver: Send + Sync {
    fn resolve_device_ids(&self, devices: &BTreeSet<LogicalDevice>) -> Vec<DeviceId>;
}
