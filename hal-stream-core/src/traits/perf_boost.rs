/// Process-wide CPU performance boost.
///
/// Reference counted by the implementor; both calls must be idempotent,
/// safe from several sessions at once and must not block.
pub trait PerformanceBoost: Send + Sync {
    fn acquire(&self);

    fn release(&self);
}
