use crate::Result;

/// The compute device a worker runs its model on.
///
/// Device work may run asynchronously to the host, `synchronize` waits for it to drain.
pub trait Device {
    fn name(&self) -> &str;

    /// Fails if the device can't be used by this worker.
    fn ensure_available(&self) -> Result<()> {
        Ok(())
    }

    /// Moves `batch` to the device.
    fn stage<B>(&self, batch: B) -> Result<B> {
        Ok(batch)
    }

    /// Blocks until every queued device operation finished.
    fn synchronize(&self) -> Result<()> {
        Ok(())
    }

    /// Peak memory allocated on the device in bytes, `None` if it isn't tracked.
    fn max_memory_allocated(&self) -> Option<u64> {
        None
    }
}

/// The host itself, always available and always synchronous.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cpu;

impl Device for Cpu {
    fn name(&self) -> &str {
        "cpu"
    }
}
