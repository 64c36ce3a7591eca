use std::io;

/// Types that can be written into a frame.
pub trait Serialize {
    /// Serializes `self` into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The buffer the header part of the frame is written to.
    ///
    /// # Returns
    /// An optional trailing slice that is written right after `buf` without copying it.
    ///
    /// # Errors
    /// Fails if `self` can't be encoded, nothing must be sent then.
    fn serialize<'a>(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
