use std::io;

/// Types that can be rebuilt from the body of a frame.
pub trait Deserialize: Sized {
    fn deserialize(buf: &[u8]) -> io::Result<Self>;
}
