use std::io;

/// Encodes a message into a frame body.
pub trait Serialize<'a> {
    /// Appends the encoded body of `self` to `buf`.
    ///
    /// # Returns
    /// A borrowed tail belonging to the body, written right after `buf` without a copy.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Decodes a message from a frame body.
pub trait Deserialize<'a>: Sized {
    fn deserialize(body: &'a [u8]) -> io::Result<Self>;
}
