use std::{fmt, io};

/// A seekable byte source usable as container input.
pub trait Reader: io::Read + io::Seek + fmt::Debug {}
impl<T: io::Read + io::Seek + ?Sized + fmt::Debug> Reader for T {}
