//! Provides an immutable view on a cached value.
//!
//! Values are shared between the cache, concurrent callers waiting for the same load and the
//! caller itself. Therefore a [ByteView] is backed by [Bytes](bytes::Bytes): cloning a view is
//! cheap (a reference count is incremented) and there is no way to obtain a mutable reference
//! into the underlying storage. Callers which need to own the data get a copy via
//! [ByteView::byte_slice].
use std::borrow::Cow;
use std::fmt;
use std::fmt::Display;

use bytes::Bytes;

use crate::cache::ByteSize;

/// Represents an immutable snapshot of a cached value.
///
/// # Examples
/// ```
/// # use shardcache::byteview::ByteView;
/// let view = ByteView::from("Hello");
/// assert_eq!(view.len(), 5);
/// assert_eq!(view.as_str(), "Hello");
///
/// // Modifying the copy doesn't affect the view itself...
/// let mut copy = view.byte_slice();
/// copy[0] = b'J';
/// assert_eq!(view.to_string(), "Hello");
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteView {
    data: Bytes,
}

impl ByteView {
    /// Creates a view by copying the given bytes.
    ///
    /// Use this for data handed in by a caller (e.g. a **Getter**), which might still hold on
    /// to its buffer.
    pub fn copy_from(data: &[u8]) -> Self {
        ByteView {
            data: Bytes::copy_from_slice(data),
        }
    }

    /// Returns the number of bytes in this view.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Determines if the view is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns a copy of the underlying data.
    pub fn byte_slice(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// Returns the contents as string.
    ///
    /// Invalid UTF-8 sequences are replaced by **U+FFFD**.
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        ByteView {
            data: Bytes::from(data),
        }
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        ByteView::copy_from(data.as_bytes())
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        ByteView::from(data.into_bytes())
    }
}

impl ByteSize for ByteView {
    fn allocated_size(&self) -> usize {
        self.data.len()
    }
}

impl Display for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ByteView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteView({:?})", self.as_str())
    }
}
