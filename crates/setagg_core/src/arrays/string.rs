use std::fmt;

use setagg_error::Result;

/// Max length of bytes that can be stored inline in a view.
pub const MAX_INLINE_LEN: usize = 12;

/// A view of variable length data.
///
/// Small values (<= 12 bytes) are stored entirely within the view. Larger
/// values store a prefix along with an offset into some separate byte heap
/// which holds the full value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum StringView {
    Inline {
        len: u8,
        inline: [u8; MAX_INLINE_LEN],
    },
    Heap {
        len: u32,
        prefix: [u8; 4],
        offset: u32,
    },
}

impl StringView {
    pub const EMPTY: StringView = StringView::Inline {
        len: 0,
        inline: [0; MAX_INLINE_LEN],
    };

    /// Try to create an inline view for the given bytes.
    ///
    /// Returns None if the bytes are too large to inline.
    pub fn try_new_inline(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_INLINE_LEN {
            return None;
        }
        let mut inline = [0; MAX_INLINE_LEN];
        inline[..bytes.len()].copy_from_slice(bytes);
        Some(StringView::Inline {
            len: bytes.len() as u8,
            inline,
        })
    }

    /// Create a view pointing to bytes that have been written to a heap at the
    /// given offset.
    ///
    /// `bytes` should be a copy of what was written, and is used to populate
    /// the prefix. Errors if the length or offset don't fit in a view.
    pub fn try_new_heap(bytes: &[u8], offset: usize) -> Result<Self> {
        debug_assert!(bytes.len() > MAX_INLINE_LEN);
        let mut prefix = [0; 4];
        prefix.copy_from_slice(&bytes[..4]);
        Ok(StringView::Heap {
            len: u32::try_from(bytes.len())?,
            prefix,
            offset: u32::try_from(offset)?,
        })
    }

    pub const fn len(&self) -> usize {
        match self {
            StringView::Inline { len, .. } => *len as usize,
            StringView::Heap { len, .. } => *len as usize,
        }
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn is_inline(&self) -> bool {
        matches!(self, StringView::Inline { .. })
    }

    /// Get the bytes for this view, resolving heap values against `heap`.
    ///
    /// Returns None if the heap doesn't contain the referenced range.
    pub fn get_bytes<'a>(&'a self, heap: &'a [u8]) -> Option<&'a [u8]> {
        match self {
            StringView::Inline { len, inline } => Some(&inline[..(*len as usize)]),
            StringView::Heap { len, offset, .. } => {
                let start = *offset as usize;
                heap.get(start..(start + *len as usize))
            }
        }
    }
}

impl Default for StringView {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for StringView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringView::Inline { len, inline } => f
                .debug_struct("Inline")
                .field("len", len)
                .field("inline", &&inline[..(*len as usize)])
                .finish(),
            StringView::Heap {
                len,
                prefix,
                offset,
            } => f
                .debug_struct("Heap")
                .field("len", len)
                .field("prefix", prefix)
                .field("offset", offset)
                .finish(),
        }
    }
}

/// Views plus the heap holding non-inline data for a string array.
#[derive(Debug, Clone, Default)]
pub struct StringBuffer {
    pub(crate) views: Vec<StringView>,
    pub(crate) heap: Vec<u8>,
}

impl StringBuffer {
    pub fn with_len(len: usize) -> Self {
        StringBuffer {
            views: vec![StringView::EMPTY; len],
            heap: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        self.views.get(idx)?.get_bytes(&self.heap)
    }

    /// Put bytes at the given index.
    ///
    /// Panics if index is out of bounds.
    pub fn put(&mut self, idx: usize, bytes: &[u8]) -> Result<()> {
        let view = self.push_heap_or_inline(bytes)?;
        self.views[idx] = view;
        Ok(())
    }

    fn push_heap_or_inline(&mut self, bytes: &[u8]) -> Result<StringView> {
        match StringView::try_new_inline(bytes) {
            Some(view) => Ok(view),
            None => {
                let view = StringView::try_new_heap(bytes, self.heap.len())?;
                self.heap.extend_from_slice(bytes);
                Ok(view)
            }
        }
    }

    /// Reserve exactly `len` bytes for the value at `idx` and hand the writable
    /// buffer to `write_fn`.
    ///
    /// Large values are written directly into the heap. Panics if index is out
    /// of bounds.
    pub fn write_with<F>(&mut self, idx: usize, len: usize, write_fn: F) -> Result<()>
    where
        F: FnOnce(&mut [u8]) -> Result<()>,
    {
        if len <= MAX_INLINE_LEN {
            let mut inline = [0; MAX_INLINE_LEN];
            write_fn(&mut inline[..len])?;
            self.views[idx] = StringView::Inline {
                len: len as u8,
                inline,
            };
            return Ok(());
        }

        let offset = self.heap.len();
        let view_len = u32::try_from(len)?;
        let view_offset = u32::try_from(offset)?;

        self.heap.resize(offset + len, 0);
        if let Err(e) = write_fn(&mut self.heap[offset..]) {
            self.heap.truncate(offset);
            return Err(e);
        }

        let mut prefix = [0; 4];
        prefix.copy_from_slice(&self.heap[offset..(offset + 4)]);
        self.views[idx] = StringView::Heap {
            len: view_len,
            prefix,
            offset: view_offset,
        };

        Ok(())
    }
}
