//! Chunk Buffer
//!
//! Accumulates ordered text fragments for one session. The writer half is
//! [`ChunkBuffer`] and is never cloned, so only the session's producer task
//! can append. Any number of [`BufferReader`]s take snapshots or wait for
//! the next append.

use tokio::sync::watch;

/// Materialized buffer state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferContents {
    /// Concatenation of every fragment, in arrival order
    pub text: String,
    /// Byte offset at which each fragment ends
    pub boundaries: Vec<usize>,
}

impl BufferContents {
    /// The individual fragments, in arrival order
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        let mut start = 0;
        self.boundaries.iter().map(move |&end| {
            let fragment = &self.text[start..end];
            start = end;
            fragment
        })
    }
}

/// Writer half of a chunk buffer
#[derive(Debug)]
pub struct ChunkBuffer {
    tx: watch::Sender<BufferContents>,
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(BufferContents::default());
        Self { tx }
    }

    /// Append a fragment at the tail
    ///
    /// Empty fragments are ignored and do not wake readers.
    pub fn append(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        // send_modify updates the value even with no receivers alive
        self.tx.send_modify(|contents| {
            contents.text.push_str(fragment);
            contents.boundaries.push(contents.text.len());
        });
    }

    /// Current concatenation
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.tx.borrow().text.clone()
    }

    /// New reader positioned at the current contents
    #[must_use]
    pub fn reader(&self) -> BufferReader {
        BufferReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Byte length of the concatenation
    #[must_use]
    pub fn len(&self) -> usize {
        self.tx.borrow().text.len()
    }

    /// Whether nothing has been appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fragments appended
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.tx.borrow().boundaries.len()
    }
}

/// Read half of a chunk buffer
///
/// Readers stay valid after the writer is dropped and keep returning the
/// final contents.
#[derive(Clone, Debug)]
pub struct BufferReader {
    rx: watch::Receiver<BufferContents>,
}

impl BufferReader {
    /// Current concatenation; always a whole-fragment prefix of the stream
    #[must_use]
    pub fn snapshot(&self) -> String {
        self.rx.borrow().text.clone()
    }

    /// Full contents including fragment boundaries
    #[must_use]
    pub fn contents(&self) -> BufferContents {
        self.rx.borrow().clone()
    }

    /// Byte length of the concatenation
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.borrow().text.len()
    }

    /// Whether nothing has been appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of fragments appended
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.rx.borrow().boundaries.len()
    }

    /// Wait for the next append
    ///
    /// Returns `false` once the writer is gone and no unseen append remains.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
