//! Splits a source byte stream into MSS-sized payload chunks.
//!
//! Every chunk except possibly the last is exactly `mss` bytes.  An empty
//! source still yields one (empty) chunk so that a final packet can carry
//! the end-of-stream signal.
//!
//! The segmenter is stateless: [`Segmenter::chunks`] can be called any number
//! of times and [`Segmenter::chunk`] gives random access by index, which the
//! sender uses to rebuild packets without copying the whole file up front.

use std::sync::Arc;

/// Source stream plus the segment size.
#[derive(Debug, Clone)]
pub struct Segmenter {
    source: Arc<[u8]>,
    mss: usize,
}

impl Segmenter {
    /// # Panics
    ///
    /// Panics if `mss` is zero.  Callers validate the MSS through
    /// [`crate::config::SessionConfig::validate`] first.
    pub fn new(source: impl Into<Arc<[u8]>>, mss: usize) -> Self {
        assert!(mss >= 1, "mss must be at least 1");
        Self {
            source: source.into(),
            mss,
        }
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    /// Total number of chunks: `ceil(len / mss)`, and one for an empty source.
    pub fn chunk_count(&self) -> usize {
        self.source.len().div_ceil(self.mss).max(1)
    }

    /// The chunk at `index`, or `None` past the end.
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.mss;
        let end = (start + self.mss).min(self.source.len());
        Some(&self.source[start..end])
    }

    /// Lazily iterate over all chunks in order.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks {
            segmenter: self,
            next: 0,
        }
    }
}

/// Iterator returned by [`Segmenter::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    segmenter: &'a Segmenter,
    next: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.segmenter.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.segmenter.chunk_count().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks<'_> {}
