//! Page chunking for bounded generative-model calls.
//!
//! Chunking is a pure function of (page count, max pages), so a retried
//! event always recomputes exactly the same partition.

/// A contiguous half-open page range `[start, end)` of one OCR document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageChunk {
    /// Position of this chunk in the partition, 0-based.
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

impl PageChunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Partition `total_pages` pages into chunks of at most `max_pages`.
///
/// Pages are assigned in strict index order; the last chunk may be
/// shorter. Zero pages yields an empty partition. `max_pages` is clamped
/// to at least one page per chunk.
pub fn split_pages(total_pages: usize, max_pages: usize) -> Vec<PageChunk> {
    let max_pages = max_pages.max(1);
    let mut chunks = Vec::with_capacity(total_pages.div_ceil(max_pages));
    let mut start = 0;
    while start < total_pages {
        let end = (start + max_pages).min(total_pages);
        chunks.push(PageChunk {
            index: chunks.len(),
            start,
            end,
        });
        start = end;
    }
    chunks
}
