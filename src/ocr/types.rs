//! Structured OCR output shared between pipeline stages.
//!
//! Mirrors the wire shape the OCR service emits: a document-level text
//! body plus per-page layout anchors that reference byte ranges of that
//! body. The intermediate object persisted between the two pipeline
//! stages is exactly this structure, serialized as JSON.

use serde::{Deserialize, Serialize};

/// One OCR-processed document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrDocument {
    /// Full extracted text of the document.
    #[serde(default)]
    pub text: String,
    /// Ordered pages. Page order is the chunking and assembly order.
    #[serde(default)]
    pub pages: Vec<OcrPage>,
}

/// One page of OCR output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrPage {
    #[serde(default)]
    pub layout: PageLayout,
}

/// Layout metadata for one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    #[serde(default, rename = "textAnchor")]
    pub text_anchor: TextAnchor,
}

/// Anchor tying a layout element to ranges of the document text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextAnchor {
    #[serde(default, rename = "textSegments")]
    pub text_segments: Vec<TextSegment>,
}

/// Half-open byte range `[start_index, end_index)` into `OcrDocument::text`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSegment {
    #[serde(default, rename = "startIndex")]
    pub start_index: u64,
    #[serde(default, rename = "endIndex")]
    pub end_index: u64,
}

impl OcrDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Extract the text of pages `[start, end)` by resolving each page's
    /// anchor segments against the document text.
    ///
    /// Out-of-range pages are clamped. Segments that do not resolve to a
    /// valid slice of the text are skipped rather than guessed at.
    pub fn page_range_text(&self, start: usize, end: usize) -> String {
        let end = end.min(self.pages.len());
        let start = start.min(end);

        let mut parts = String::new();
        for page in &self.pages[start..end] {
            for segment in &page.layout.text_anchor.text_segments {
                let s = segment.start_index as usize;
                let e = segment.end_index as usize;
                if e <= s {
                    continue;
                }
                if let Some(slice) = self.text.get(s..e) {
                    parts.push_str(slice);
                }
            }
        }
        parts
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build a document whose page `i` holds the text `pieces[i]`,
    /// anchored into one concatenated body.
    pub fn document_from_pages(pieces: &[&str]) -> OcrDocument {
        let mut text = String::new();
        let mut pages = Vec::with_capacity(pieces.len());
        for piece in pieces {
            let start = text.len() as u64;
            text.push_str(piece);
            pages.push(OcrPage {
                layout: PageLayout {
                    text_anchor: TextAnchor {
                        text_segments: vec![TextSegment {
                            start_index: start,
                            end_index: text.len() as u64,
                        }],
                    },
                },
            });
        }
        OcrDocument { text, pages }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::document_from_pages;
    use super::*;

    #[test]
    fn test_page_range_text() {
        let doc = document_from_pages(&["hello", " world"]);
        assert_eq!(doc.page_range_text(0, 1), "hello");
        assert_eq!(doc.page_range_text(1, 2), " world");
        assert_eq!(doc.page_range_text(0, 2), "hello world");
    }

    #[test]
    fn test_page_range_text_clamps() {
        let doc = document_from_pages(&["a", "b"]);
        assert_eq!(doc.page_range_text(0, 99), "ab");
        assert_eq!(doc.page_range_text(5, 99), "");
        assert_eq!(doc.page_range_text(1, 0), "");
    }

    #[test]
    fn test_page_range_text_skips_bad_segments() {
        let mut doc = document_from_pages(&["good"]);
        doc.pages[0]
            .layout
            .text_anchor
            .text_segments
            .push(TextSegment {
                start_index: 100,
                end_index: 200,
            });
        doc.pages[0]
            .layout
            .text_anchor
            .text_segments
            .push(TextSegment {
                start_index: 3,
                end_index: 1,
            });
        assert_eq!(doc.page_range_text(0, 1), "good");
    }

    #[test]
    fn test_wire_format_roundtrip() {
        let raw = br#"{
            "text": "hello world",
            "pages": [
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": 0, "endIndex": 5}]}}},
                {"layout": {"textAnchor": {"textSegments": [{"startIndex": 5, "endIndex": 11}]}}}
            ]
        }"#;
        let doc = OcrDocument::from_json(raw).unwrap();
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.page_range_text(0, 2), "hello world");

        let reparsed = OcrDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn test_empty_document() {
        let doc = OcrDocument::from_json(b"{}").unwrap();
        assert_eq!(doc.page_count(), 0);
        assert_eq!(doc.page_range_text(0, 0), "");
    }
}
