//! The logical stream a client transmits.
//!
//! Offsets on the wire count characters of the text, which is what existing
//! peers count.  For ASCII text that is the same as bytes and slicing is
//! direct; otherwise a table of character boundaries is built once.

use std::path::Path;

use crate::packet::SeqRange;

#[derive(Debug, Clone)]
pub struct StreamSource {
    text: String,
    /// Byte index of every character boundary, plus `text.len()`.
    /// `None` when the text is ASCII.
    boundaries: Option<Vec<usize>>,
}

impl StreamSource {
    pub fn new(text: String) -> Self {
        let boundaries = if text.is_ascii() {
            None
        } else {
            Some(
                text.char_indices()
                    .map(|(i, _)| i)
                    .chain(std::iter::once(text.len()))
                    .collect(),
            )
        };
        Self { text, boundaries }
    }

    /// Read a whole file as the stream.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(Self::new(text))
    }

    /// Length of the stream in offset units.
    pub fn len(&self) -> u64 {
        match &self.boundaries {
            None => self.text.len() as u64,
            Some(b) => (b.len() - 1) as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Text covered by `range`, or `None` if it reaches past the end.
    pub fn slice(&self, range: SeqRange) -> Option<&str> {
        if range.start > range.end || range.end > self.len() {
            return None;
        }
        let (start, end) = match &self.boundaries {
            None => (range.start as usize, range.end as usize),
            Some(b) => (b[range.start as usize], b[range.end as usize]),
        };
        self.text.get(start..end)
    }
}
