//! Record chunking.
//!
//! Splits long content into overlapping segments along a separator
//! priority (paragraph break, line break, whitespace, hard character
//! cut). Pure and deterministic: re-embedding the same record always
//! yields the same segment sequence, which is what makes the scheduler
//! idempotent. A simpler greedy sentence packer handles imported
//! documents.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Segment;
use crate::store::Record;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Content at or below this length becomes a single segment.
    pub max_segment_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: 1_000,
            overlap_chars: 200,
        }
    }
}

/// Splits a record into 1..N segments carrying the record's metadata plus
/// `chunk_index`, `total_chunks` and `original_record_id`.
pub fn chunk_record(record: &Record, config: &ChunkerConfig) -> Vec<Segment> {
    let pieces = split_text(&record.content, config.max_segment_chars, config.overlap_chars);
    let total = pieces.len();

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let id = if total == 1 {
                record.id.clone()
            } else {
                format!("{}_chunk_{}", record.id, index)
            };
            Segment {
                id,
                content,
                metadata: segment_metadata(record, index, total),
            }
        })
        .collect()
}

fn segment_metadata(record: &Record, index: usize, total: usize) -> Value {
    let mut metadata = match &record.metadata {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({}),
    };
    if let Some(map) = metadata.as_object_mut() {
        map.insert("original_record_id".to_string(), json!(record.id));
        map.insert("chunk_index".to_string(), json!(index));
        map.insert("total_chunks".to_string(), json!(total));
        map.insert("sender".to_string(), json!(record.sender));
        map.insert("channel".to_string(), json!(record.channel));
        map.insert("kind".to_string(), json!(record.kind));
        map.insert("created_at".to_string(), json!(record.created_at));
    }
    metadata
}

/// Overlap-preserving split on a separator priority. Operates on chars so
/// multi-byte text never splits inside a code point. Never drops trailing
/// content and always returns at least one piece.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let max_chars = max_chars.max(2);
    let overlap = overlap.min(max_chars / 2);

    let mut pieces = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let window_end = (start + max_chars).min(chars.len());
        let cut = if window_end == chars.len() {
            window_end
        } else {
            find_break(&chars, start, window_end)
        };

        let piece: String = chars[start..cut].iter().collect();
        let trimmed = piece.trim();
        if !trimmed.is_empty() {
            pieces.push(trimmed.to_string());
        }

        if cut == chars.len() {
            break;
        }
        // Step back by the overlap but always make forward progress.
        start = cut.saturating_sub(overlap).max(start + 1);
    }

    if pieces.is_empty() {
        pieces.push(text.trim().to_string());
    }
    pieces
}

/// Best cut point inside `[start, end)`: prefer the last paragraph break,
/// then the last newline, then the last space, searching only the back
/// half of the window so segments stay reasonably full.
fn find_break(chars: &[char], start: usize, end: usize) -> usize {
    let floor = start + (end - start) / 2;

    let mut i = end;
    while i > floor + 1 {
        if chars[i - 1] == '\n' && chars[i - 2] == '\n' {
            return i;
        }
        i -= 1;
    }

    let mut i = end;
    while i > floor {
        if chars[i - 1] == '\n' {
            return i;
        }
        i -= 1;
    }

    let mut i = end;
    while i > floor {
        if chars[i - 1] == ' ' {
            return i;
        }
        i -= 1;
    }

    end
}

/// A titled part of an imported document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPart {
    pub title: String,
    pub content: String,
}

/// Greedy sentence packer for imported documents. Packs whole sentences
/// up to `max_chars`, falling back to word and then hard splits for
/// oversized sentences. Multi-part documents get numbered title suffixes.
pub fn pack_document(title: &str, text: &str, max_chars: usize) -> Vec<DocumentPart> {
    let max_chars = max_chars.max(1);
    let sentences = split_sentences(text);

    let mut contents: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        let unit_len = sentence.chars().count();
        if unit_len > max_chars {
            if !current.trim().is_empty() {
                contents.push(current.trim().to_string());
                current.clear();
            }
            for piece in split_oversized(&sentence, max_chars) {
                contents.push(piece);
            }
            continue;
        }

        if current.chars().count() + unit_len > max_chars && !current.trim().is_empty() {
            contents.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(&sentence);
    }
    if !current.trim().is_empty() {
        contents.push(current.trim().to_string());
    }
    if contents.is_empty() {
        contents.push(String::new());
    }

    let total = contents.len();
    contents
        .into_iter()
        .enumerate()
        .map(|(index, content)| DocumentPart {
            title: if total == 1 {
                title.to_string()
            } else {
                format!("{} (part {})", title, index + 1)
            },
            content,
        })
        .collect()
}

/// Sentence-ish units: split after terminal punctuation + space, or at
/// line breaks, keeping the delimiter with the preceding unit.
fn split_sentences(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '\n' => true,
            '.' | '!' | '?' => matches!(chars.peek(), Some(' ') | Some('\n') | None),
            _ => false,
        };
        if boundary {
            units.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        units.push(current);
    }
    units
}

fn split_oversized(sentence: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_inclusive(' ') {
        if word.chars().count() > max_chars {
            if !current.trim().is_empty() {
                pieces.push(current.trim().to_string());
                current.clear();
            }
            // A single word longer than the limit gets hard-cut.
            let chars: Vec<char> = word.chars().collect();
            for hard in chars.chunks(max_chars) {
                let piece: String = hard.iter().collect();
                let piece = piece.trim().to_string();
                if !piece.is_empty() {
                    pieces.push(piece);
                }
            }
            continue;
        }
        if current.chars().count() + word.chars().count() > max_chars
            && !current.trim().is_empty()
        {
            pieces.push(current.trim().to_string());
            current.clear();
        }
        current.push_str(word);
    }
    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }
    pieces
}
