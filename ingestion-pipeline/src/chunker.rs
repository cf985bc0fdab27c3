use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on chunk size before a section is windowed.
const MAX_CHUNK_WORDS: usize = 250;
/// Words repeated between consecutive windows of an oversized section.
const OVERLAP_WORDS: usize = 50;

static HEADING_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(CHAPTER\s+[IVXLCDM\d]+[^\n]*|Article\s+\d+[A-Z]?\b[^\n]*|Section\s+\d+[A-Z]?\b[^\n]*)\s*$")
        .unwrap_or_else(|_| unreachable!())
});

/// A chunk of document text, still unnumbered. The caller assigns indices
/// and identity.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPiece {
    pub content: String,
    pub parent_section: Option<String>,
}

struct Segment {
    heading: Option<String>,
    body: String,
}

fn split_into_sections(text: &str) -> Vec<Segment> {
    let mut boundaries: Vec<(usize, usize, String)> = HEADING_PATTERN
        .find_iter(text)
        .map(|m| (m.start(), m.end(), m.as_str().trim().to_string()))
        .collect();
    boundaries.sort_by_key(|(start, _, _)| *start);

    let mut segments = Vec::new();
    let preamble_end = boundaries.first().map_or(text.len(), |(start, _, _)| *start);
    let preamble = text[..preamble_end].trim();
    if !preamble.is_empty() {
        segments.push(Segment {
            heading: None,
            body: preamble.to_string(),
        });
    }

    for (index, (_, heading_end, heading)) in boundaries.iter().enumerate() {
        let body_end = boundaries
            .get(index + 1)
            .map_or(text.len(), |(next_start, _, _)| *next_start);
        let body = text[*heading_end..body_end].trim();
        if body.is_empty() {
            continue;
        }
        segments.push(Segment {
            heading: Some(heading.clone()),
            body: body.to_string(),
        });
    }

    segments
}

fn window_words(body: &str) -> Vec<String> {
    let words: Vec<&str> = body.split_whitespace().collect();
    if words.len() <= MAX_CHUNK_WORDS {
        return vec![words.join(" ")];
    }

    let step = MAX_CHUNK_WORDS - OVERLAP_WORDS;
    let mut windows = Vec::new();
    let mut start = 0usize;
    while start < words.len() {
        let end = (start + MAX_CHUNK_WORDS).min(words.len());
        windows.push(words[start..end].join(" "));
        if end == words.len() {
            break;
        }
        start += step;
    }
    windows
}

/// Split a legal document into chunks that respect its structure: CHAPTER,
/// Article and Section headings open new chunks, and oversized sections are
/// windowed with a fixed word overlap so no boundary loses context.
pub fn chunk_document(text: &str) -> Vec<ChunkPiece> {
    let mut pieces = Vec::new();
    for segment in split_into_sections(text) {
        for window in window_words(&segment.body) {
            let content = match &segment.heading {
                Some(heading) => format!("{heading}\n{window}"),
                None => window,
            };
            pieces.push(ChunkPiece {
                content,
                parent_section: segment.heading.clone(),
            });
        }
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headings_open_new_chunks() {
        let text = "Preamble text about the code.\n\
                    Section 302\n\
                    Punishment for murder: death or imprisonment for life.\n\
                    Section 304\n\
                    Punishment for culpable homicide not amounting to murder.";
        let pieces = chunk_document(text);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].parent_section, None);
        assert_eq!(pieces[1].parent_section.as_deref(), Some("Section 302"));
        assert!(pieces[1].content.contains("Punishment for murder"));
        assert_eq!(pieces[2].parent_section.as_deref(), Some("Section 304"));
    }

    #[test]
    fn oversized_sections_are_windowed_with_overlap() {
        let body: String = (0..600).map(|i| format!("word{i} ")).collect();
        let text = format!("Article 21\n{body}");
        let pieces = chunk_document(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert_eq!(piece.parent_section.as_deref(), Some("Article 21"));
        }

        // the tail of one window reappears at the head of the next
        let first_words: Vec<&str> = pieces[0].content.split_whitespace().collect();
        let second_words: Vec<&str> = pieces[1].content.split_whitespace().collect();
        let first_tail = &first_words[first_words.len() - OVERLAP_WORDS..];
        // skip the repeated heading line on the second window
        let second_head = &second_words[2..2 + OVERLAP_WORDS];
        assert_eq!(first_tail, second_head);
    }

    #[test]
    fn chapter_headings_are_recognized() {
        let text = "CHAPTER XVI OF OFFENCES AFFECTING THE HUMAN BODY\n\
                    These offences concern bodily harm.";
        let pieces = chunk_document(text);
        assert_eq!(pieces.len(), 1);
        assert!(pieces[0]
            .parent_section
            .as_deref()
            .is_some_and(|heading| heading.starts_with("CHAPTER XVI")));
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_document("   \n  ").is_empty());
    }
}
