//! Text segmentation: unbounded text → bounded, speakable chunks.
//!
//! Sentences end at `.`, `!`, `?` or `…` followed by whitespace. Consecutive
//! sentences are packed greedily up to `max_len` characters; a sentence that
//! alone exceeds the limit is cut into fixed-size slices.

/// Default upper bound on chunk length, in characters.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 180;

const SENTENCE_END: [char; 4] = ['.', '!', '?', '…'];

/// Split `text` into ordered chunks of at most `max_len` characters.
///
/// Whitespace-only input yields no chunks. A `max_len` of zero is treated
/// as one.
pub fn segment(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let normalized = normalize_whitespace(text);

    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_len = 0;

    for sentence in split_sentences(&normalized) {
        let len = sentence.chars().count();
        let joined = if buf.is_empty() { len } else { buf_len + 1 + len };

        if joined <= max_len {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(sentence);
            buf_len = joined;
            continue;
        }

        if !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
        }
        buf_len = 0;

        if len > max_len {
            chunks.extend(hard_split(sentence, max_len));
        } else {
            buf.push_str(sentence);
            buf_len = len;
        }
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }

    chunks
}

/// Collapse every whitespace run to one space and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into sentences, keeping the terminator attached.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let at_boundary = SENTENCE_END.contains(&c)
            && chars.peek().is_some_and(|&(_, next)| next.is_whitespace());
        if at_boundary {
            let end = i + c.len_utf8();
            let s = text[start..end].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = end;
        }
    }

    // Remainder
    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }

    sentences
}

/// Cut an oversized sentence into `max_len`-character slices, ignoring word
/// boundaries.
fn hard_split(sentence: &str, max_len: usize) -> Vec<String> {
    let chars: Vec<char> = sentence.chars().collect();
    chars
        .chunks(max_len)
        .map(|slice| slice.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
