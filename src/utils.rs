/// Splits text into word chunks: a run of non-whitespace followed by the
/// whitespace after it. A trailing word without whitespace is its own chunk.
pub fn word_chunks(text: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut in_space = false;
    let mut seen_word = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else {
            if in_space && seen_word {
                chunks.push(&text[start..i]);
                start = i;
            }
            in_space = false;
            seen_word = true;
        }
    }

    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

/// Buffers streamed deltas and releases them on word boundaries.
#[derive(Debug, Default)]
pub struct WordSmoother {
    buffer: String,
}

impl WordSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every complete word chunk now available.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let Some(cut) = last_word_boundary(&self.buffer) else {
            return Vec::new();
        };

        let ready: String = self.buffer.drain(..cut).collect();
        word_chunks(&ready).into_iter().map(str::to_string).collect()
    }

    /// Releases whatever is left, complete word or not.
    pub fn flush(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Start of the last word. Everything before it is made of complete word
/// chunks; the last word may still grow or gain more whitespace.
fn last_word_boundary(text: &str) -> Option<usize> {
    let trimmed = text.trim_end();
    let word_start = trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())?;
    text[..word_start]
        .chars()
        .any(|c| !c.is_whitespace())
        .then_some(word_start)
}
