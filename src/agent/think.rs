//! Splits `<tag>...</tag>` reasoning spans out of a streamed text channel.
//! Tags may arrive split across deltas, so a partial tag is held back until
//! the next delta decides it.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Reasoning(String),
}

#[derive(Debug)]
pub struct ThinkTagSplitter {
    open: String,
    close: String,
    pending: String,
    in_reasoning: bool,
}

impl ThinkTagSplitter {
    pub fn new(tag: &str) -> Self {
        Self {
            open: format!("<{}>", tag),
            close: format!("</{}>", tag),
            pending: String::new(),
            in_reasoning: false,
        }
    }

    pub fn feed(&mut self, delta: &str) -> Vec<Segment> {
        self.pending.push_str(delta);
        let mut out = Vec::new();

        loop {
            let tag = if self.in_reasoning {
                &self.close
            } else {
                &self.open
            };

            if let Some(pos) = self.pending.find(tag.as_str()) {
                let before: String = self.pending[..pos].to_string();
                let tag_len = tag.len();
                self.emit(&mut out, before);
                self.pending.drain(..pos + tag_len);
                self.in_reasoning = !self.in_reasoning;
                continue;
            }

            let keep = partial_suffix(&self.pending, tag);
            let split = self.pending.len() - keep;
            let ready: String = self.pending.drain(..split).collect();
            self.emit(&mut out, ready);
            break;
        }

        out
    }

    /// Releases whatever is still held back, including an unterminated span.
    pub fn finish(&mut self) -> Vec<Segment> {
        let mut out = Vec::new();
        let rest = std::mem::take(&mut self.pending);
        self.emit(&mut out, rest);
        out
    }

    fn emit(&self, out: &mut Vec<Segment>, text: String) {
        if text.is_empty() {
            return;
        }
        out.push(if self.in_reasoning {
            Segment::Reasoning(text)
        } else {
            Segment::Text(text)
        });
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}
