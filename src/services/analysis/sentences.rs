//! Streaming Sentence Splitter
//!
//! Scans a JSON document as it streams in and yields complete sentences found
//! inside string values, tagged with the top-level key they belong to. Keys,
//! numbers and anything before the first `{` are ignored. The scanner is
//! best-effort: it never rejects input, it only stops finding sentences.

/// Shortest text emitted as a sentence.
const MIN_SENTENCE_CHARS: usize = 8;

/// A sentence and the top-level section it was found in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub content: String,
    pub section: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object { expect_key: bool },
    Array,
}

#[derive(Debug, Default)]
pub struct SentenceSplitter {
    stack: Vec<Container>,
    started: bool,
    finished: bool,
    in_string: bool,
    string_is_key: bool,
    escape: Option<Escape>,
    key_buf: String,
    sentence_buf: String,
    pending_boundary: bool,
    section: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Escape {
    Start,
    Unicode(String),
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next text increment; returns sentences completed by it.
    pub fn feed(&mut self, chunk: &str) -> Vec<Sentence> {
        let mut out = Vec::new();
        for c in chunk.chars() {
            self.step(c, &mut out);
        }
        out
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Vec<Sentence> {
        let mut out = Vec::new();
        self.flush(&mut out);
        out
    }

    fn step(&mut self, c: char, out: &mut Vec<Sentence>) {
        if self.finished {
            return;
        }
        if !self.started {
            if c == '{' {
                self.started = true;
                self.stack.push(Container::Object { expect_key: true });
            }
            return;
        }
        if self.in_string {
            self.string_char(c, out);
            return;
        }

        match c {
            '"' => {
                self.in_string = true;
                self.string_is_key = matches!(
                    self.stack.last(),
                    Some(Container::Object { expect_key: true })
                );
                if self.string_is_key {
                    self.key_buf.clear();
                }
            }
            '{' => self.stack.push(Container::Object { expect_key: true }),
            '[' => self.stack.push(Container::Array),
            '}' | ']' => {
                self.stack.pop();
                if self.stack.is_empty() {
                    self.finished = true;
                }
            }
            ':' => self.set_expect_key(false),
            ',' => self.set_expect_key(true),
            _ => {}
        }
    }

    fn set_expect_key(&mut self, value: bool) {
        if let Some(Container::Object { expect_key }) = self.stack.last_mut() {
            *expect_key = value;
        }
    }

    fn string_char(&mut self, c: char, out: &mut Vec<Sentence>) {
        match self.escape.take() {
            Some(Escape::Start) => {
                match c {
                    'n' | 't' | 'r' => self.push_text(' ', out),
                    'u' => self.escape = Some(Escape::Unicode(String::new())),
                    'b' | 'f' => {}
                    other => self.push_text(other, out),
                }
                return;
            }
            Some(Escape::Unicode(mut hex)) => {
                hex.push(c);
                if hex.len() < 4 {
                    self.escape = Some(Escape::Unicode(hex));
                } else if let Some(decoded) =
                    u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                {
                    self.push_text(decoded, out);
                }
                return;
            }
            None => {}
        }

        match c {
            '\\' => self.escape = Some(Escape::Start),
            '"' => {
                self.in_string = false;
                if self.string_is_key {
                    if self.stack.len() == 1 {
                        self.section = std::mem::take(&mut self.key_buf);
                    }
                } else {
                    self.flush(out);
                }
            }
            other => self.push_text(other, out),
        }
    }

    fn push_text(&mut self, c: char, out: &mut Vec<Sentence>) {
        if self.string_is_key {
            self.key_buf.push(c);
            return;
        }
        if self.pending_boundary {
            self.pending_boundary = false;
            if c.is_whitespace() {
                self.flush(out);
                return;
            }
        }
        self.sentence_buf.push(c);
        if matches!(c, '.' | '!' | '?') {
            self.pending_boundary = true;
        } else if matches!(c, '。' | '！' | '？') {
            self.flush(out);
        }
    }

    fn flush(&mut self, out: &mut Vec<Sentence>) {
        self.pending_boundary = false;
        let text = self.sentence_buf.trim();
        if text.chars().count() >= MIN_SENTENCE_CHARS && text.chars().any(char::is_alphabetic) {
            out.push(Sentence {
                content: text.to_string(),
                section: self.section.clone(),
            });
        }
        self.sentence_buf.clear();
    }
}
