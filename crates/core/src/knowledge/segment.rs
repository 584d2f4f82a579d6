/// Default upper bound, in characters, for one imported knowledge segment.
pub const DEFAULT_SEGMENT_CHAR_LIMIT: usize = 500;

const SENTENCE_ENDINGS: [char; 9] = ['.', '!', '?', '。', '！', '？', ';', '；', '…'];

/// Splits free text into segments of at most `max_chars` characters.
///
/// Sentences (ASCII or full-width terminal punctuation) are packed greedily
/// into segments; text without any sentence punctuation is split by line,
/// and anything still too long is cut at the character limit. Segments are
/// trimmed and never empty.
pub fn split_text_segments(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let units = if text.contains(&SENTENCE_ENDINGS[..]) {
        sentences(text)
    } else {
        text.lines().map(str::to_string).collect()
    };

    let mut packer = Packer::new(max_chars);
    for unit in units {
        packer.push(unit.trim());
    }
    packer.finish()
}

fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if SENTENCE_ENDINGS.contains(&ch) {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

struct Packer {
    max_chars: usize,
    segments: Vec<String>,
    current: String,
    current_len: usize,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            segments: Vec::new(),
            current: String::new(),
            current_len: 0,
        }
    }

    fn push(&mut self, unit: &str) {
        if unit.is_empty() {
            return;
        }
        let unit_len = unit.chars().count();
        if unit_len > self.max_chars {
            self.flush();
            self.push_hard_split(unit);
            return;
        }

        let separator = usize::from(self.current_len > 0);
        if self.current_len + separator + unit_len > self.max_chars {
            self.flush();
        }
        if self.current_len > 0 {
            self.current.push(' ');
            self.current_len += 1;
        }
        self.current.push_str(unit);
        self.current_len += unit_len;
    }

    fn push_hard_split(&mut self, unit: &str) {
        let chars: Vec<char> = unit.chars().collect();
        for chunk in chars.chunks(self.max_chars) {
            let piece: String = chunk.iter().collect();
            let piece = piece.trim();
            if !piece.is_empty() {
                self.segments.push(piece.to_string());
            }
        }
    }

    fn flush(&mut self) {
        let trimmed = self.current.trim();
        if !trimmed.is_empty() {
            self.segments.push(trimmed.to_string());
        }
        self.current.clear();
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.segments
    }
}
