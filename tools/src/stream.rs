//! Incremental decoding of subprocess output.

/// Bytes inspected before deciding whether a stream is binary.
pub const SNIFF_LIMIT: usize = 4096;

/// Stateful UTF-8 decoder that never splits a multi-byte character across
/// reads. Invalid sequences decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next chunk, holding back an incomplete trailing character.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid` is a verified UTF-8 prefix, so nothing is substituted here.
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let keep = rest.len();
        let drain_to = self.pending.len() - keep;
        self.pending.drain(..drain_to);
        out
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// Longest trailing escape sequence held back waiting for its terminator.
const MAX_HELD_ESCAPE: usize = 64;

/// Split `text` before a trailing escape sequence that is not complete yet.
///
/// Escape stripping works on whole sequences, so a sequence cut in half by a
/// read boundary is carried over to the next chunk instead of leaking its tail.
#[must_use]
pub fn split_incomplete_escape(text: &str) -> (&str, &str) {
    let Some(pos) = text.rfind('\x1b') else {
        return (text, "");
    };
    let tail = &text[pos..];
    if tail.len() > MAX_HELD_ESCAPE {
        return (text, "");
    }
    let body = &tail[1..];
    let complete = match body.chars().next() {
        None => false,
        Some('[') => body[1..].chars().any(|c| ('@'..='~').contains(&c)),
        Some(']' | 'P' | '^' | '_' | 'X') => body.contains('\x07') || body.contains("\x1b\\"),
        Some(' '..='/') => body.chars().count() >= 2,
        Some(_) => true,
    };
    if complete { (text, "") } else { text.split_at(pos) }
}

/// Heuristic binary detection: any NUL byte in the sample.
#[must_use]
pub fn looks_binary(sample: &[u8]) -> bool {
    sample.contains(&0)
}

/// Tracks the first [`SNIFF_LIMIT`] bytes of a stream and latches once
/// binary content is seen.
#[derive(Debug, Default)]
pub struct BinarySniffer {
    inspected: usize,
    binary: bool,
}

impl BinarySniffer {
    /// Feed a chunk; returns `true` if the stream is (now or already) binary.
    pub fn observe(&mut self, chunk: &[u8]) -> bool {
        if self.binary || self.inspected >= SNIFF_LIMIT {
            return self.binary;
        }
        let take = chunk.len().min(SNIFF_LIMIT - self.inspected);
        self.inspected += take;
        if looks_binary(&chunk[..take]) {
            self.binary = true;
        }
        self.binary
    }

    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.binary
    }
}
