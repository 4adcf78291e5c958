//! Tolerant incremental JSON parsing for streamed tool-call arguments.
//!
//! Providers stream tool arguments as raw JSON fragments. While the text is
//! incomplete we still want a useful value for live rendering, so the parser
//! closes whatever is open (strings, arrays, objects) and drops incomplete
//! trailing tokens. Nothing here panics or returns an error; failure is
//! `None`.

use serde_json::{Map, Value};

/// Appends `chunk` to `buffer` and returns the new buffer together with the
/// best-effort parse of it.
pub fn feed(buffer: &str, chunk: &str) -> (String, Option<Value>) {
    let mut next = String::with_capacity(buffer.len() + chunk.len());
    next.push_str(buffer);
    next.push_str(chunk);
    let value = parse_streaming_json(&next);
    (next, value)
}

/// Strict parse of a complete JSON document.
pub fn parse_complete_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok()
}

/// Parses `text` as JSON, or the longest prefix of it that can be closed into
/// a valid document.
pub fn parse_streaming_json(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    if let Some(value) = parse_complete_json(text) {
        return Some(value);
    }
    let scan = Scanner::new(text).run();
    scan.candidates()
        .into_iter()
        .find_map(|candidate| parse_complete_json(&candidate))
}

/// Owned accumulation buffer for one streaming tool call.
#[derive(Debug, Default, Clone)]
pub struct JsonAccumulator {
    buffer: String,
    value: Option<Value>,
}

impl JsonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment and re-parses. Returns the latest successful parse,
    /// which may be from an earlier fragment if this one made no progress.
    pub fn push(&mut self, chunk: &str) -> Option<&Value> {
        self.buffer.push_str(chunk);
        if let Some(value) = parse_streaming_json(&self.buffer) {
            self.value = Some(value);
        }
        self.value.as_ref()
    }

    /// Raw text received so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Latest best-effort value, if it is an object.
    pub fn object(&self) -> Option<&Map<String, Value>> {
        self.value.as_ref().and_then(Value::as_object)
    }

    /// Final arguments: the strict parse of the whole buffer when it is a JSON
    /// object, otherwise an empty object.
    pub fn finish(self) -> Map<String, Value> {
        match parse_complete_json(&self.buffer) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ObjectState {
    FirstKey,
    Key,
    Colon,
    Value,
    Next,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ArrayState {
    FirstValue,
    Value,
    Next,
}

#[derive(Clone, Copy, Debug)]
enum Frame {
    Object(ObjectState),
    Array(ArrayState),
}

enum StringEnd {
    /// Offset just past the closing quote.
    Closed(usize),
    /// Unterminated; offset where usable content ends.
    Open(usize),
}

/// Single forward pass that records the last offset at which the text can be
/// cut and closed into valid JSON.
///
/// Every pop of the stack completes a value and records a cut, so the frames
/// below a recorded depth never change after it is recorded.
struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    stack: Vec<Frame>,
    safe: Option<(usize, usize)>,
    partial: Option<String>,
    finished: bool,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            stack: Vec::new(),
            safe: None,
            partial: None,
            finished: false,
        }
    }

    fn run(mut self) -> Self {
        while self.pos < self.bytes.len() {
            let byte = self.bytes[self.pos];
            if byte.is_ascii_whitespace() {
                self.pos += 1;
                continue;
            }
            if self.finished {
                break;
            }
            let progressed = match byte {
                b'{' if self.expects_value() => {
                    self.open(Frame::Object(ObjectState::FirstKey));
                    true
                }
                b'[' if self.expects_value() => {
                    self.open(Frame::Array(ArrayState::FirstValue));
                    true
                }
                b'}' => self.close(|frame| {
                    matches!(
                        frame,
                        Frame::Object(ObjectState::FirstKey | ObjectState::Next)
                    )
                }),
                b']' => self.close(|frame| {
                    matches!(frame, Frame::Array(ArrayState::FirstValue | ArrayState::Next))
                }),
                b',' => self.comma(),
                b':' => self.colon(),
                b'"' if self.expects_key() => self.key(),
                b'"' if self.expects_value() => self.string_value(),
                b'-' | b'0'..=b'9' if self.expects_value() => self.number(),
                b't' | b'f' | b'n' if self.expects_value() => self.literal(),
                _ => false,
            };
            if !progressed {
                break;
            }
        }
        self
    }

    fn candidates(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(2);
        if let Some(partial) = &self.partial {
            out.push(partial.clone());
        }
        if let Some((cut, depth)) = self.safe {
            out.push(format!("{}{}", &self.text[..cut], self.closers(depth)));
        }
        out
    }

    fn expects_value(&self) -> bool {
        match self.stack.last() {
            None => !self.finished,
            Some(Frame::Object(state)) => *state == ObjectState::Value,
            Some(Frame::Array(state)) => {
                matches!(state, ArrayState::FirstValue | ArrayState::Value)
            }
        }
    }

    fn expects_key(&self) -> bool {
        matches!(
            self.stack.last(),
            Some(Frame::Object(ObjectState::FirstKey | ObjectState::Key))
        )
    }

    fn closers(&self, depth: usize) -> String {
        self.stack[..depth]
            .iter()
            .rev()
            .map(|frame| match frame {
                Frame::Object(_) => '}',
                Frame::Array(_) => ']',
            })
            .collect()
    }

    fn mark_safe(&mut self) {
        self.safe = Some((self.pos, self.stack.len()));
    }

    fn complete_value(&mut self) {
        match self.stack.last_mut() {
            None => self.finished = true,
            Some(Frame::Object(state)) => *state = ObjectState::Next,
            Some(Frame::Array(state)) => *state = ArrayState::Next,
        }
        self.mark_safe();
    }

    fn open(&mut self, frame: Frame) {
        self.stack.push(frame);
        self.pos += 1;
        self.mark_safe();
    }

    fn close(&mut self, accepts: impl Fn(&Frame) -> bool) -> bool {
        if !self.stack.last().is_some_and(|frame| accepts(frame)) {
            return false;
        }
        self.stack.pop();
        self.pos += 1;
        self.complete_value();
        true
    }

    fn comma(&mut self) -> bool {
        match self.stack.last_mut() {
            Some(Frame::Object(state)) if *state == ObjectState::Next => {
                *state = ObjectState::Key;
            }
            Some(Frame::Array(state)) if *state == ArrayState::Next => {
                *state = ArrayState::Value;
            }
            _ => return false,
        }
        self.pos += 1;
        true
    }

    fn colon(&mut self) -> bool {
        match self.stack.last_mut() {
            Some(Frame::Object(state)) if *state == ObjectState::Colon => {
                *state = ObjectState::Value;
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn key(&mut self) -> bool {
        match self.scan_string() {
            StringEnd::Closed(end) => {
                self.pos = end;
                if let Some(Frame::Object(state)) = self.stack.last_mut() {
                    *state = ObjectState::Colon;
                }
                true
            }
            // A half-received key has no value to keep.
            StringEnd::Open(_) => false,
        }
    }

    fn string_value(&mut self) -> bool {
        match self.scan_string() {
            StringEnd::Closed(end) => {
                self.pos = end;
                self.complete_value();
                true
            }
            StringEnd::Open(content_end) => {
                self.partial = Some(format!(
                    "{}\"{}",
                    &self.text[..content_end],
                    self.closers(self.stack.len())
                ));
                false
            }
        }
    }

    fn scan_string(&self) -> StringEnd {
        let len = self.bytes.len();
        let mut i = self.pos + 1;
        let mut high_surrogate_at = None;
        while i < len {
            match self.bytes[i] {
                b'"' => return StringEnd::Closed(i + 1),
                b'\\' => {
                    let Some(&escape) = self.bytes.get(i + 1) else {
                        return StringEnd::Open(i);
                    };
                    if escape == b'u' {
                        let hex_end = i + 6;
                        if hex_end > len {
                            return StringEnd::Open(i);
                        }
                        let code = std::str::from_utf8(&self.bytes[i + 2..hex_end])
                            .ok()
                            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
                            .and_then(|hex| u16::from_str_radix(hex, 16).ok());
                        high_surrogate_at = match code {
                            Some(0xD800..=0xDBFF) => Some(i),
                            _ => None,
                        };
                        i = hex_end;
                    } else {
                        high_surrogate_at = None;
                        i += 2;
                    }
                }
                _ => {
                    high_surrogate_at = None;
                    i += 1;
                }
            }
        }
        // A trailing high surrogate is only valid with its low half.
        StringEnd::Open(high_surrogate_at.unwrap_or(len))
    }

    fn number(&mut self) -> bool {
        let start = self.pos;
        let mut end = start;
        while end < self.bytes.len()
            && matches!(self.bytes[end], b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E')
        {
            end += 1;
        }
        let valid = serde_json::from_str::<serde_json::Number>(&self.text[start..end]).is_ok();
        if end == self.bytes.len() {
            if valid {
                self.partial = Some(format!(
                    "{}{}",
                    &self.text[..end],
                    self.closers(self.stack.len())
                ));
            }
            return false;
        }
        if !valid {
            return false;
        }
        self.pos = end;
        self.complete_value();
        true
    }

    fn literal(&mut self) -> bool {
        let rest = &self.bytes[self.pos..];
        for literal in [&b"true"[..], &b"false"[..], &b"null"[..]] {
            if rest.starts_with(literal) {
                self.pos += literal.len();
                self.complete_value();
                return true;
            }
            if literal.starts_with(rest) {
                return false;
            }
        }
        false
    }
}
