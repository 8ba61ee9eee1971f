// In: src/json/scanner.rs

use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::Value;

use super::ValueKind;
use crate::bridge::format::FileRange;
use crate::error::{JsonTableError, Result};
use crate::source::{ByteCursor, InputSource, ReadWindow};

/// Deepest container nesting accepted inside a single value.
pub(crate) const MAX_NESTING_DEPTH: usize = 512;

fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

/// Bytes that terminate a bare literal (number, `true`, `false`, `null`).
fn is_delimiter(byte: u8) -> bool {
    is_whitespace(byte) || matches!(byte, b',' | b']' | b'}' | b':')
}

/// Parses one framed value. Nesting is bounded by `frame_container`, so
/// serde_json's own recursion limit is lifted.
fn parse_framed<T: DeserializeOwned>(bytes: &[u8], offset: u64) -> Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    T::deserialize(&mut de)
        .and_then(|value| de.end().map(|()| value))
        .map_err(|e| JsonTableError::malformed(offset, e.to_string()))
}

/// A pull-style JSON scanner. Structural tokens (`[`, `{`, `,`, `:`) are
/// consumed one at a time; complete values are framed into `scratch` and
/// parsed by `serde_json`.
pub(crate) struct JsonScanner<S> {
    cursor: ByteCursor<S>,
    scratch: Vec<u8>,
}

impl<S: InputSource> JsonScanner<S> {
    pub fn new(source: S, read_buffer_size: usize) -> Result<Self> {
        Ok(Self {
            cursor: ByteCursor::new(source, read_buffer_size)?,
            scratch: Vec::new(),
        })
    }

    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Total length of the underlying input.
    pub fn len(&self) -> u64 {
        self.cursor.len()
    }

    pub fn seek(&mut self, offset: u64) -> Result<()> {
        Ok(self.cursor.seek(offset)?)
    }

    /// Exchanges the active read window with a parked one.
    pub fn swap_window(&mut self, window: &mut ReadWindow) {
        self.cursor.swap_window(window);
    }

    pub fn source(&self) -> &S {
        self.cursor.get_ref()
    }

    /// Skips whitespace and returns the next byte without consuming it.
    pub fn skip_whitespace(&mut self) -> Result<Option<u8>> {
        while let Some(byte) = self.cursor.peek()? {
            if !is_whitespace(byte) {
                return Ok(Some(byte));
            }
            self.cursor.bump();
        }
        Ok(None)
    }

    /// Like `skip_whitespace`, but end of input is an error.
    fn require_byte(&mut self, context: &str) -> Result<u8> {
        self.skip_whitespace()?.ok_or_else(|| {
            JsonTableError::malformed(
                self.position(),
                format!("unexpected end of input {}", context),
            )
        })
    }

    /// Returns the kind and offset of the next value, or `None` at end of input.
    pub fn peek_kind(&mut self) -> Result<Option<(ValueKind, u64)>> {
        let Some(byte) = self.skip_whitespace()? else {
            return Ok(None);
        };
        let offset = self.position();
        match ValueKind::from_lead_byte(byte) {
            Some(kind) => Ok(Some((kind, offset))),
            None => Err(JsonTableError::malformed(
                offset,
                format!("unexpected character '{}'", byte.escape_ascii()),
            )),
        }
    }

    /// Consumes `expected` after optional whitespace and returns its offset.
    fn expect_byte(&mut self, expected: u8, context: &str) -> Result<u64> {
        let byte = self.require_byte(context)?;
        let offset = self.position();
        if byte != expected {
            return Err(JsonTableError::malformed(
                offset,
                format!(
                    "expected '{}' {}, found '{}'",
                    expected as char,
                    context,
                    byte.escape_ascii()
                ),
            ));
        }
        self.cursor.bump();
        Ok(offset)
    }

    pub fn begin_array(&mut self) -> Result<u64> {
        self.expect_byte(b'[', "at start of array")
    }

    pub fn begin_object(&mut self) -> Result<u64> {
        self.expect_byte(b'{', "at start of object")
    }

    /// Advances to the next array element. Returns `false` after consuming
    /// the closing `]`. `first` must start as `true` for each array.
    pub fn next_element(&mut self, first: &mut bool) -> Result<bool> {
        let byte = self.require_byte("inside array")?;
        if byte == b']' {
            self.cursor.bump();
            return Ok(false);
        }
        if !*first {
            self.expect_byte(b',', "between array elements")?;
            if self.require_byte("inside array")? == b']' {
                return Err(JsonTableError::malformed(
                    self.position(),
                    "trailing comma in array",
                ));
            }
        }
        *first = false;
        Ok(true)
    }

    /// Advances to the next object member and consumes its key and colon.
    /// Returns `None` after consuming the closing `}`.
    pub fn next_key(&mut self, first: &mut bool) -> Result<Option<(String, u64)>> {
        let byte = self.require_byte("inside object")?;
        if byte == b'}' {
            self.cursor.bump();
            return Ok(None);
        }
        if !*first {
            self.expect_byte(b',', "between object members")?;
        }
        let byte = self.require_byte("inside object")?;
        let offset = self.position();
        if byte != b'"' {
            return Err(JsonTableError::malformed(
                offset,
                "object keys must be strings",
            ));
        }
        let range = self.frame_value()?;
        let key: String = parse_framed(&self.scratch, range.offset)?;
        self.expect_byte(b':', "after object key")?;
        *first = false;
        Ok(Some((key, offset)))
    }

    /// Copies the bytes of the next complete value into `scratch` and
    /// returns its span. Syntax inside the span is checked by the caller's
    /// `serde_json` pass.
    fn frame_value(&mut self) -> Result<FileRange> {
        self.scratch.clear();
        let lead = self.require_byte("where a value was expected")?;
        let start = self.position();
        let kind = ValueKind::from_lead_byte(lead).ok_or_else(|| {
            JsonTableError::malformed(
                start,
                format!("unexpected character '{}'", lead.escape_ascii()),
            )
        })?;

        match kind {
            ValueKind::Object | ValueKind::Array => self.frame_container(start)?,
            ValueKind::String => {
                self.cursor.bump();
                self.scratch.push(b'"');
                self.frame_string_tail(start)?;
            }
            _ => {
                while let Some(byte) = self.cursor.peek()? {
                    if is_delimiter(byte) {
                        break;
                    }
                    self.scratch.push(byte);
                    self.cursor.bump();
                }
            }
        }
        Ok(FileRange::between(start, self.position()))
    }

    /// Consumes string bytes up to and including the closing quote.
    fn frame_string_tail(&mut self, start: u64) -> Result<()> {
        let mut escaped = false;
        loop {
            let byte = self
                .cursor
                .next_byte()?
                .ok_or_else(|| JsonTableError::malformed(start, "unterminated string"))?;
            self.scratch.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                return Ok(());
            }
        }
    }

    fn frame_container(&mut self, start: u64) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let byte = self
                .cursor
                .next_byte()?
                .ok_or_else(|| JsonTableError::malformed(start, "unterminated container"))?;
            self.scratch.push(byte);
            match byte {
                b'"' => self.frame_string_tail(start)?,
                b'{' | b'[' => {
                    depth += 1;
                    if depth > MAX_NESTING_DEPTH {
                        return Err(JsonTableError::unrecognized(
                            start,
                            format!("value nested deeper than {} levels", MAX_NESTING_DEPTH),
                        ));
                    }
                }
                b'}' | b']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Parses the next value and returns it together with its byte span.
    pub fn parse_value(&mut self) -> Result<(Value, FileRange)> {
        let range = self.frame_value()?;
        let value = parse_framed(&self.scratch, range.offset)?;
        Ok((value, range))
    }

    /// Validates and skips the next value without materializing it.
    pub fn skip_value(&mut self) -> Result<FileRange> {
        let range = self.frame_value()?;
        parse_framed::<IgnoredAny>(&self.scratch, range.offset)?;
        Ok(range)
    }

    /// Fails if anything other than whitespace remains in the input.
    pub fn finish(&mut self) -> Result<()> {
        match self.skip_whitespace()? {
            None => Ok(()),
            Some(byte) => Err(JsonTableError::malformed(
                self.position(),
                format!(
                    "trailing characters after top-level value, starting with '{}'",
                    byte.escape_ascii()
                ),
            )),
        }
    }
}
