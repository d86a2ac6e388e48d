//! Incremental detection of complete top-level JSON values in a
//! concatenated, delimiter-free byte stream.
//!
//! JSON-RPC 1.0 has no framing between messages: the wire is just one
//! JSON value after another, with optional whitespace in between. This
//! module finds where one value ends by tracking bracket/brace nesting
//! and string/escape state one byte at a time, rather than scanning for
//! a fixed delimiter byte the way a newline-framed wire format could.

use serde_json::Value;

use crate::error::DecodeError;

/// What the scanner is doing at the top level, between values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Skipping whitespace before a value starts.
    BeforeValue,
    /// Inside a scalar token (number, `true`, `false`, `null`) that
    /// ends at the next whitespace or structural character.
    Scalar,
    /// Inside a bare top-level string value.
    TopString { escaped: bool },
    /// Inside an array/object at the given nesting depth, optionally
    /// inside a string literal at that position.
    Nested {
        depth: u32,
        in_string: bool,
        escaped: bool,
    },
}

/// Scans an incremental, delimiter-free JSON byte stream for complete
/// top-level values.
///
/// Feed it bytes as they arrive with [`Parser::feed`]; it reports how
/// many bytes it consumed and, once a full value's bytes have been
/// seen, returns them for decoding.
#[derive(Debug)]
pub struct Parser {
    mode: Mode,
    /// Bytes of the value currently being scanned, from its first
    /// non-whitespace byte.
    buf: Vec<u8>,
}

/// The result of feeding one chunk of bytes to the [`Parser`].
#[derive(Debug)]
pub enum Progress {
    /// No complete value yet; continue feeding more bytes.
    NeedMore,
    /// A complete value's bytes were assembled and parsed into JSON.
    Value(Value),
    /// The buffered bytes were not valid JSON.
    Error(DecodeError),
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Creates a scanner positioned before any value.
    pub fn new() -> Self {
        Parser {
            mode: Mode::BeforeValue,
            buf: Vec::new(),
        }
    }

    /// Feeds `input`, returning the number of bytes consumed and the
    /// resulting [`Progress`].
    ///
    /// On [`Progress::Value`] or [`Progress::Error`], the scanner has
    /// reset itself and is ready to scan the next value; any bytes
    /// after the consumed count belong to the next value and should be
    /// fed again on the next call.
    pub fn feed(&mut self, input: &[u8]) -> (usize, Progress) {
        for (i, &b) in input.iter().enumerate() {
            match self.mode {
                Mode::BeforeValue => {
                    if b.is_ascii_whitespace() {
                        continue;
                    }
                    self.buf.push(b);
                    self.mode = match b {
                        b'{' | b'[' => Mode::Nested {
                            depth: 1,
                            in_string: false,
                            escaped: false,
                        },
                        b'"' => Mode::TopString { escaped: false },
                        _ => Mode::Scalar,
                    };
                }
                Mode::Scalar => {
                    if b.is_ascii_whitespace() || matches!(b, b'{' | b'[' | b'}' | b']' | b',') {
                        // The scalar ended just before this byte; don't
                        // consume it as part of this value.
                        return self.finish(i);
                    }
                    self.buf.push(b);
                }
                Mode::TopString { escaped } => {
                    self.buf.push(b);
                    if escaped {
                        self.mode = Mode::TopString { escaped: false };
                    } else if b == b'\\' {
                        self.mode = Mode::TopString { escaped: true };
                    } else if b == b'"' {
                        return self.finish(i + 1);
                    }
                }
                Mode::Nested {
                    depth,
                    in_string,
                    escaped,
                } => {
                    self.buf.push(b);
                    if in_string {
                        if escaped {
                            self.mode = Mode::Nested {
                                depth,
                                in_string: true,
                                escaped: false,
                            };
                        } else if b == b'\\' {
                            self.mode = Mode::Nested {
                                depth,
                                in_string: true,
                                escaped: true,
                            };
                        } else if b == b'"' {
                            self.mode = Mode::Nested {
                                depth,
                                in_string: false,
                                escaped: false,
                            };
                        }
                        continue;
                    }
                    match b {
                        b'"' => {
                            self.mode = Mode::Nested {
                                depth,
                                in_string: true,
                                escaped: false,
                            }
                        }
                        b'{' | b'[' => {
                            self.mode = Mode::Nested {
                                depth: depth + 1,
                                in_string: false,
                                escaped: false,
                            }
                        }
                        b'}' | b']' => {
                            let depth = depth - 1;
                            if depth == 0 {
                                return self.finish(i + 1);
                            }
                            self.mode = Mode::Nested {
                                depth,
                                in_string: false,
                                escaped: false,
                            };
                        }
                        _ => {}
                    }
                }
            }
        }
        (input.len(), Progress::NeedMore)
    }

    fn finish(&mut self, consumed: usize) -> (usize, Progress) {
        let buf = std::mem::take(&mut self.buf);
        self.mode = Mode::BeforeValue;
        let progress = match serde_json::from_slice::<Value>(&buf) {
            Ok(v) => Progress::Value(v),
            Err(e) => Progress::Error(e.into()),
        };
        (consumed, progress)
    }
}
