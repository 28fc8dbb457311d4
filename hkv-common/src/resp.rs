//! # RESP wire codec
//!
//! Stateful incremental decoder plus a pure encoder. The decoder never
//! blocks on message boundaries: `Decoder::decode` appends whatever bytes the
//! caller hands it to an internal buffer and returns every top-level frame
//! that became complete as a result, leaving any partial frame's prefix
//! buffered for the next call.
//!
//! Nesting is handled with an explicit stack of in-progress array builders
//! rather than recursive descent, so a frame half-received across many small
//! reads never loses progress.

use bytes::{Buf, BytesMut};

use crate::error::DecodeError;

/// A fully decoded RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    Bulk(Option<String>),
    Array(Option<Vec<Frame>>),
}

impl Frame {
    /// Unwraps an `Array` of non-nil `Bulk` strings into owned `String`s.
    ///
    /// Returns `None` for anything else: a nil array, a scalar top-level
    /// frame, or an array containing a non-bulk or nil-bulk element.
    pub fn into_bulk_array(self) -> Option<Vec<String>> {
        match self {
            Frame::Array(Some(items)) => items
                .into_iter()
                .map(|item| match item {
                    Frame::Bulk(Some(s)) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => None,
        }
    }
}

/// A value the command layer hands back to the connection loop for encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok,
    NilBulk,
    NilArray,
    Int(i64),
    Bulk(String),
    Array(Vec<Reply>),
    Error(String),
}

impl Reply {
    pub fn strings(items: Vec<String>) -> Reply {
        Reply::Array(items.into_iter().map(Reply::Bulk).collect())
    }
}

/// Encodes a `Reply` to RESP bytes.
pub fn encode(reply: &Reply, out: &mut Vec<u8>) {
    match reply {
        Reply::Ok => out.extend_from_slice(b"+OK\r\n"),
        Reply::NilBulk => out.extend_from_slice(b"$-1\r\n"),
        Reply::NilArray => out.extend_from_slice(b"*-1\r\n"),
        Reply::Int(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Bulk(s) => {
            out.push(b'$');
            out.extend_from_slice(s.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        Reply::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n");
            for item in items {
                encode(item, out);
            }
        }
        Reply::Error(msg) => {
            out.push(b'-');
            out.extend_from_slice(msg.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

pub fn encode_to_vec(reply: &Reply) -> Vec<u8> {
    let mut out = Vec::new();
    encode(reply, &mut out);
    out
}

/// One array in progress: how many elements are still needed, and what has
/// been collected so far.
struct ArrayBuilder {
    remaining: usize,
    items: Vec<Frame>,
}

/// Incremental RESP decoder. One instance per connection.
#[derive(Default)]
pub struct Decoder {
    buf: BytesMut,
    stack: Vec<ArrayBuilder>,
}

/// Outcome of trying to read the next value header from the buffer.
enum Step {
    /// Not enough bytes yet; nothing was consumed.
    Incomplete,
    /// A complete scalar (or already-resolved nil/empty array) frame.
    Value(Frame),
    /// `*n\r\n` with `n > 0`: an array has started and needs `n` more values.
    ArrayStart(usize),
}

impl Decoder {
    pub fn new() -> Self {
        Decoder {
            buf: BytesMut::new(),
            stack: Vec::new(),
        }
    }

    /// Discards all buffered bytes and any in-progress array stack.
    ///
    /// Called by the connection loop after a decode error, per the server's
    /// policy of resetting rather than closing on bad input.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.stack.clear();
    }

    /// Feeds `input` to the decoder and returns every top-level frame that
    /// became complete.
    ///
    /// On a decode error, any frames that completed earlier in this same
    /// call are returned alongside the error rather than discarded — a
    /// malformed frame arriving in the same read as a valid pipelined one
    /// must not cause the valid one to go undispatched.
    pub fn decode(&mut self, input: &[u8]) -> Result<Vec<Frame>, (Vec<Frame>, DecodeError)> {
        self.buf.extend_from_slice(input);
        let mut completed = Vec::new();
        loop {
            match self.step() {
                Ok(Step::Incomplete) => break,
                Ok(Step::Value(frame)) => self.emit(frame, &mut completed),
                Ok(Step::ArrayStart(n)) => self.stack.push(ArrayBuilder {
                    remaining: n,
                    items: Vec::with_capacity(n),
                }),
                Err(err) => return Err((completed, err)),
            }
        }
        Ok(completed)
    }

    /// Places a newly completed value into its parent array, or into the
    /// top-level output, collapsing any arrays this completes in turn.
    fn emit(&mut self, mut frame: Frame, completed: &mut Vec<Frame>) {
        loop {
            match self.stack.last_mut() {
                None => {
                    completed.push(frame);
                    return;
                }
                Some(top) => {
                    top.items.push(frame);
                    if top.items.len() == top.remaining {
                        let done = self.stack.pop().expect("just matched");
                        frame = Frame::Array(Some(done.items));
                    } else {
                        return;
                    }
                }
            }
        }
    }

    /// Reads one value header from the front of `self.buf`, without
    /// consuming anything unless the whole value is available.
    fn step(&mut self) -> Result<Step, DecodeError> {
        if self.buf.is_empty() {
            return Ok(Step::Incomplete);
        }
        let kind = self.buf[0];
        match kind {
            b'+' | b'-' | b':' => self.read_line_value(kind),
            b'$' => self.read_bulk(),
            b'*' => self.read_array_header(),
            other => Err(DecodeError::FirstByteNotRecognized(other)),
        }
    }

    /// Finds `\r\n` within `self.buf[1..]`; returns the byte offset of the
    /// `\r` (relative to the whole buffer), or `None` if not yet present.
    fn find_crlf(&self, from: usize) -> Option<usize> {
        let haystack = &self.buf[from..];
        haystack
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|pos| from + pos)
    }

    fn read_line_value(&mut self, kind: u8) -> Result<Step, DecodeError> {
        let Some(crlf) = self.find_crlf(1) else {
            return Ok(Step::Incomplete);
        };
        let body = std::str::from_utf8(&self.buf[1..crlf])
            .map_err(|_| DecodeError::ValueError("invalid utf-8".to_string()))?
            .to_string();
        self.buf.advance(crlf + 2);
        let frame = match kind {
            b'+' => Frame::SimpleString(body),
            b'-' => Frame::Error(body),
            b':' => {
                let n: i64 = body
                    .parse()
                    .map_err(|_| DecodeError::ValueError(format!("not an integer: {body}")))?;
                Frame::Integer(n)
            }
            _ => unreachable!(),
        };
        Ok(Step::Value(frame))
    }

    fn read_length_prefix(&self) -> Result<Option<(usize, i64)>, DecodeError> {
        let Some(crlf) = self.find_crlf(1) else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&self.buf[1..crlf])
            .map_err(|_| DecodeError::ValueError("invalid utf-8 length".to_string()))?;
        let len: i64 = text
            .parse()
            .map_err(|_| DecodeError::ValueError(format!("bad length: {text}")))?;
        Ok(Some((crlf + 2, len)))
    }

    fn read_bulk(&mut self) -> Result<Step, DecodeError> {
        let Some((header_len, len)) = self.read_length_prefix()? else {
            return Ok(Step::Incomplete);
        };
        if len == -1 {
            self.buf.advance(header_len);
            return Ok(Step::Value(Frame::Bulk(None)));
        }
        if len < -1 {
            self.buf.advance(header_len);
            return Err(DecodeError::ValueError(format!("negative length: {len}")));
        }
        let len = len as usize;
        let total = header_len + len + 2;
        if self.buf.len() < total {
            return Ok(Step::Incomplete);
        }
        if &self.buf[header_len + len..total] != b"\r\n" {
            return Err(DecodeError::BulkStringWrongSize);
        }
        let body = std::str::from_utf8(&self.buf[header_len..header_len + len])
            .map_err(|_| DecodeError::ValueError("invalid utf-8 bulk body".to_string()))?
            .to_string();
        self.buf.advance(total);
        Ok(Step::Value(Frame::Bulk(Some(body))))
    }

    fn read_array_header(&mut self) -> Result<Step, DecodeError> {
        let Some((header_len, len)) = self.read_length_prefix()? else {
            return Ok(Step::Incomplete);
        };
        self.buf.advance(header_len);
        if len == -1 {
            return Ok(Step::Value(Frame::Array(None)));
        }
        if len < -1 {
            return Err(DecodeError::ValueError(format!("negative length: {len}")));
        }
        if len == 0 {
            return Ok(Step::Value(Frame::Array(Some(Vec::new()))));
        }
        Ok(Step::ArrayStart(len as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Vec<Frame> {
        let mut decoder = Decoder::new();
        decoder.decode(input).unwrap()
    }

    #[test]
    fn decodes_simple_types() {
        assert_eq!(
            decode_all(b"+OK\r\n"),
            vec![Frame::SimpleString("OK".to_string())]
        );
        assert_eq!(
            decode_all(b"-ERR bad\r\n"),
            vec![Frame::Error("ERR bad".to_string())]
        );
        assert_eq!(decode_all(b":42\r\n"), vec![Frame::Integer(42)]);
        assert_eq!(decode_all(b":-7\r\n"), vec![Frame::Integer(-7)]);
    }

    #[test]
    fn decodes_bulk_strings() {
        assert_eq!(
            decode_all(b"$5\r\nhello\r\n"),
            vec![Frame::Bulk(Some("hello".to_string()))]
        );
        assert_eq!(decode_all(b"$-1\r\n"), vec![Frame::Bulk(None)]);
        assert_eq!(decode_all(b"$0\r\n\r\n"), vec![Frame::Bulk(Some(String::new()))]);
    }

    #[test]
    fn decodes_nested_arrays() {
        let input = b"*2\r\n*1\r\n$1\r\na\r\n$1\r\nb\r\n";
        assert_eq!(
            decode_all(input),
            vec![Frame::Array(Some(vec![
                Frame::Array(Some(vec![Frame::Bulk(Some("a".to_string()))])),
                Frame::Bulk(Some("b".to_string())),
            ]))]
        );
    }

    #[test]
    fn decodes_nil_and_empty_arrays() {
        assert_eq!(decode_all(b"*-1\r\n"), vec![Frame::Array(None)]);
        assert_eq!(decode_all(b"*0\r\n"), vec![Frame::Array(Some(Vec::new()))]);
    }

    #[test]
    fn chunk_invariance() {
        let whole = b"*3\r\n$3\r\nSET\r\n$1\r\n1\r\n$3\r\none\r\n";
        let expected = decode_all(whole);

        let mut decoder = Decoder::new();
        let mut frames = Vec::new();
        for chunk in whole.chunks(3) {
            frames.extend(decoder.decode(chunk).unwrap());
        }
        assert_eq!(frames, expected);
    }

    #[test]
    fn rejects_bad_first_byte() {
        let mut decoder = Decoder::new();
        let (completed, err) = decoder.decode(b"#nope\r\n").unwrap_err();
        assert!(completed.is_empty());
        assert_eq!(err, DecodeError::FirstByteNotRecognized(b'#'));
    }

    #[test]
    fn rejects_bad_bulk_terminator() {
        let mut decoder = Decoder::new();
        let (completed, err) = decoder.decode(b"$3\r\nabcXX").unwrap_err();
        assert!(completed.is_empty());
        assert_eq!(err, DecodeError::BulkStringWrongSize);
    }

    #[test]
    fn returns_frames_completed_before_a_later_error_in_the_same_call() {
        let mut decoder = Decoder::new();
        let input = b"+OK\r\n#nope\r\n";
        let (completed, err) = decoder.decode(input).unwrap_err();
        assert_eq!(completed, vec![Frame::SimpleString("OK".to_string())]);
        assert_eq!(err, DecodeError::FirstByteNotRecognized(b'#'));
    }

    #[test]
    fn round_trips_through_encoder() {
        let reply = Reply::Array(vec![
            Reply::Bulk("a".to_string()),
            Reply::Int(3),
            Reply::NilBulk,
        ]);
        let bytes = encode_to_vec(&reply);
        let mut decoder = Decoder::new();
        let frames = decoder.decode(&bytes).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Array(Some(vec![
                Frame::Bulk(Some("a".to_string())),
                Frame::Integer(3),
                Frame::Bulk(None),
            ]))]
        );
    }

    #[test]
    fn retains_partial_frame_across_calls() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.decode(b"$5\r\nhel").unwrap(), Vec::new());
        assert_eq!(
            decoder.decode(b"lo\r\n").unwrap(),
            vec![Frame::Bulk(Some("hello".to_string()))]
        );
    }
}
