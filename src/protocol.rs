//! Length-prefixed binary protocol.
//!
//! Every message on the wire is a 4-byte little-endian length followed by
//! that many payload bytes.
//!
//! ```text
//! Request:  | len: u32 | argc: u32 | arg_len: u32 | arg bytes | ... (argc times)
//! Response: | len: u32 | status: u32 | result bytes |
//! ```
//!
//! For responses `len` covers the status word plus the result bytes.

use crate::error::ProtocolError;
use bytes::{Buf, BufMut};

/// Maximum payload size of a single message (excluding the length header).
pub const MAX_MSG: usize = 4096;

/// Maximum number of arguments in a single request.
pub const MAX_ARGS: usize = 1024;

/// Size of the length header.
pub const HEADER_LEN: usize = 4;

/// Size of the status word in a response.
const STATUS_LEN: usize = 4;

/// Largest result payload that fits a response of `MAX_MSG` bytes.
pub const MAX_VALUE_LEN: usize = MAX_MSG - STATUS_LEN;

/// Capacity of each per-connection buffer: one full message plus its header.
pub const BUFFER_CAPACITY: usize = HEADER_LEN + MAX_MSG;

/// Response status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    Err = 1,
    NotFound = 2,
}

impl Status {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Err),
            2 => Some(Status::NotFound),
            _ => None,
        }
    }
}

/// Result of inspecting a read buffer for one request.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeResult<'a> {
    /// A full request is buffered: its payload and the number of bytes
    /// (header included) to discard from the front of the buffer.
    Complete(&'a [u8], usize),
    /// Need more data.
    Incomplete,
    /// The peer violated the protocol.
    Malformed(ProtocolError),
}

/// Try to extract one request payload from the front of `buffer`.
///
/// Never mutates the buffer. The length limit is checked as soon as the
/// header is available, before waiting for the body.
pub fn decode_request(buffer: &[u8]) -> DecodeResult<'_> {
    if buffer.len() < HEADER_LEN {
        return DecodeResult::Incomplete;
    }

    let len = read_u32(buffer) as usize;
    if len > MAX_MSG {
        return DecodeResult::Malformed(ProtocolError::MessageTooLong { len });
    }

    let total = HEADER_LEN + len;
    if buffer.len() < total {
        return DecodeResult::Incomplete;
    }

    DecodeResult::Complete(&buffer[HEADER_LEN..total], total)
}

/// Split a request payload into its ordered argument list.
///
/// The argument slices borrow from `payload`.
pub fn parse_arguments(payload: &[u8]) -> Result<Vec<&[u8]>, ProtocolError> {
    let mut buf = payload;

    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let argc = buf.get_u32_le() as usize;
    if argc > MAX_ARGS {
        return Err(ProtocolError::TooManyArgs { argc });
    }

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if buf.remaining() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(ProtocolError::Truncated);
        }
        args.push(&buf[..len]);
        buf.advance(len);
    }

    if buf.has_remaining() {
        return Err(ProtocolError::TrailingBytes {
            remaining: buf.remaining(),
        });
    }

    Ok(args)
}

/// Encoded size of a response carrying `payload_len` result bytes.
pub fn response_len(payload_len: usize) -> usize {
    HEADER_LEN + STATUS_LEN + payload_len
}

/// Encode a response into `output`.
///
/// Returns the number of bytes written. Fails without writing anything if
/// the response would exceed `MAX_MSG` or the space in `output`.
pub fn encode_response(
    status: Status,
    payload: &[u8],
    output: &mut [u8],
) -> Result<usize, ProtocolError> {
    let total = response_len(payload.len());
    if STATUS_LEN + payload.len() > MAX_MSG || total > output.len() {
        return Err(ProtocolError::ResponseTooLarge { len: total });
    }

    let mut dst = &mut output[..total];
    dst.put_u32_le((STATUS_LEN + payload.len()) as u32);
    dst.put_u32_le(status as u32);
    dst.put_slice(payload);

    Ok(total)
}

/// Encode a request envelope for `args`, appending it to `dst`.
pub fn encode_request<A: AsRef<[u8]>>(args: &[A], dst: &mut Vec<u8>) {
    let body_len: usize = 4 + args.iter().map(|a| 4 + a.as_ref().len()).sum::<usize>();

    dst.reserve(HEADER_LEN + body_len);
    dst.put_u32_le(body_len as u32);
    dst.put_u32_le(args.len() as u32);
    for arg in args {
        let arg = arg.as_ref();
        dst.put_u32_le(arg.len() as u32);
        dst.put_slice(arg);
    }
}

/// Decode one response from the front of `buffer`.
///
/// Returns the status, the result bytes and the number of bytes consumed,
/// or `None` if the response is not complete yet.
pub fn decode_response(buffer: &[u8]) -> Option<(u32, &[u8], usize)> {
    if buffer.len() < HEADER_LEN + STATUS_LEN {
        return None;
    }
    let len = read_u32(buffer) as usize;
    let total = HEADER_LEN + len;
    if len < STATUS_LEN || buffer.len() < total {
        return None;
    }
    let status = read_u32(&buffer[HEADER_LEN..]);
    Some((status, &buffer[HEADER_LEN + STATUS_LEN..total], total))
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut buf = (payload.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_request_round_trip() {
        let mut buf = Vec::new();
        encode_request(&["SET", "key", "value"], &mut buf);

        match decode_request(&buf) {
            DecodeResult::Complete(payload, consumed) => {
                assert_eq!(consumed, buf.len());
                let args = parse_arguments(payload).unwrap();
                assert_eq!(args, vec![&b"SET"[..], b"key", b"value"]);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_incomplete_header() {
        assert_eq!(decode_request(b""), DecodeResult::Incomplete);
        assert_eq!(decode_request(&[5, 0, 0]), DecodeResult::Incomplete);
    }

    #[test]
    fn test_incomplete_body() {
        let buf = frame(b"hello");
        assert_eq!(decode_request(&buf[..7]), DecodeResult::Incomplete);
    }

    #[test]
    fn test_message_too_long() {
        // Rejected from the header alone, no need to buffer the body
        let header = ((MAX_MSG + 1) as u32).to_le_bytes();
        assert_eq!(
            decode_request(&header),
            DecodeResult::Malformed(ProtocolError::MessageTooLong { len: MAX_MSG + 1 })
        );
    }

    #[test]
    fn test_max_size_message_accepted() {
        let buf = frame(&vec![0u8; MAX_MSG]);
        assert!(matches!(
            decode_request(&buf),
            DecodeResult::Complete(p, n) if p.len() == MAX_MSG && n == BUFFER_CAPACITY
        ));
    }

    #[test]
    fn test_pipelined_requests_decode_one_at_a_time() {
        let mut buf = Vec::new();
        encode_request(&["GET", "a"], &mut buf);
        let first_len = buf.len();
        encode_request(&["GET", "b"], &mut buf);

        match decode_request(&buf) {
            DecodeResult::Complete(payload, consumed) => {
                assert_eq!(consumed, first_len);
                assert_eq!(parse_arguments(payload).unwrap()[1], b"a");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_argument_list() {
        let payload = 0u32.to_le_bytes();
        let args = parse_arguments(&payload).unwrap();
        assert!(args.is_empty());
    }

    #[test]
    fn test_parse_max_args_accepted() {
        // MAX_ARGS empty arguments: argc plus one zero length each
        let mut payload = Vec::new();
        payload.put_u32_le(MAX_ARGS as u32);
        for _ in 0..MAX_ARGS {
            payload.put_u32_le(0);
        }

        let args = parse_arguments(&payload).unwrap();
        assert_eq!(args.len(), MAX_ARGS);
        assert!(args.iter().all(|a| a.is_empty()));
    }

    #[test]
    fn test_parse_too_many_args() {
        let payload = ((MAX_ARGS + 1) as u32).to_le_bytes();
        assert_eq!(
            parse_arguments(&payload),
            Err(ProtocolError::TooManyArgs { argc: MAX_ARGS + 1 })
        );
    }

    #[test]
    fn test_parse_truncated_argument() {
        let mut payload = Vec::new();
        payload.put_u32_le(1);
        payload.put_u32_le(10);
        payload.put_slice(b"short");
        assert_eq!(parse_arguments(&payload), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_parse_missing_length_field() {
        let mut payload = Vec::new();
        payload.put_u32_le(2);
        payload.put_u32_le(1);
        payload.put_slice(b"x");
        assert_eq!(parse_arguments(&payload), Err(ProtocolError::Truncated));
        assert_eq!(parse_arguments(&[1, 0]), Err(ProtocolError::Truncated));
    }

    #[test]
    fn test_parse_trailing_garbage() {
        let mut payload = Vec::new();
        payload.put_u32_le(1);
        payload.put_u32_le(3);
        payload.put_slice(b"GETjunk");
        assert_eq!(
            parse_arguments(&payload),
            Err(ProtocolError::TrailingBytes { remaining: 4 })
        );
    }

    #[test]
    fn test_encode_response() {
        let mut out = [0u8; 32];
        let n = encode_response(Status::NotFound, b"abc", &mut out).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&out[..4], &7u32.to_le_bytes());
        assert_eq!(&out[4..8], &2u32.to_le_bytes());
        assert_eq!(&out[8..11], b"abc");

        let (status, body, consumed) = decode_response(&out[..n]).unwrap();
        assert_eq!(Status::from_u32(status), Some(Status::NotFound));
        assert_eq!(body, b"abc");
        assert_eq!(consumed, n);
    }

    #[test]
    fn test_encode_response_limits() {
        let mut out = vec![0u8; BUFFER_CAPACITY];
        let largest = vec![b'x'; MAX_VALUE_LEN];
        assert_eq!(
            encode_response(Status::Ok, &largest, &mut out),
            Ok(BUFFER_CAPACITY)
        );

        let too_large = vec![b'x'; MAX_VALUE_LEN + 1];
        assert!(matches!(
            encode_response(Status::Ok, &too_large, &mut out),
            Err(ProtocolError::ResponseTooLarge { .. })
        ));

        let mut small = [0u8; 8];
        assert!(encode_response(Status::Ok, b"x", &mut small).is_err());
    }
}
