//! The [`V2Transport`] trait.
use std::io;

use bytes::Bytes;

use crate::Result;

/// A buffered byte stream which can send and receive wire primitives.
///
/// The V2 backend grammar is not length prefixed, so the engine consumes
/// the stream through primitive receivers rather than framed messages.
/// Multi-byte integers are big-endian; strings are translated through the
/// connection's character encoding.
///
/// Sends are buffered; [`flush`][V2Transport::flush] actually writes, as
/// one unit. Receivers block until the requested bytes are available.
pub trait V2Transport {
    /// Buffer a single byte.
    fn send_u8(&mut self, b: u8);

    /// Buffer a 2-byte integer.
    fn send_i16(&mut self, v: i16);

    /// Buffer a 4-byte integer.
    fn send_i32(&mut self, v: i32);

    /// Buffer a string in the connection encoding, without terminator.
    fn send_str(&mut self, s: &str);

    /// Buffer raw bytes.
    fn send_bytes(&mut self, bytes: &[u8]);

    /// Write all buffered sends to the underlying io.
    fn flush(&mut self) -> impl Future<Output = io::Result<()>>;

    /// Receive a single byte.
    fn recv_u8(&mut self) -> impl Future<Output = Result<u8>>;

    /// Receive a 2-byte integer.
    fn recv_i16(&mut self) -> impl Future<Output = Result<i16>>;

    /// Receive a 4-byte integer.
    fn recv_i32(&mut self) -> impl Future<Output = Result<i32>>;

    /// Receive a NUL-terminated string in the connection encoding.
    fn recv_string(&mut self) -> impl Future<Output = Result<String>>;

    /// Receive exactly `len` raw bytes.
    fn recv_bytes(&mut self, len: usize) -> impl Future<Output = Result<Bytes>>;
}

impl<P> V2Transport for &mut P where P: V2Transport {
    fn send_u8(&mut self, b: u8) {
        P::send_u8(self, b);
    }

    fn send_i16(&mut self, v: i16) {
        P::send_i16(self, v);
    }

    fn send_i32(&mut self, v: i32) {
        P::send_i32(self, v);
    }

    fn send_str(&mut self, s: &str) {
        P::send_str(self, s);
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        P::send_bytes(self, bytes);
    }

    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        P::flush(self)
    }

    fn recv_u8(&mut self) -> impl Future<Output = Result<u8>> {
        P::recv_u8(self)
    }

    fn recv_i16(&mut self) -> impl Future<Output = Result<i16>> {
        P::recv_i16(self)
    }

    fn recv_i32(&mut self) -> impl Future<Output = Result<i32>> {
        P::recv_i32(self)
    }

    fn recv_string(&mut self) -> impl Future<Output = Result<String>> {
        P::recv_string(self)
    }

    fn recv_bytes(&mut self, len: usize) -> impl Future<Output = Result<Bytes>> {
        P::recv_bytes(self, len)
    }
}
