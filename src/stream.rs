//! Buffered socket transport.
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use crate::{Result, transport::V2Transport};

const DEFAULT_BUF_CAPACITY: usize = 1024;

/// Buffered connection to the backend.
#[derive(Debug)]
pub struct BufStream {
    socket: TcpStream,
    read_buf: BytesMut,
    write_buf: BytesMut,
}

impl BufStream {
    /// Wrap an already-connected socket.
    ///
    /// Connection establishment and startup negotiation happen elsewhere;
    /// the stream handed in must be past the startup phase.
    pub fn new(socket: TcpStream) -> Self {
        Self {
            socket,
            read_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
            write_buf: BytesMut::with_capacity(DEFAULT_BUF_CAPACITY),
        }
    }

    /// Read from the socket until at least `n` bytes are buffered.
    async fn fill(&mut self, n: usize) -> io::Result<()> {
        while self.read_buf.len() < n {
            let read = self.socket.read_buf(&mut self.read_buf).await?;
            if read == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        Ok(())
    }
}

impl V2Transport for BufStream {
    fn send_u8(&mut self, b: u8) {
        self.write_buf.put_u8(b);
    }

    fn send_i16(&mut self, v: i16) {
        self.write_buf.put_i16(v);
    }

    fn send_i32(&mut self, v: i32) {
        self.write_buf.put_i32(v);
    }

    fn send_str(&mut self, s: &str) {
        self.write_buf.put(s.as_bytes());
    }

    fn send_bytes(&mut self, bytes: &[u8]) {
        self.write_buf.put(bytes);
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.socket.write_all_buf(&mut self.write_buf).await?;
        self.socket.flush().await
    }

    async fn recv_u8(&mut self) -> Result<u8> {
        self.fill(1).await?;
        Ok(self.read_buf.get_u8())
    }

    async fn recv_i16(&mut self) -> Result<i16> {
        self.fill(2).await?;
        Ok(self.read_buf.get_i16())
    }

    async fn recv_i32(&mut self) -> Result<i32> {
        self.fill(4).await?;
        Ok(self.read_buf.get_i32())
    }

    async fn recv_string(&mut self) -> Result<String> {
        let mut from = 0;
        let end = loop {
            match self.read_buf[from..].iter().position(|b| *b == 0) {
                Some(at) => break from + at,
                None => {
                    from = self.read_buf.len();
                    let read = self.socket.read_buf(&mut self.read_buf).await?;
                    if read == 0 {
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                    }
                }
            }
        };
        let raw = self.read_buf.split_to(end);
        self.read_buf.advance(1);
        Ok(std::str::from_utf8(&raw)?.to_owned())
    }

    async fn recv_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.fill(len).await?;
        Ok(self.read_buf.split_to(len).freeze())
    }
}
