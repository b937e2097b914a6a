//! Connection handling dengan buffered I/O
//!
//! Satu `Connection` membungkus satu mio `TcpStream` non-blocking:
//! read buffer yang di-drain sampai `WouldBlock` (edge-triggered),
//! dan write buffer untuk data yang belum terkirim.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use mio::net::TcpStream;

/// Read chunk size per syscall
const READ_CHUNK_SIZE: usize = 16 * 1024; // 16KB

/// Socket receive buffer for long-lived stream connections
pub(crate) const STREAM_RECV_BUFFER: usize = 256 * 1024; // 256KB

/// Outcome of draining the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadStatus {
    /// Socket drained, peer still open.
    Open,
    /// Peer closed its write half.
    Eof,
}

pub(crate) struct Connection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    read_pos: usize,
    write_buffer: Vec<u8>,
    connected: bool,
}

impl Connection {
    /// Start a non-blocking connect. Completion is observed via [`poll_connected`].
    ///
    /// [`poll_connected`]: Connection::poll_connected
    pub fn open(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        // Disable Nagle's algorithm untuk lower latency
        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            read_buffer: Vec::new(),
            read_pos: 0,
            write_buffer: Vec::new(),
            connected: false,
        })
    }

    /// Wrap an accepted server-side stream.
    pub fn accepted(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        Self {
            stream,
            read_buffer: Vec::new(),
            read_pos: 0,
            write_buffer: Vec::new(),
            connected: true,
        }
    }

    /// Underlying stream untuk (de)registrasi di `Poll`
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Check whether a pending connect finished.
    ///
    /// Returns `Ok(false)` while the handshake is still in flight.
    pub fn poll_connected(&mut self) -> io::Result<bool> {
        if self.connected {
            return Ok(true);
        }
        if let Some(e) = self.stream.take_error()? {
            return Err(e);
        }
        match self.stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                Ok(true)
            }
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Enlarge SO_RCVBUF. Errors are ignored, not every platform allows it.
    #[allow(unused_variables)]
    pub fn set_recv_buffer(&self, bytes: usize) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = self.stream.as_raw_fd();
            let optval = bytes as libc::c_int;
            unsafe {
                libc::setsockopt(
                    fd,
                    libc::SOL_SOCKET,
                    libc::SO_RCVBUF,
                    &optval as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
            }
        }
    }

    /// Read everything currently available into the internal buffer.
    pub fn fill_read_buffer(&mut self) -> io::Result<ReadStatus> {
        // Compact buffer jika perlu
        if self.read_pos > 0 {
            self.read_buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => return Ok(ReadStatus::Eof),
                Ok(n) => self.read_buffer.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadStatus::Open),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Get readable data slice (zero-copy)
    #[inline(always)]
    pub fn readable(&self) -> &[u8] {
        &self.read_buffer[self.read_pos..]
    }

    /// Consume n bytes dari read buffer
    #[inline(always)]
    pub fn consume(&mut self, n: usize) {
        self.read_pos += n.min(self.read_buffer.len() - self.read_pos);
    }

    /// Move all unread bytes out of the connection.
    pub fn take_readable(&mut self) -> Vec<u8> {
        let mut data = std::mem::take(&mut self.read_buffer);
        data.drain(..self.read_pos);
        self.read_pos = 0;
        data
    }

    /// Queue data untuk write
    #[inline]
    pub fn queue_write(&mut self, data: &[u8]) {
        self.write_buffer.extend_from_slice(data);
    }

    /// Flush write buffer ke socket sampai habis atau `WouldBlock`.
    pub fn flush_write_buffer(&mut self) -> io::Result<()> {
        if !self.connected {
            return Ok(());
        }

        let mut written = 0;
        while written < self.write_buffer.len() {
            match self.stream.write(&self.write_buffer[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "Failed to write to socket",
                    ));
                }
                Ok(n) => written += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        self.write_buffer.drain(..written);
        Ok(())
    }

    /// Bytes pending in write buffer
    #[inline(always)]
    pub fn write_pending(&self) -> usize {
        self.write_buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::{Duration, Instant};

    /// Spin until the non-blocking connect completes.
    fn wait_connected(conn: &mut Connection) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !conn.poll_connected().unwrap() {
            assert!(Instant::now() < deadline, "connect did not complete");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_write_then_read_until_eof() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let mut byte = [0u8; 1];
            std::io::Read::read_exact(&mut socket, &mut byte).unwrap();
            std::io::Write::write_all(&mut socket, b"pong").unwrap();
            byte[0]
        });

        let mut conn = Connection::open(addr).unwrap();
        wait_connected(&mut conn);
        conn.queue_write(b"?");
        while conn.write_pending() > 0 {
            conn.flush_write_buffer().unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while conn.fill_read_buffer().unwrap() == ReadStatus::Open {
            assert!(Instant::now() < deadline, "peer never closed");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(server.join().unwrap(), b'?');
        assert_eq!(conn.readable(), b"pong");
        conn.consume(2);
        assert_eq!(conn.take_readable(), b"ng".to_vec());
    }
}
