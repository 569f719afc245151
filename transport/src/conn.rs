// A non-blocking TCP stream plus the read/write buffering every resilient
// connection needs: frames go out through a byte queue that drains as the
// socket becomes writable, and bytes come in through a proto::FrameDecoder
// that yields complete frames as they accumulate.

use base::Error;
use mio::net::TcpStream;
use proto::{Frame, FrameDecoder};
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

pub struct Conn {
    stream: TcpStream,
    write_buf: VecDeque<u8>,
    decoder: FrameDecoder,
}

impl Conn {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            write_buf: VecDeque::new(),
            decoder: FrameDecoder::new(),
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn queue_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        let bytes = frame.encode()?;
        self.write_buf.extend(bytes);
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_buf.is_empty()
    }

    /// Write as much of the buffered output as the socket will currently
    /// accept. Returns `Ok(())` whether it wrote everything, a partial
    /// amount, or nothing (WouldBlock) - the caller just tries again on the
    /// next writable event.
    pub fn try_flush(&mut self) -> Result<(), Error> {
        while !self.write_buf.is_empty() {
            let (front, _) = self.write_buf.as_slices();
            match self.stream.write(front) {
                Ok(0) => break,
                Ok(n) => {
                    self.write_buf.drain(0..n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Read whatever is currently available and decode any complete frames.
    pub fn try_read_frames(&mut self) -> Result<Vec<Frame>, Error> {
        let mut buf = [0u8; 16 * 1024];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(base::err("connection closed by peer")),
                Ok(n) => self.decoder.push(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.decoder.drain_complete()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::net::TcpListener as StdTcpListener;
    use std::time::{Duration, Instant};
    use test_log::test;

    fn loopback_pair() -> (Conn, Conn) {
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client_std = std::net::TcpStream::connect(addr).unwrap();
        let (server_std, _) = listener.accept().unwrap();
        client_std.set_nonblocking(true).unwrap();
        server_std.set_nonblocking(true).unwrap();
        (
            Conn::new(TcpStream::from_std(client_std)),
            Conn::new(TcpStream::from_std(server_std)),
        )
    }

    #[test]
    fn frame_round_trips_over_real_loopback_socket() {
        let (mut client, mut server) = loopback_pair();

        let frame = Frame::with_bodies(json!({"message-type": "ping"}), vec![b"payload".to_vec()]);
        client.queue_frame(&frame).unwrap();
        client.try_flush().unwrap();
        assert!(!client.has_pending_writes());

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = Vec::new();
        while received.is_empty() && Instant::now() < deadline {
            received = server.try_read_frames().unwrap();
            if received.is_empty() {
                std::thread::sleep(Duration::from_millis(5));
            }
        }

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].control, frame.control);
        assert_eq!(received[0].bodies, frame.bodies);
    }
}
