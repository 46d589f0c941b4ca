//! Per-connection MJPEG streaming state.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::broadcast::FrameBroadcaster;
use crate::frame::EncodedFrame;

pub const STREAM_BOUNDARY: &str = "FRAME";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Accepted,
    HeaderSent,
    Streaming,
    Closed,
}

/// One stream client: its own read cursor into the broadcaster and nothing else.
#[derive(Debug)]
pub struct ClientSession {
    peer: SocketAddr,
    last_seq: u64,
    frames_sent: u64,
    state: SessionState,
}

impl ClientSession {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            last_seq: 0,
            frames_sent: 0,
            state: SessionState::Accepted,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Send the multipart response head. Only valid once, from `Accepted`.
    pub fn send_header<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        if self.state != SessionState::Accepted {
            return Err(protocol_error(self.state, "send header"));
        }
        let head = format!(
            "HTTP/1.1 200 OK\r\n\
             Cache-Control: no-cache\r\n\
             Pragma: no-cache\r\n\
             Content-Type: multipart/x-mixed-replace; boundary={}\r\n\r\n",
            STREAM_BOUNDARY
        );
        self.guard(out.write_all(head.as_bytes()).and_then(|_| out.flush()))?;
        self.state = SessionState::HeaderSent;
        Ok(())
    }

    /// Write one complete part for `frame`. A failed write closes the session.
    pub fn send_frame<W: Write>(
        &mut self,
        out: &mut W,
        frame: &EncodedFrame,
        sequence: u64,
    ) -> io::Result<()> {
        match self.state {
            SessionState::HeaderSent | SessionState::Streaming => {}
            state => return Err(protocol_error(state, "send frame")),
        }
        let part = encode_part(frame.as_bytes());
        self.guard(out.write_all(&part).and_then(|_| out.flush()))?;
        self.state = SessionState::Streaming;
        self.last_seq = sequence;
        self.frames_sent += 1;
        Ok(())
    }

    /// Relay frames until the client goes away, the broadcaster closes, or
    /// `shutdown` is set. Only a write failure is reported as an error.
    pub fn stream<W: Write>(
        &mut self,
        out: &mut W,
        frames: &FrameBroadcaster,
        shutdown: &AtomicBool,
    ) -> io::Result<()> {
        if self.state == SessionState::Accepted {
            self.send_header(out)?;
        }
        while !shutdown.load(Ordering::SeqCst) {
            let Some((frame, sequence)) = frames.await_next(self.last_seq) else {
                break;
            };
            self.send_frame(out, &frame, sequence)?;
        }
        self.close();
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn guard(&mut self, result: io::Result<()>) -> io::Result<()> {
        if result.is_err() {
            self.close();
        }
        result
    }
}

/// Boundary line, part headers, payload and trailing separator as one buffer.
pub fn encode_part(payload: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        STREAM_BOUNDARY,
        payload.len()
    );
    let mut part = Vec::with_capacity(head.len() + payload.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part
}

fn protocol_error(state: SessionState, action: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Other,
        format!("cannot {} in state {:?}", action, state),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    /// Accepts `budget` bytes, then fails like a reset connection.
    struct FlakyWriter {
        written: Vec<u8>,
        budget: usize,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer gone"));
            }
            let n = buf.len().min(self.budget);
            self.written.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn part_layout_matches_multipart_framing() {
        let part = encode_part(b"\xff\xd8jpeg");
        assert_eq!(
            part,
            b"--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: 6\r\n\r\n\xff\xd8jpeg\r\n".to_vec()
        );
    }

    #[test]
    fn state_advances_through_header_and_frames() -> io::Result<()> {
        let mut session = ClientSession::new(peer());
        let mut out = Vec::new();
        assert_eq!(session.state(), SessionState::Accepted);
        assert!(session.send_frame(&mut out, &EncodedFrame::new(vec![1]), 1).is_err());

        session.send_header(&mut out)?;
        assert_eq!(session.state(), SessionState::HeaderSent);
        assert!(String::from_utf8_lossy(&out)
            .contains("Content-Type: multipart/x-mixed-replace; boundary=FRAME\r\n"));
        assert!(session.send_header(&mut out).is_err());

        session.send_frame(&mut out, &EncodedFrame::new(vec![1, 2, 3]), 4)?;
        assert_eq!(session.state(), SessionState::Streaming);
        assert_eq!(session.last_seq(), 4);
        assert_eq!(session.frames_sent(), 1);
        assert!(out.ends_with(&encode_part(&[1, 2, 3])));
        Ok(())
    }

    #[test]
    fn write_failure_closes_session() -> io::Result<()> {
        let mut session = ClientSession::new(peer());
        let mut out = FlakyWriter {
            written: Vec::new(),
            budget: 4096,
        };
        session.send_header(&mut out)?;
        let big = EncodedFrame::new(vec![0u8; 8192]);
        assert!(session.send_frame(&mut out, &big, 1).is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.frames_sent(), 0);
        assert_eq!(out.written.len(), 4096);
        Ok(())
    }

    #[test]
    fn stream_ends_when_broadcaster_closes() -> io::Result<()> {
        let frames = Arc::new(FrameBroadcaster::new());
        frames.publish(EncodedFrame::new(vec![7]));

        let closer = {
            let frames = frames.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(50));
                frames.close();
            })
        };

        let mut session = ClientSession::new(peer());
        let mut out = Vec::new();
        session.stream(&mut out, &frames, &AtomicBool::new(false))?;
        closer.join().expect("closer thread");

        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.frames_sent(), 1);
        assert_eq!(session.last_seq(), 1);
        assert!(out.ends_with(&encode_part(&[7])));
        Ok(())
    }
}
