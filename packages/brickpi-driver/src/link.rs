//! Serial transport: one frame out, one frame back, bounded retries.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use snafu::{ResultExt, Snafu};
use tracing::{trace, warn};

use brickpi_protocol::frame::{Frame, FrameError};

/// Serial line parameters for the board family. The port is opened once
/// and held for the process lifetime.
pub const DEFAULT_PORT: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUD: u32 = 500_000;

/// How long a single blocking read may sit on the port before the deadline
/// is re-checked.
const READ_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Snafu)]
pub enum LinkError {
    #[snafu(display("failed to open serial port {path}"))]
    Open {
        path: String,
        source: serialport::Error,
    },

    #[snafu(transparent)]
    Io { source: io::Error },

    #[snafu(transparent)]
    Frame { source: FrameError },

    #[snafu(display("no complete reply within {timeout:?}"))]
    Timeout { timeout: Duration },
}

impl LinkError {
    /// Timeouts and reply-validation failures are worth resending the same
    /// frame for: a corrupted length byte produces a truncation or length
    /// error from the same wire noise a corrupted payload surfaces as a
    /// checksum mismatch. Anything else is not a transient line condition.
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Timeout { .. } | LinkError::Frame { .. }
        )
    }
}

/// The single owning handle for the shared serial line.
///
/// Exactly one link may exist per physical channel; `&mut self` on every
/// operation enforces the half-duplex one-outstanding-request discipline.
pub struct BoardLink<C> {
    channel: C,
    retried: u64,
}

/// Opens the physical serial port and wraps it in a link.
pub fn open(path: &str, baud: u32) -> Result<BoardLink<Box<dyn serialport::SerialPort>>, LinkError> {
    let port = serialport::new(path, baud)
        .timeout(READ_POLL)
        .open()
        .context(OpenSnafu { path })?;
    Ok(BoardLink::new(port))
}

impl<C: Read + Write> BoardLink<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            retried: 0,
        }
    }

    /// Exchanges resent because of a timeout or checksum failure, over the
    /// life of the link. Diagnostic only; never consulted for control flow
    /// and never reset.
    pub fn retry_count(&self) -> u64 {
        self.retried
    }

    /// Writes one encoded frame. Success means the bytes left the buffer,
    /// nothing more.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<(), LinkError> {
        let raw = frame.encode()?;
        trace!(dest = frame.destination, len = raw.len(), "sending frame");
        self.channel.write_all(&raw)?;
        self.channel.flush()?;
        Ok(())
    }

    /// Blocks until one complete frame is assembled and validated, or the
    /// deadline passes. A partial frame at the deadline is discarded and
    /// reported as a timeout. Returns the frame and the raw byte count.
    pub fn receive_frame(&mut self, timeout: Duration) -> Result<(Frame, usize), LinkError> {
        let deadline = Instant::now() + timeout;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 64];

        loop {
            let expected = Frame::wire_len(&buf);
            if let Some(total) = expected
                && buf.len() >= total
            {
                let frame = Frame::decode(&buf[..total])?;
                trace!(dest = frame.destination, bytes = total, "received frame");
                return Ok((frame, total));
            }

            match self.channel.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    continue;
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                if !buf.is_empty() {
                    warn!(bytes = buf.len(), "discarding partial frame at timeout");
                }
                return TimeoutSnafu { timeout }.fail();
            }
        }
    }

    /// One request/response exchange with up to `attempts` total tries.
    /// Every retry resends the identical frame; only timeouts and checksum
    /// failures are retried.
    pub fn handshake(
        &mut self,
        frame: &Frame,
        timeout: Duration,
        attempts: u32,
    ) -> Result<Frame, LinkError> {
        let mut last = TimeoutSnafu { timeout }.build();
        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                self.retried += 1;
                warn!(
                    dest = frame.destination,
                    attempt, "retrying exchange after transient failure"
                );
            }
            self.send_frame(frame)?;
            match self.receive_frame(timeout) {
                Ok((reply, _)) => return Ok(reply),
                Err(e) if e.is_retryable() => last = e,
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted channel: hands out canned reply bytes and records writes.
    #[derive(Clone, Default)]
    pub(crate) struct MockChannel {
        pub replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        pub written: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl MockChannel {
        pub fn queue_reply(&self, bytes: Vec<u8>) {
            self.replies.lock().unwrap().push_back(bytes);
        }
    }

    impl Read for MockChannel {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.replies.lock().unwrap().pop_front() {
                Some(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        // Push back what did not fit.
                        self.replies
                            .lock()
                            .unwrap()
                            .push_front(bytes[n..].to_vec());
                    }
                    Ok(n)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "no scripted bytes")),
            }
        }
    }

    impl Write for MockChannel {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.lock().unwrap().push(buf.to_vec());
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn ack_frame(board: u8) -> Vec<u8> {
        Frame::new(board, vec![2]).encode().unwrap()
    }

    #[test]
    fn receives_a_frame_split_across_reads() {
        let channel = MockChannel::default();
        let raw = ack_frame(1);
        let (head, tail) = raw.split_at(2);
        channel.queue_reply(head.to_vec());
        channel.queue_reply(tail.to_vec());

        let mut link = BoardLink::new(channel);
        let (frame, received) = link.receive_frame(Duration::from_millis(5)).unwrap();
        assert_eq!(frame.payload, vec![2]);
        assert_eq!(received, raw.len());
    }

    #[test]
    fn partial_frame_at_deadline_is_a_timeout() {
        let channel = MockChannel::default();
        channel.queue_reply(vec![0x01, 0x05]); // header only
        let mut link = BoardLink::new(channel);
        let result = link.receive_frame(Duration::from_millis(2));
        assert!(matches!(result, Err(LinkError::Timeout { .. })));
    }

    #[test]
    fn handshake_resends_the_identical_frame_and_counts_retries() {
        let channel = MockChannel::default();
        let mut link = BoardLink::new(channel.clone());
        let frame = Frame::new(1, vec![2, 32, 0]);

        let result = link.handshake(&frame, Duration::from_millis(1), 2);
        assert!(matches!(result, Err(LinkError::Timeout { .. })));
        assert_eq!(link.retry_count(), 1);

        let written = channel.written.lock().unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0], written[1]);
        assert_eq!(written[0], frame.encode().unwrap());
    }

    #[test]
    fn handshake_retries_after_a_corrupted_length_byte() {
        let channel = MockChannel::default();
        let mut mangled = ack_frame(1);
        // Too small to frame anything; the decoder sees a truncated frame.
        mangled[1] = 2;
        channel.queue_reply(mangled);
        channel.queue_reply(ack_frame(1));

        let mut link = BoardLink::new(channel);
        let frame = Frame::new(1, vec![2, 32, 0]);
        let reply = link.handshake(&frame, Duration::from_millis(5), 2).unwrap();
        assert_eq!(reply.payload, vec![2]);
        assert_eq!(link.retry_count(), 1);
    }

    #[test]
    fn handshake_retries_after_a_checksum_failure() {
        let channel = MockChannel::default();
        let mut corrupted = ack_frame(1);
        *corrupted.last_mut().unwrap() ^= 0xFF;
        channel.queue_reply(corrupted);
        channel.queue_reply(ack_frame(1));

        let mut link = BoardLink::new(channel);
        let frame = Frame::new(1, vec![2, 32, 0]);
        let reply = link.handshake(&frame, Duration::from_millis(5), 2).unwrap();
        assert_eq!(reply.payload, vec![2]);
        assert_eq!(link.retry_count(), 1);
    }
}
