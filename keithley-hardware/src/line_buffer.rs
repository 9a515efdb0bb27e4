//! Response framing shared by the byte-stream drivers

use keithley_core::{Result, SmuError};
use std::pin::Pin;
use std::task::Poll;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// Longest unterminated response accepted before the link is declared garbled
pub(crate) const MAX_LINE_LEN: usize = 64 * 1024;

/// Read timeouts a late reply is given to show up before it is written off
const LATE_REPLY_TIMEOUTS: u32 = 5;

/// Accumulates raw bytes and splits them into `\n`-terminated lines
///
/// Also remembers how many reads timed out: the instrument still owes those
/// replies, and they must be discarded before the next command is sent or
/// every later query would get the previous one's answer.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
    unanswered: usize,
}

impl LineBuffer {
    /// Append bytes read from the link
    ///
    /// Fails with [`SmuError::Protocol`] once the unterminated tail exceeds
    /// [`MAX_LINE_LEN`]; the buffer is emptied in that case.
    pub(crate) fn extend(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);

        let tail = match self.pending.iter().rposition(|&b| b == b'\n') {
            Some(end) => self.pending.len() - end - 1,
            None => self.pending.len(),
        };
        if tail > MAX_LINE_LEN {
            self.pending.clear();
            error!("Response exceeded {} bytes without a terminator", MAX_LINE_LEN);
            return Err(SmuError::Protocol(format!(
                "Response exceeded {} bytes without a terminator",
                MAX_LINE_LEN
            )));
        }

        Ok(())
    }

    /// Pop the next complete line, without `\n` or a trailing `\r`
    ///
    /// Invalid UTF-8 is replaced rather than rejected; the proxy's parsers
    /// report the resulting garbage as a protocol error.
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }

    /// Drop everything buffered, including owed replies
    pub(crate) fn clear(&mut self) {
        self.pending.clear();
        self.unanswered = 0;
    }

    /// Read one line from `reader`, giving up after `wait`
    ///
    /// A timeout is recorded as an owed reply for [`LineBuffer::resync`].
    pub(crate) async fn read_line<R>(&mut self, reader: &mut R, wait: Duration) -> Result<String>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let result = timeout(wait, self.fill_line(reader)).await;
        match result {
            Ok(line) => line,
            Err(_) => {
                self.unanswered += 1;
                error!("Read timeout");
                Err(SmuError::Timeout("Read operation timed out".to_string()))
            }
        }
    }

    /// Bring the link back to a clean request/response boundary
    ///
    /// Waits up to `LATE_REPLY_TIMEOUTS` read timeouts for replies whose
    /// queries already timed out and throws them away, then discards
    /// whatever else is buffered or immediately readable. Never blocks when
    /// nothing is owed.
    pub(crate) async fn resync<R>(&mut self, reader: &mut R, wait: Duration) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let owed = std::mem::take(&mut self.unanswered);
        if owed > 0 {
            debug!("Waiting for {} late reply(ies) before the next command", owed);
            let drained = timeout(wait * LATE_REPLY_TIMEOUTS, async {
                for _ in 0..owed {
                    let line = self.fill_line(reader).await?;
                    warn!("Discarded late reply: {}", line);
                }
                Ok::<_, SmuError>(())
            })
            .await;

            match drained {
                Ok(result) => result?,
                Err(_) => warn!("Late reply never arrived; continuing"),
            }
        }

        if !self.pending.is_empty() {
            debug!("Discarding {} unsolicited buffered bytes", self.pending.len());
            self.pending.clear();
        }

        let mut chunk = [0u8; 256];
        while let Some(read) = poll_read_once(reader, &mut chunk).await {
            match read {
                Ok(0) => {
                    warn!("Instrument closed the link");
                    return Err(SmuError::DeviceDisconnected(
                        "Link closed by instrument".to_string(),
                    ));
                }
                Ok(n) => debug!("Discarded {} unsolicited bytes", n),
                Err(e) => {
                    error!("Read error: {}", e);
                    return Err(SmuError::Link(format!("Read error: {}", e)));
                }
            }
        }

        Ok(())
    }

    async fn fill_line<R>(&mut self, reader: &mut R) -> Result<String>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut chunk = [0u8; 256];
        loop {
            if let Some(line) = self.next_line() {
                return Ok(line);
            }
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    warn!("Instrument closed the link");
                    return Err(SmuError::DeviceDisconnected(
                        "Link closed by instrument".to_string(),
                    ));
                }
                Ok(n) => self.extend(&chunk[..n])?,
                Err(e) => {
                    error!("Read error: {}", e);
                    return Err(SmuError::Link(format!("Read error: {}", e)));
                }
            }
        }
    }
}

/// Read whatever is available right now; `None` if the read would block
async fn poll_read_once<R>(reader: &mut R, chunk: &mut [u8]) -> Option<std::io::Result<usize>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    std::future::poll_fn(|cx| {
        let mut buf = ReadBuf::new(&mut *chunk);
        match Pin::new(&mut *reader).poll_read(cx, &mut buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Some(Ok(buf.filled().len()))),
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Ready(None),
        }
    })
    .await
}
