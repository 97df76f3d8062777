//! `Content-Length` framing over stdio.
//!
//! LSP transports JSON-RPC as `Content-Length: N\r\n\r\n{json}` frames.
//! [`FrameReader`] and [`FrameWriter`] work over any async byte stream, so
//! the session runs on real stdio in production and on in-memory pipes in
//! tests.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Upper bound on a single frame body. A work-log document plus protocol
/// overhead fits comfortably; anything larger is a broken peer.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Reads framed JSON-RPC messages from an async byte stream.
pub struct FrameReader<R> {
    input: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input: BufReader::new(input),
        }
    }

    /// Read the next frame.
    ///
    /// `Ok(None)` means the peer closed the stream between frames (clean
    /// shutdown). EOF mid-frame, a missing or unparseable `Content-Length`,
    /// an oversized body, or a body that is not JSON are all errors.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let len = match self.read_content_length().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if len > MAX_FRAME_LEN {
            bail!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit");
        }

        let mut body = vec![0u8; len];
        self.input
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        serde_json::from_slice(&body)
            .context("decoding frame body as JSON")
            .map(Some)
    }

    /// Consume header lines up to the blank separator and return the
    /// announced body length, or `None` on EOF before any header byte.
    async fn read_content_length(&mut self) -> Result<Option<usize>> {
        let mut content_length = None;
        let mut line = String::new();
        let mut mid_headers = false;

        loop {
            line.clear();
            let n = self
                .input
                .read_line(&mut line)
                .await
                .context("reading frame header")?;

            if n == 0 {
                if mid_headers {
                    bail!("stream ended in the middle of frame headers");
                }
                return Ok(None);
            }
            mid_headers = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            // Header names are matched case-insensitively; anything that is
            // not Content-Length (e.g. Content-Type) is skipped.
            if let Some((name, value)) = trimmed.split_once(':')
                && name.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len = value
                    .trim()
                    .parse::<usize>()
                    .context("unparseable Content-Length header")?;
                content_length = Some(len);
            }
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => bail!("frame headers carried no Content-Length"),
        }
    }
}

/// Writes framed JSON-RPC messages to an async byte stream.
pub struct FrameWriter<W> {
    output: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    /// Serialize `msg` and write it as one frame. The announced length is
    /// the body's byte count, not its character count.
    pub async fn write_frame(&mut self, msg: &serde_json::Value) -> Result<()> {
        let body = serde_json::to_vec(msg).context("encoding frame body")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.output
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.output
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.output.flush().await.context("flushing frame")?;
        Ok(())
    }
}
