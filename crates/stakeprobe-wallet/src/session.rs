//! Interactive session with a child process.
//!
//! A session reads everything the child writes (stdout and stderr merged, in
//! arrival order) into a buffer and lets the caller block until a pattern
//! shows up, in the style of `expect(1)`. Any pair of byte streams can back a
//! session, which is how tests script a fake wallet.

use regex::bytes::Regex;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{Result, WalletError};

const READ_CHUNK: usize = 4096;

/// Bidirectional byte-stream session.
pub struct Session {
    label: String,
    output: mpsc::UnboundedReceiver<Vec<u8>>,
    input: Box<dyn AsyncWrite + Send + Unpin>,
    buffer: Vec<u8>,
    eof: bool,
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
}

impl Session {
    /// Build a session over an output stream and an input stream.
    pub fn from_streams<R, W>(label: impl Into<String>, output: R, input: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let label = label.into();
        let readers = vec![spawn_reader(output, tx, label.clone())];
        Self {
            label,
            output: rx,
            input: Box::new(input),
            buffer: Vec::new(),
            eof: false,
            child: None,
            readers,
        }
    }

    /// Build a session over a spawned child with piped stdin, stdout and stderr.
    pub fn from_child(label: impl Into<String>, mut child: Child) -> Result<Self> {
        let label = label.into();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WalletError::Io(format!("{} missing stdout pipe", label)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WalletError::Io(format!("{} missing stderr pipe", label)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| WalletError::Io(format!("{} missing stdin pipe", label)))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let readers = vec![
            spawn_reader(stdout, tx.clone(), label.clone()),
            spawn_reader(stderr, tx, label.clone()),
        ];

        Ok(Self {
            label,
            output: rx,
            input: Box::new(stdin),
            buffer: Vec::new(),
            eof: false,
            child: Some(child),
            readers,
        })
    }

    /// Session label used in logs and errors.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Output received but not yet consumed by an expectation.
    pub fn pending_output(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    /// Block until `pattern` matches the unconsumed output.
    ///
    /// Returns the text preceding the match; output up to the end of the
    /// match is consumed.
    pub async fn expect(&mut self, pattern: &Regex, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(m) = pattern.find(&self.buffer) {
                let (start, end) = (m.start(), m.end());
                let before = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
                self.buffer.drain(..end);
                debug!(session = %self.label, pattern = %pattern, "matched");
                return Ok(before);
            }
            if self.eof {
                return Err(WalletError::UnexpectedEof {
                    waiting_for: pattern.to_string(),
                    output: self.pending_output(),
                });
            }
            if !self.fill(deadline).await? {
                return Err(WalletError::Timeout {
                    waiting_for: pattern.to_string(),
                    timeout,
                    output: self.pending_output(),
                });
            }
        }
    }

    /// Block until the child closes its output; returns everything unconsumed.
    pub async fn expect_eof(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        while !self.eof {
            if !self.fill(deadline).await? {
                return Err(WalletError::Timeout {
                    waiting_for: "end of output".to_string(),
                    timeout,
                    output: self.pending_output(),
                });
            }
        }
        let text = self.pending_output();
        self.buffer.clear();
        Ok(text)
    }

    /// Write a line to the child's input.
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        self.input.write_all(line.as_bytes()).await?;
        self.input.write_all(b"\n").await?;
        self.input.flush().await?;
        Ok(())
    }

    /// Wait for the child to exit (sessions over plain streams return `None`).
    pub async fn wait(mut self) -> Result<Option<ExitStatus>> {
        // Close stdin so a child blocked on input sees EOF.
        let _ = self.input.shutdown().await;
        for reader in self.readers.drain(..) {
            if let Err(e) = reader.await {
                warn!(session = %self.label, error = %e, "output reader task failed");
            }
        }
        match self.child.take() {
            Some(mut child) => Ok(Some(child.wait().await?)),
            None => Ok(None),
        }
    }

    /// Receive one chunk before `deadline`. Returns `false` on timeout.
    async fn fill(&mut self, deadline: Instant) -> Result<bool> {
        match tokio::time::timeout_at(deadline, self.output.recv()).await {
            Ok(Some(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            }
            Ok(None) => {
                self.eof = true;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
        }
        for reader in &self.readers {
            reader.abort();
        }
    }
}

fn spawn_reader<R>(mut stream: R, tx: mpsc::UnboundedSender<Vec<u8>>, label: String) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(session = %label, error = %e, "output stream closed with error");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};

    fn pattern(p: &str) -> Regex {
        Regex::new(p).unwrap()
    }

    #[tokio::test]
    async fn test_expect_returns_text_before_match() {
        let (child_side, our_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(our_side);
        let (_child_read, mut child_write) = tokio::io::split(child_side);

        let mut session = Session::from_streams("test", read_half, write_half);
        child_write.write_all(b"banner\nEnter passphrase:\n").await.unwrap();

        let before = session
            .expect(&pattern("(?i)enter passphrase:"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(before, "banner\n");
        assert_eq!(session.pending_output(), "\n");
    }

    #[tokio::test]
    async fn test_expect_times_out() {
        let (child_side, our_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(our_side);
        let (_child_read, mut child_write) = tokio::io::split(child_side);

        let mut session = Session::from_streams("test", read_half, write_half);
        child_write.write_all(b"something else").await.unwrap();

        let err = session
            .expect(&pattern("passphrase"), Duration::from_millis(50))
            .await
            .unwrap_err();
        match err {
            WalletError::Timeout { output, .. } => assert_eq!(output, "something else"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_expect_fails_on_eof() {
        let (child_side, our_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(our_side);
        let mut session = Session::from_streams("test", read_half, write_half);
        drop(child_side);

        let err = session
            .expect(&pattern("passphrase"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnexpectedEof { .. }));
    }

    #[tokio::test]
    async fn test_send_line_and_expect_eof() {
        let (child_side, our_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(our_side);
        let (child_read, mut child_write) = tokio::io::split(child_side);

        let child = tokio::spawn(async move {
            let mut lines = BufReader::new(child_read).lines();
            child_write.write_all(b"Enter passphrase:\n").await.unwrap();
            let answer = lines.next_line().await.unwrap().unwrap();
            child_write
                .write_all(format!("{{\"echo\": \"{}\"}}\n", answer).as_bytes())
                .await
                .unwrap();
        });

        let mut session = Session::from_streams("test", read_half, write_half);
        session
            .expect(&pattern("Enter passphrase:"), Duration::from_secs(1))
            .await
            .unwrap();
        session.send_line("hunter2").await.unwrap();
        child.await.unwrap();

        let rest = session.expect_eof(Duration::from_secs(1)).await.unwrap();
        assert_eq!(rest.trim(), "{\"echo\": \"hunter2\"}");
        assert!(session.wait().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_pattern_split_across_chunks() {
        let (child_side, our_side) = duplex(1024);
        let (read_half, write_half) = tokio::io::split(our_side);
        let (_child_read, mut child_write) = tokio::io::split(child_side);

        let mut session = Session::from_streams("test", read_half, write_half);
        let writer = tokio::spawn(async move {
            child_write.write_all(b"Enter pass").await.unwrap();
            child_write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            child_write.write_all(b"phrase:\n").await.unwrap();
            child_write
        });

        session
            .expect(&pattern("Enter passphrase:"), Duration::from_secs(1))
            .await
            .unwrap();
        drop(writer.await.unwrap());
    }
}
