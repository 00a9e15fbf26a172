//! Scripted prompt/response protocols.
//!
//! The wallet CLI asks for secrets interactively. Each conversation is a
//! fixed sequence of [`Step`]s run against a [`Session`] with one timeout
//! per step.

use regex::bytes::Regex;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use stakeprobe_types::BlsKey;

use crate::error::Result;
use crate::session::Session;

/// Prompt printed before the account passphrase is read.
pub const PASSPHRASE_PROMPT: &str = "Enter passphrase:";
/// Prompt printed before the passphrase confirmation is read.
pub const REPEAT_PASSPHRASE_PROMPT: &str = "Repeat the passphrase:";
/// Prompt printed before a BLS key file path is read.
pub const BLS_KEY_FILE_PROMPT: &str = "Enter the absolute path to the encrypted bls private key file:";
/// Prompt printed before a BLS key passphrase is read.
pub const BLS_PASSPHRASE_PROMPT: &str = "Enter the bls passphrase:";
/// Header printed before the prompts of each key when several BLS keys are loaded.
pub const BLS_PUBLIC_KEY_HEADER: &str = "For bls public key:";

/// A prompt to wait for.
#[derive(Clone)]
pub struct Prompt {
    description: String,
    pattern: Regex,
}

impl Prompt {
    /// Match `text` literally, ignoring case.
    pub fn literal(text: &str) -> Self {
        let pattern = Regex::new(&format!("(?i){}", regex::escape(text)))
            .expect("escaped literal is a valid regex");
        Self {
            description: text.to_string(),
            pattern,
        }
    }

    /// Match a caller-supplied pattern.
    pub fn pattern(pattern: Regex) -> Self {
        Self {
            description: pattern.to_string(),
            pattern,
        }
    }

    /// Compiled pattern.
    pub fn regex(&self) -> &Regex {
        &self.pattern
    }
}

impl fmt::Debug for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prompt({:?})", self.description)
    }
}

/// One step of a protocol.
#[derive(Clone)]
pub enum Step {
    /// Wait for a prompt
    Expect(Prompt),
    /// Answer with a line of input
    Send(String),
    /// Wait for the child to close its output; captures the remaining text
    ExpectEof,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Expect(prompt) => write!(f, "Expect({:?})", prompt.description),
            // Answers are usually secrets.
            Step::Send(_) => f.write_str("Send(***)"),
            Step::ExpectEof => f.write_str("ExpectEof"),
        }
    }
}

/// Ordered prompt/response script.
#[derive(Debug, Clone, Default)]
pub struct Protocol {
    steps: Vec<Step>,
}

impl Protocol {
    /// Create an empty protocol.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an expectation of a literal prompt.
    pub fn expect(mut self, text: &str) -> Self {
        self.steps.push(Step::Expect(Prompt::literal(text)));
        self
    }

    /// Append an answer.
    pub fn send(mut self, line: impl Into<String>) -> Self {
        self.steps.push(Step::Send(line.into()));
        self
    }

    /// Append the end-of-output expectation.
    pub fn expect_eof(mut self) -> Self {
        self.steps.push(Step::ExpectEof);
        self
    }

    /// Append all steps of another protocol.
    pub fn then(mut self, other: Protocol) -> Self {
        self.steps.extend(other.steps);
        self
    }

    /// Steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Passphrase entry with confirmation (`keys add`, `keys generate-bls-key`).
    pub fn new_passphrase(passphrase: &str) -> Self {
        Self::new()
            .expect(PASSPHRASE_PROMPT)
            .send(passphrase)
            .expect(REPEAT_PASSPHRASE_PROMPT)
            .send(passphrase)
    }

    /// Unlocking BLS keys while submitting a validator transaction.
    ///
    /// With several keys the CLI announces each key before asking for its
    /// file; a single key is asked for directly.
    pub fn unlock_bls_keys(keys: &[BlsKey], passphrase: &str) -> Self {
        let announce = keys.len() > 1;
        keys.iter().fold(Self::new(), |protocol, key| {
            let protocol = if announce {
                protocol.expect(&format!("{} {}", BLS_PUBLIC_KEY_HEADER, key.public_key))
            } else {
                protocol
            };
            protocol
                .expect(BLS_KEY_FILE_PROMPT)
                .send(key.encrypted_private_key_path.to_string_lossy().into_owned())
                .expect(BLS_PASSPHRASE_PROMPT)
                .send(passphrase)
        })
    }

    /// Run every step against `session`.
    ///
    /// Returns the text captured by the last `ExpectEof` step, or by the last
    /// `Expect` step when the protocol does not wait for end of output.
    pub async fn run(&self, session: &mut Session, step_timeout: Duration) -> Result<String> {
        let mut captured = String::new();
        for (index, step) in self.steps.iter().enumerate() {
            debug!(session = %session.label(), index, step = ?step, "protocol step");
            match step {
                Step::Expect(prompt) => {
                    captured = session.expect(prompt.regex(), step_timeout).await?;
                }
                Step::Send(line) => session.send_line(line).await?,
                Step::ExpectEof => {
                    captured = session.expect_eof(step_timeout).await?;
                }
            }
        }
        Ok(captured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalletError;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Plays a wallet that prints `prompts` in order, reading one line of
    /// input after each prompt that asks for something, then prints `tail`.
    fn fake_wallet(prompts: Vec<(&'static str, bool)>, tail: &'static str) -> (Session, tokio::task::JoinHandle<Vec<String>>) {
        let (child_side, our_side) = duplex(4096);
        let (read_half, write_half) = tokio::io::split(our_side);
        let (child_read, mut child_write) = tokio::io::split(child_side);
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(child_read).lines();
            let mut answers = Vec::new();
            for (prompt, reads) in prompts {
                child_write.write_all(prompt.as_bytes()).await.unwrap();
                child_write.write_all(b"\n").await.unwrap();
                if reads {
                    answers.push(lines.next_line().await.unwrap().unwrap_or_default());
                }
            }
            child_write.write_all(tail.as_bytes()).await.unwrap();
            answers
        });
        (Session::from_streams("fake", read_half, write_half), handle)
    }

    #[tokio::test]
    async fn test_new_passphrase_protocol() {
        let (mut session, wallet) = fake_wallet(
            vec![(PASSPHRASE_PROMPT, true), (REPEAT_PASSPHRASE_PROMPT, true)],
            "",
        );
        let protocol = Protocol::new_passphrase("secret").expect_eof();
        protocol.run(&mut session, Duration::from_secs(1)).await.unwrap();
        assert_eq!(wallet.await.unwrap(), vec!["secret", "secret"]);
    }

    #[tokio::test]
    async fn test_single_bls_key_protocol_captures_receipt() {
        let (mut session, wallet) = fake_wallet(
            vec![(BLS_KEY_FILE_PROMPT, true), (BLS_PASSPHRASE_PROMPT, true)],
            "{\"transaction-receipt\": \"0xabc\"}\n",
        );
        let keys = vec![BlsKey::new("aa11", "/tmp/_Test_key_bls0.key")];
        let protocol = Protocol::unlock_bls_keys(&keys, "pw").expect_eof();
        let output = protocol.run(&mut session, Duration::from_secs(1)).await.unwrap();
        assert!(output.contains("transaction-receipt"));
        assert_eq!(wallet.await.unwrap(), vec!["/tmp/_Test_key_bls0.key", "pw"]);
    }

    #[tokio::test]
    async fn test_many_bls_keys_protocol_announces_each_key() {
        let (mut session, wallet) = fake_wallet(
            vec![
                ("For bls public key: aa11", false),
                (BLS_KEY_FILE_PROMPT, true),
                (BLS_PASSPHRASE_PROMPT, true),
                ("For bls public key: bb22", false),
                (BLS_KEY_FILE_PROMPT, true),
                (BLS_PASSPHRASE_PROMPT, true),
            ],
            "{}",
        );
        let keys = vec![
            BlsKey::new("aa11", "/keys/a.key"),
            BlsKey::new("bb22", "/keys/b.key"),
        ];
        let protocol = Protocol::unlock_bls_keys(&keys, "pw").expect_eof();
        assert_eq!(protocol.steps().len(), 2 * 5 + 1);
        protocol.run(&mut session, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            wallet.await.unwrap(),
            vec!["/keys/a.key", "pw", "/keys/b.key", "pw"]
        );
    }

    #[tokio::test]
    async fn test_protocol_violation_is_reported() {
        let (mut session, _wallet) = fake_wallet(vec![("Error: bad key", false)], "");
        let protocol = Protocol::new_passphrase("secret");
        let err = protocol
            .run(&mut session, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_prompt_is_case_insensitive_literal() {
        let prompt = Prompt::literal("enter passphrase:");
        assert!(prompt.regex().is_match(b"Enter passphrase:\r\n"));
        let dotted = Prompt::literal("a.b");
        assert!(!dotted.regex().is_match(b"axb"));
    }

    #[test]
    fn test_send_steps_are_redacted_in_debug() {
        let protocol = Protocol::new_passphrase("topsecret");
        let rendered = format!("{:?}", protocol);
        assert!(!rendered.contains("topsecret"));
    }
}
