//! Framed artifact extraction from the builder's output stream.
//!
//! The builder interleaves human-readable log lines with the artifact
//! payload on one byte stream. The build emits two fixed sentinel codes
//! around a base64-encoded tar to disambiguate; this module recovers the
//! clean tar from in between.

use tokio::{io::AsyncWriteExt, sync::mpsc};
use tracing::*;

use relforge_tasks::TaskLogHandle;

use crate::{errors::ExtractError, traits::BuildMessage};

/// Code the build emits immediately before the base64 artifact payload.
pub const ARTIFACTS_TAR_START_CODE: &[u8] =
    b"1EA01F53E0277546E1B17267F29A60B3CD4DC12744C2FA2BF0897065DC3749F3";

/// Code the build emits immediately after the base64 artifact payload.
pub const ARTIFACTS_TAR_STOP_CODE: &[u8] =
    b"A2F00DB0DEE3540E246B75B872D64773DF67BC51C5D36D50FA6978E2FFDA7D43";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Scanning for the first byte of the start code.
    SearchStart,

    /// Partially matched the start code.
    MatchStart,

    /// Inside the payload, watching for the first byte of the stop code.
    Data,

    /// Partially matched the stop code; matched bytes are buffered so a
    /// mismatch can emit them as payload.
    MatchStop,

    /// Full stop code seen; the payload is complete.
    Finished,
}

/// Byte-level state machine recovering the framed payload.
///
/// Payload bytes buffered as a potential stop-code prefix are emitted
/// exactly once, in order, when the match falls through; a fully matched
/// stop code is never emitted.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    cursor: usize,
    buffered: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            state: DecodeState::SearchStart,
            cursor: 0,
            buffered: Vec::new(),
        }
    }

    /// Feeds a chunk of build output, appending recovered payload bytes to
    /// `out`. Returns `true` once the stop code has fully matched; further
    /// input is ignored from then on.
    pub fn feed(&mut self, input: &[u8], out: &mut Vec<u8>) -> bool {
        for &b in input {
            match self.state {
                DecodeState::SearchStart => {
                    if b == ARTIFACTS_TAR_START_CODE[0] {
                        self.state = DecodeState::MatchStart;
                        self.cursor = 1;
                    }
                }

                DecodeState::MatchStart => {
                    if b == ARTIFACTS_TAR_START_CODE[self.cursor] {
                        self.cursor += 1;
                        if self.cursor == ARTIFACTS_TAR_START_CODE.len() {
                            self.state = DecodeState::Data;
                            self.cursor = 0;
                        }
                    } else if b == ARTIFACTS_TAR_START_CODE[0] {
                        // the mismatch byte may itself start the code
                        self.cursor = 1;
                    } else {
                        self.state = DecodeState::SearchStart;
                        self.cursor = 0;
                    }
                }

                DecodeState::Data => self.feed_payload_byte(b, out),

                DecodeState::MatchStop => {
                    if b == ARTIFACTS_TAR_STOP_CODE[self.cursor] {
                        self.buffered.push(b);
                        self.cursor += 1;
                        if self.cursor == ARTIFACTS_TAR_STOP_CODE.len() {
                            // the matched code itself is never emitted
                            self.buffered.clear();
                            self.state = DecodeState::Finished;
                            return true;
                        }
                    } else {
                        // not the stop code after all: what was buffered is
                        // payload, and the mismatch byte is reconsidered
                        out.append(&mut self.buffered);
                        self.cursor = 0;
                        self.state = DecodeState::Data;
                        self.feed_payload_byte(b, out);
                    }
                }

                DecodeState::Finished => return true,
            }
        }

        self.state == DecodeState::Finished
    }

    fn feed_payload_byte(&mut self, b: u8, out: &mut Vec<u8>) {
        if b == ARTIFACTS_TAR_STOP_CODE[0] {
            self.buffered.push(b);
            self.cursor = 1;
            self.state = DecodeState::MatchStop;
        } else {
            out.push(b);
        }
    }

    /// Validates the machine's state at end of input.
    pub fn finish(&self) -> Result<(), ExtractError> {
        match self.state {
            DecodeState::Finished => Ok(()),
            DecodeState::SearchStart | DecodeState::MatchStart => {
                Err(ExtractError::NoArtifactStream)
            }
            DecodeState::Data | DecodeState::MatchStop => {
                Err(ExtractError::TruncatedArtifactStream)
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Incremental base64 decoder for the framed payload.
///
/// The in-container `base64` tool wraps its output in lines, so ASCII
/// whitespace is stripped before decoding. Bytes are decoded in 4-character
/// blocks; a trailing partial block is flushed by [`Self::finish`].
#[derive(Debug, Default)]
pub struct Base64StreamDecoder {
    carry: Vec<u8>,
}

impl Base64StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of the accumulated input as currently possible.
    pub fn feed(&mut self, input: &[u8]) -> Result<Vec<u8>, ExtractError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        self.carry
            .extend(input.iter().copied().filter(|b| !b.is_ascii_whitespace()));

        let usable = self.carry.len() - self.carry.len() % 4;
        if usable == 0 {
            return Ok(Vec::new());
        }

        let block: Vec<u8> = self.carry.drain(..usable).collect();
        Ok(STANDARD.decode(block)?)
    }

    /// Flushes any trailing partial block. A remainder that is not a whole
    /// base64 quantum is a decode error.
    pub fn finish(&mut self) -> Result<Vec<u8>, ExtractError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        if self.carry.is_empty() {
            return Ok(Vec::new());
        }

        let block = std::mem::take(&mut self.carry);
        Ok(STANDARD.decode(block)?)
    }
}

/// Drains the builder's message stream, recovering and decoding the framed
/// payload into `out` as a clean artifact tar.
///
/// Non-stream messages are forwarded to the task log; a builder-reported
/// error aborts extraction immediately.
pub async fn extract_artifact_stream<W>(
    mut messages: mpsc::Receiver<BuildMessage>,
    mut out: W,
    log: &TaskLogHandle,
) -> Result<(), ExtractError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut frames = FrameDecoder::new();
    let mut base64 = Base64StreamDecoder::new();
    let mut payload = Vec::new();

    while let Some(message) = messages.recv().await {
        match message {
            BuildMessage::Stream(bytes) => {
                payload.clear();
                let finished = frames.feed(&bytes, &mut payload);

                if !payload.is_empty() {
                    let decoded = base64.feed(&payload)?;
                    out.write_all(&decoded).await?;
                }

                if finished {
                    let tail = base64.finish()?;
                    out.write_all(&tail).await?;
                    out.shutdown().await?;
                    debug!("artifact stream extracted");
                    return Ok(());
                }
            }

            BuildMessage::Aux(line) => log.append_line(&line),

            BuildMessage::Error(msg) => return Err(ExtractError::Builder(msg)),
        }
    }

    // input ended before the stop code fully matched
    Err(frames
        .finish()
        .expect_err("unfinished frame must be an error"))
}
