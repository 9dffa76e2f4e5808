//! Release pipeline error types.

use relforge_kv::KvError;

/// The main error type for release pipeline operations. Each variant names
/// the step that failed; the first failing step fails the whole job.
#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("unable to clone git repository: {0}")]
    Clone(anyhow::Error),

    #[error("signature verification failed: {0}")]
    SignatureVerification(anyhow::Error),

    #[error("unable to write build context: {0}")]
    Context(anyhow::Error),

    #[error("unable to run artifact build: {0}")]
    Build(anyhow::Error),

    #[error("artifact stream: {0}")]
    ArtifactStream(#[from] ExtractError),

    #[error("unable to publish release artifacts: {0}")]
    Publish(anyhow::Error),

    #[error("release configuration: {0}")]
    Config(String),

    #[error("storage: {0}")]
    Storage(#[from] KvError),

    #[error("malformed configuration record: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A type alias for `Result<T, ReleaseError>`.
pub type ReleaseResult<T> = Result<T, ReleaseError>;

/// Errors from the framed artifact extractor.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The build output ended without ever producing the start code.
    #[error("no artifact stream in build output")]
    NoArtifactStream,

    /// The build output ended between the start and stop codes.
    #[error("artifact stream truncated before stop code")]
    TruncatedArtifactStream,

    /// The builder reported a failure mid-stream.
    #[error("builder reported error: {0}")]
    Builder(String),

    /// The framed payload was not valid base64.
    #[error("artifact payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Writing the decoded artifact stream failed (the consumer went away).
    #[error("artifact output: {0}")]
    Io(#[from] std::io::Error),
}
