use thiserror::Error;

pub type Result<T> = std::result::Result<T, GradError>;

/// Error taxonomy for the trainable-pipeline core.
///
/// The split between `TransientCall` and `Request` mirrors the retry policy:
/// transient failures are retried with backoff up to a bounded attempt count,
/// request failures abort the single forward call immediately. Parse failures
/// never appear here: they are retried by resubmitting the whole model call,
/// and once exhausted the generator returns a parse-failed output instead of
/// raising.
#[derive(Error, Debug)]
pub enum GradError {
    /// Transient model-call failure that survived every retry attempt.
    #[error("model call failed after {attempts} attempts: {message}")]
    TransientCall { attempts: u32, message: String },

    /// Fatal request failure (malformed payload, auth). Never retried.
    #[error("model rejected request: {0}")]
    Request(String),

    /// A prompt template referenced an input that was not bound.
    #[error("prompt render failed: missing required input `{0}`")]
    MissingInput(String),

    /// The backward engine could not synthesize feedback for one edge.
    /// Dropped per edge by the backward pass, never fatal to a batch.
    #[error("feedback synthesis failed: {0}")]
    FeedbackSynthesis(String),

    /// The batch was cancelled before the optimizer barrier was reached.
    #[error("batch cancelled after {completed} of {total} examples")]
    Cancelled { completed: usize, total: usize },

    /// Pipeline wiring error (empty container, unknown parameter, ...).
    #[error("invalid pipeline configuration: {0}")]
    Config(String),
}
