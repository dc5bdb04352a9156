use thiserror::Error;

/// Failures while opening the decode path. Any of these stops the live feed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecoderSetupError {
    #[error("Could not open video input: {0}")]
    OpenInput(String),
    #[error("No usable video stream found")]
    NoVideoStream,
    #[error("Could not open output conversion: {0}")]
    OpenConversion(String),
}

/// A single coded unit that could not be decoded. The decoder moves on.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Failed to decode unit: {0}")]
pub struct DecodeError(pub String);

/// Errors from the external encoder process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncoderError {
    #[error("Could not start video converter: {0}")]
    SpawnFailed(String),
    #[error("Could not prepare video converter input")]
    PipeUnavailable,
    #[error("Failed to write to video converter: {0}")]
    WriteFailed(String),
    #[error("Failed to wait for video converter: {0}")]
    WaitFailed(String),
    #[error("Failed to create data directory: {0}")]
    StorageError(String),
}

/// Errors surfaced by the recording coordinator to its callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error("Recording coordinator is not running")]
    CoordinatorUnavailable,
}

/// Errors from starting or joining the live feed. Recording failures travel
/// through `RecorderError` on the coordinator handle instead.
#[derive(Error, Debug)]
pub enum VideoError {
    #[error(transparent)]
    Setup(#[from] DecoderSetupError),
    #[error("Packet source failed: {0}")]
    Source(#[from] std::io::Error),
    #[error("Decoder thread panicked")]
    DecoderPanicked,
}
