use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Configure failed: {0}")]
    Configure(String),

    #[error("No such codec: {0}")]
    NotFound(String),

    #[error("Start failed: {0}")]
    Start(String),

    #[error("Buffer not ready: {0}")]
    BufferNotReady(String),

    #[error("Invalid buffer index: {0}")]
    InvalidBufferIndex(usize),

    #[error("Invalid codec state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Frame source error: {0}")]
    Source(String),
}

impl CodecError {
    /// Errors that clear up by trying the same operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, CodecError::BufferNotReady(_))
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CodecError::BufferNotReady("slot 2".to_string()).is_transient());
        assert!(!CodecError::Configure("bad mime".to_string()).is_transient());
        assert!(!CodecError::InvalidBufferIndex(7).is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.yuv");
        let codec_error: CodecError = io_error.into();
        assert!(matches!(codec_error, CodecError::Io(_)));
        assert!(codec_error.to_string().contains("missing.yuv"));
    }
}
