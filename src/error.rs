use std::path::PathBuf;

/// Failures surfaced by the core pipeline.
///
/// Corpus problems and shape violations are fatal by design: a shape mismatch
/// means the windowing or transform stage produced something other than the
/// fixed `(3|1, 224, 224)` layout, which is a defect rather than a data-quality
/// issue. Frame reads and pseudo-label writes are never retried or skipped,
/// since dropping a frame would desynchronize the flat index arithmetic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("corpus configuration error: {0}")]
    Configuration(String),

    #[error("batch shape mismatch: expected per-frame shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to encode {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("i/o failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("model failure: {0}")]
    Model(anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Model(error)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
