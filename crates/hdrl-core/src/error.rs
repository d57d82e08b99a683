use thiserror::Error;

#[derive(Error, Debug)]
pub enum HdrlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Null input: {0}")]
    NullInput(String),

    #[error("Illegal input: {0}")]
    IllegalInput(String),

    #[error("{what} {index} out of range (valid: {lo}..={hi})")]
    AccessOutOfRange {
        what: &'static str,
        index: usize,
        lo: usize,
        hi: usize,
    },

    #[error("Incompatible input: {0}")]
    IncompatibleInput(String),

    #[error("File I/O failure: {0}")]
    FileIo(String),

    #[error("Unsupported mode: {0}")]
    UnsupportedMode(String),

    #[error("Image format error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Collapse failed in {failed} of {total} blocks: {source}")]
    CollapseFailed {
        failed: usize,
        total: usize,
        #[source]
        source: Box<HdrlError>,
    },
}

pub type Result<T> = std::result::Result<T, HdrlError>;
