use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForensicsError {
    #[error("Image loading error: {0}")]
    ImageLoad(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to re-encode image: {0}")]
    Encode(String),

    #[error("Could not allocate {width}x{height} raster for {module}")]
    Rendering {
        module: &'static str,
        width: u32,
        height: u32,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Pixel buffer holds {actual} samples, expected {expected}")]
    InvalidPixelBuffer { expected: usize, actual: usize },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ForensicsError>;
