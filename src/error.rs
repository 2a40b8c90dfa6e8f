use thiserror::Error;

/// Failures scoped to a single chapter. The fill loop logs these, skips the
/// chapter and moves on; they never abort the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChapterError {
    #[error("Error fetching chapter {volume} - {number}")]
    Fetch { volume: String, number: String },

    #[error("Unknown chapter type, cannot convert this chapter")]
    UnknownKind,

    #[error("Image node references missing attachment '{0}'")]
    MissingAttachment(String),
}

/// Failures scoped to a single image resource. The serializer logs these and
/// omits the image; the chapter text is unaffected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Error 404: {url}. Image not found, skipping image.")]
    NotFound { url: String },

    #[error("Error {status}: {url}. Failed to fetch image, skipping image.")]
    Fetch { status: u16, url: String },

    #[error("Failed to fetch image ({detail}), skipping image.")]
    Transport { detail: String },

    #[error("Something is wrong with the image, skipping image.")]
    Corrupt,
}
