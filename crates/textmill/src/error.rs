//! Error types for textmill.
//!
//! All fallible operations return [`Result`], built on a single error enum.
//! Two rules apply throughout the crate:
//!
//! - System errors (`Io`) bubble up unchanged via `?` - they indicate real
//!   problems the operator needs to see.
//! - Application errors wrap a message and, where available, the underlying
//!   source error so chains are preserved for debugging.
//!
//! Cache errors are special: the cache is an optimization, so callers in the
//! pipeline catch [`TextmillError::Cache`] and degrade to uncached behavior
//! instead of failing the job.

use thiserror::Error;

/// Result type alias using [`TextmillError`].
pub type Result<T> = std::result::Result<T, TextmillError>;

/// Main error type for all textmill operations.
#[derive(Debug, Error)]
pub enum TextmillError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Rendering error: {message}")]
    Rendering {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Extraction service error: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("{0}")]
    Other(String),
}

impl TextmillError {
    /// Create a Rendering error
    pub fn rendering<S: Into<String>>(message: S) -> Self {
        Self::Rendering {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Rendering error with source
    pub fn rendering_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Rendering {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an Ocr error
    pub fn ocr<S: Into<String>>(message: S) -> Self {
        Self::Ocr {
            message: message.into(),
            source: None,
        }
    }

    /// Create an Ocr error with source
    pub fn ocr_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Ocr {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an Extraction error
    pub fn extraction<S: Into<String>>(message: S) -> Self {
        Self::Extraction {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
            source: None,
        }
    }
}

impl From<serde_json::Error> for TextmillError {
    fn from(err: serde_json::Error) -> Self {
        TextmillError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rusqlite::Error> for TextmillError {
    fn from(err: rusqlite::Error) -> Self {
        TextmillError::Cache {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<reqwest::Error> for TextmillError {
    fn from(err: reqwest::Error) -> Self {
        TextmillError::Extraction {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for TextmillError {
    fn from(err: image::ImageError) -> Self {
        TextmillError::Rendering {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TextmillError = io_err.into();
        assert!(matches!(err, TextmillError::Io(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_rendering_error() {
        let err = TextmillError::rendering("backend unavailable");
        assert_eq!(err.to_string(), "Rendering error: backend unavailable");
    }

    #[test]
    fn test_rendering_error_with_source() {
        let source = std::io::Error::other("library not found");
        let err = TextmillError::rendering_with_source("backend unavailable", source);
        assert_eq!(err.to_string(), "Rendering error: backend unavailable");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_ocr_error() {
        let err = TextmillError::ocr("recognition failed");
        assert_eq!(err.to_string(), "OCR error: recognition failed");
    }

    #[test]
    fn test_cache_error() {
        let err = TextmillError::cache("write failed");
        assert_eq!(err.to_string(), "Cache error: write failed");
    }

    #[test]
    fn test_validation_error() {
        let err = TextmillError::validation("invalid mode");
        assert_eq!(err.to_string(), "Validation error: invalid mode");
    }

    #[test]
    fn test_lock_poisoned_error() {
        let err = TextmillError::LockPoisoned("cache mutex poisoned".to_string());
        assert_eq!(err.to_string(), "Lock poisoned: cache mutex poisoned");
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: TextmillError = json_err.into();
        assert!(matches!(err, TextmillError::Serialization { .. }));
    }

    #[test]
    fn test_rusqlite_error_conversion() {
        let sql_err = rusqlite::Error::InvalidQuery;
        let err: TextmillError = sql_err.into();
        assert!(matches!(err, TextmillError::Cache { .. }));
    }

    #[test]
    fn test_io_error_bubbles_unchanged() {
        fn read_file() -> Result<String> {
            let content = std::fs::read_to_string("/nonexistent/file.txt")?;
            Ok(content)
        }

        let result = read_file();
        assert!(matches!(result.unwrap_err(), TextmillError::Io(_)));
    }
}
