//! Input validation utilities for user-provided data.
//!
//! These functions validate and sanitize user input to prevent
//! injection attacks, path traversal, and other security issues.

use std::path::Path;

/// Maximum length for title/name fields
pub const MAX_TITLE_LENGTH: usize = 256;

/// Maximum length for description/details fields
pub const MAX_DESCRIPTION_LENGTH: usize = 4096;

/// Maximum number of players tagged to a single session
pub const MAX_PLAYER_IDS: usize = 32;

/// Bounds for `sample_fps`: must be positive and not absurdly high.
pub const MAX_SAMPLE_FPS: i32 = 60;

/// Validation error types
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TooLong {
        field: &'static str,
        max: usize,
    },
    TooShort {
        field: &'static str,
        min: usize,
    },
    InvalidCharacters {
        field: &'static str,
        reason: &'static str,
    },
    TooMany {
        field: &'static str,
        max: usize,
    },
    PathTraversal {
        field: &'static str,
    },
    Empty {
        field: &'static str,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::TooLong { field, max } => {
                write!(f, "{} exceeds maximum length of {} characters", field, max)
            }
            ValidationError::TooShort { field, min } => {
                write!(f, "{} must be at least {} characters", field, min)
            }
            ValidationError::InvalidCharacters { field, reason } => {
                write!(f, "{}: {}", field, reason)
            }
            ValidationError::TooMany { field, max } => {
                write!(f, "too many {}: maximum is {}", field, max)
            }
            ValidationError::PathTraversal { field } => {
                write!(f, "{} contains invalid path characters", field)
            }
            ValidationError::Empty { field } => {
                write!(f, "{} cannot be empty", field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a title field (session title, etc.)
pub fn validate_title(title: &str) -> Result<(), ValidationError> {
    let trimmed = title.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field: "title" });
    }

    if trimmed.len() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "title",
            max: MAX_TITLE_LENGTH,
        });
    }

    // Allow alphanumeric, spaces, hyphens, underscores, and common punctuation
    if !trimmed.chars().all(|c| {
        c.is_alphanumeric()
            || c.is_whitespace()
            || matches!(
                c,
                '-' | '_' | '.' | ',' | '!' | '?' | '\'' | '"' | '(' | ')' | '[' | ']'
            )
    }) {
        return Err(ValidationError::InvalidCharacters {
            field: "title",
            reason: "contains invalid characters",
        });
    }

    Ok(())
}

/// Validate a description/details field
pub fn validate_description(description: &str) -> Result<(), ValidationError> {
    if description.len() > MAX_DESCRIPTION_LENGTH {
        return Err(ValidationError::TooLong {
            field: "description",
            max: MAX_DESCRIPTION_LENGTH,
        });
    }

    Ok(())
}

/// Validate the `player_ids` list attached to a session
pub fn validate_player_ids(player_ids: &[String]) -> Result<(), ValidationError> {
    if player_ids.len() > MAX_PLAYER_IDS {
        return Err(ValidationError::TooMany {
            field: "player_ids",
            max: MAX_PLAYER_IDS,
        });
    }

    for id in player_ids {
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty { field: "player_id" });
        }
        if trimmed.len() > MAX_TITLE_LENGTH {
            return Err(ValidationError::TooLong {
                field: "player_id",
                max: MAX_TITLE_LENGTH,
            });
        }
    }

    Ok(())
}

/// Validate the requested sample rate for a worker pass
pub fn validate_sample_fps(sample_fps: i32) -> Result<(), ValidationError> {
    if sample_fps <= 0 {
        return Err(ValidationError::TooShort {
            field: "sample_fps",
            min: 1,
        });
    }

    if sample_fps > MAX_SAMPLE_FPS {
        return Err(ValidationError::TooLong {
            field: "sample_fps",
            max: MAX_SAMPLE_FPS as usize,
        });
    }

    Ok(())
}

/// Validate a file path to prevent path traversal attacks
pub fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    // Check for path traversal attempts
    if path.contains("..") {
        return Err(ValidationError::PathTraversal { field: "file path" });
    }

    // Check for absolute paths (shouldn't be allowed in user input)
    if Path::new(path).is_absolute() {
        return Err(ValidationError::PathTraversal { field: "file path" });
    }

    // Check for null bytes
    if path.contains('\0') {
        return Err(ValidationError::InvalidCharacters {
            field: "file path",
            reason: "contains null bytes",
        });
    }

    Ok(())
}

/// Validate a file name
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Empty { field: "file name" });
    }

    if trimmed.len() > MAX_TITLE_LENGTH {
        return Err(ValidationError::TooLong {
            field: "file name",
            max: MAX_TITLE_LENGTH,
        });
    }

    // Check for path separators
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ValidationError::InvalidCharacters {
            field: "file name",
            reason: "cannot contain path separators",
        });
    }

    validate_file_path(trimmed)?;

    Ok(())
}

/// Sanitize a string by removing potentially dangerous characters
/// while preserving readability
pub fn sanitize_string(input: &str) -> String {
    input
        .chars()
        .filter(|c| !matches!(c, '\0' | '\x1b'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_title_valid() {
        assert!(validate_title("Nets Session").is_ok());
        assert!(validate_title("match-highlights_v2").is_ok());
        assert!(validate_title("Hello, World!").is_ok());
    }

    #[test]
    fn test_validate_title_empty() {
        assert!(matches!(
            validate_title(""),
            Err(ValidationError::Empty { .. })
        ));
        assert!(matches!(
            validate_title("   "),
            Err(ValidationError::Empty { .. })
        ));
    }

    #[test]
    fn test_validate_title_too_long() {
        let long_title = "a".repeat(MAX_TITLE_LENGTH + 1);
        assert!(matches!(
            validate_title(&long_title),
            Err(ValidationError::TooLong { .. })
        ));
    }

    #[test]
    fn test_validate_file_path_traversal() {
        assert!(matches!(
            validate_file_path("../etc/passwd"),
            Err(ValidationError::PathTraversal { .. })
        ));
        assert!(matches!(
            validate_file_path("foo/../bar"),
            Err(ValidationError::PathTraversal { .. })
        ));
    }

    #[test]
    fn test_validate_file_path_valid() {
        assert!(validate_file_path("documents/report.pdf").is_ok());
        assert!(validate_file_path("file.txt").is_ok());
    }

    #[test]
    fn test_validate_player_ids() {
        assert!(validate_player_ids(&["p1".to_string(), "p2".to_string()]).is_ok());

        let too_many: Vec<String> = (0..MAX_PLAYER_IDS + 1).map(|i| format!("p{}", i)).collect();
        assert!(matches!(
            validate_player_ids(&too_many),
            Err(ValidationError::TooMany { .. })
        ));
    }

    #[test]
    fn test_validate_sample_fps() {
        assert!(validate_sample_fps(10).is_ok());
        assert!(matches!(
            validate_sample_fps(0),
            Err(ValidationError::TooShort { .. })
        ));
        assert!(matches!(
            validate_sample_fps(MAX_SAMPLE_FPS + 1),
            Err(ValidationError::TooLong { .. })
        ));
    }
}
