use thiserror::Error;

/// Upper bound on participant and study identifiers, in bytes.
pub const MAX_IDENT_LEN: usize = 128;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentError {
    #[error("{field} must be non-empty")]
    Empty { field: &'static str },
    #[error("{field} must be at most {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("{field} contains invalid character {ch:?}")]
    InvalidChar { field: &'static str, ch: char },
}

/// Checks an externally supplied identifier.
///
/// Accepted: ASCII alphanumerics, `-` and `_`, between 1 and [`MAX_IDENT_LEN`] bytes.
/// Ids end up inside store keys and archive file names, so anything that could
/// act as a separator (`:`, `/`, `.`) is refused here.
pub fn validate_identifier(field: &'static str, value: &str) -> Result<(), IdentError> {
    if value.trim().is_empty() {
        return Err(IdentError::Empty { field });
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(IdentError::TooLong {
            field,
            max: MAX_IDENT_LEN,
        });
    }
    if let Some(ch) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(IdentError::InvalidChar { field, ch });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_uuid_like_ids() {
        assert_eq!(
            validate_identifier("participantId", "3f1c2a9e-7b7d-4d1e-9a55-0c6b1f2e8d10"),
            Ok(())
        );
        assert_eq!(validate_identifier("studyId", "study_01"), Ok(()));
    }

    #[test]
    fn rejects_blank() {
        assert_eq!(
            validate_identifier("studyId", "   "),
            Err(IdentError::Empty { field: "studyId" })
        );
    }

    #[test]
    fn rejects_separators() {
        assert_eq!(
            validate_identifier("participantId", "run:abc"),
            Err(IdentError::InvalidChar {
                field: "participantId",
                ch: ':'
            })
        );
        assert!(validate_identifier("participantId", "../etc").is_err());
    }

    #[test]
    fn rejects_oversized() {
        let long = "a".repeat(MAX_IDENT_LEN + 1);
        assert_eq!(
            validate_identifier("participantId", &long),
            Err(IdentError::TooLong {
                field: "participantId",
                max: MAX_IDENT_LEN
            })
        );
    }
}
