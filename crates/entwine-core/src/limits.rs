//! Input validation limits for schema names and page requests

/// Maximum length for entity type names (64 chars)
pub const MAX_TYPE_NAME_LEN: usize = 64;

/// Maximum length for attribute and slot names (64 chars)
pub const MAX_FIELD_NAME_LEN: usize = 64;

/// Maximum page size; larger requests are rejected (1000)
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Validation error type
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyTypeName,
    TypeNameTooLong { len: usize, max: usize },
    InvalidTypeName(String),
    EmptyFieldName,
    FieldNameTooLong { len: usize, max: usize },
    InvalidFieldName(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTypeName => write!(f, "Entity type name cannot be empty"),
            Self::TypeNameTooLong { len, max } => {
                write!(f, "Entity type name too long: {} chars (max {})", len, max)
            }
            Self::InvalidTypeName(name) => write!(
                f,
                "Invalid entity type name '{}': use letters, digits and underscores",
                name
            ),
            Self::EmptyFieldName => write!(f, "Field name cannot be empty"),
            Self::FieldNameTooLong { len, max } => {
                write!(f, "Field name too long: {} chars (max {})", len, max)
            }
            Self::InvalidFieldName(name) => write!(
                f,
                "Invalid field name '{}': use letters, digits and underscores",
                name
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for crate::Error {
    fn from(e: ValidationError) -> Self {
        crate::Error::Configuration(e.to_string())
    }
}

fn is_identifier(name: &str) -> bool {
    name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Validate entity type name
///
/// `:` is reserved as the key separator, so only identifier characters pass.
pub fn validate_type_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyTypeName);
    }
    if name.len() > MAX_TYPE_NAME_LEN {
        return Err(ValidationError::TypeNameTooLong {
            len: name.len(),
            max: MAX_TYPE_NAME_LEN,
        });
    }
    if !is_identifier(name) {
        return Err(ValidationError::InvalidTypeName(name.to_string()));
    }
    Ok(())
}

/// Validate attribute or slot name
pub fn validate_field_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyFieldName);
    }
    if name.len() > MAX_FIELD_NAME_LEN {
        return Err(ValidationError::FieldNameTooLong {
            len: name.len(),
            max: MAX_FIELD_NAME_LEN,
        });
    }
    if !is_identifier(name) {
        return Err(ValidationError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}
