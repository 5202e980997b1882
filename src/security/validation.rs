use std::fmt;

/// Errors that can occur during input validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    TooLong { max: usize, actual: usize },
    NullBytes,
    InvalidIdentifier(String),
    EmptyInput,
    InvalidConnectionString(String),
    InvalidDataType(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::TooLong { max, actual } => {
                write!(f, "Input length {} exceeds maximum of {}", actual, max)
            }
            ValidationError::NullBytes => write!(f, "Input contains null bytes"),
            ValidationError::InvalidIdentifier(reason) => {
                write!(f, "Invalid SQL identifier: {}", reason)
            }
            ValidationError::EmptyInput => write!(f, "Input must not be empty"),
            ValidationError::InvalidConnectionString(reason) => {
                write!(f, "Invalid connection string: {}", reason)
            }
            ValidationError::InvalidDataType(reason) => {
                write!(f, "Invalid column type: {}", reason)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Maximum length of a SQL Server identifier (sysname).
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Statement keywords that are never accepted as a bare table or column name.
const RESERVED_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "INSERT", "UPDATE", "ALTER", "CREATE", "EXEC", "EXECUTE",
    "UNION", "SELECT", "TRUNCATE", "GRANT", "REVOKE", "TABLE", "INDEX",
];

/// Validate that a string is a safe SQL identifier (schema, table or column name).
///
/// Valid identifiers:
/// - Start with a letter or underscore
/// - Contain only letters, digits, underscores
/// - Are not statement keywords
/// - Are between 1 and 128 characters
pub fn validate_identifier(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            max: MAX_IDENTIFIER_LENGTH,
            actual: name.len(),
        });
    }

    if name.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    let starts_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !starts_ok {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' must start with a letter or underscore",
            name
        )));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' must contain only letters, digits, and underscores",
            name
        )));
    }

    let upper = name.to_uppercase();
    if RESERVED_KEYWORDS.contains(&upper.as_str()) {
        return Err(ValidationError::InvalidIdentifier(format!(
            "'{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Validate a T-SQL column type such as `nvarchar(255)` or `decimal(18, 2)`.
pub fn validate_data_type(data_type: &str) -> Result<(), ValidationError> {
    let trimmed = data_type.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if trimmed.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ValidationError::TooLong {
            max: MAX_IDENTIFIER_LENGTH,
            actual: trimmed.len(),
        });
    }

    if !trimmed
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic())
        .unwrap_or(false)
    {
        return Err(ValidationError::InvalidDataType(format!(
            "'{}' must start with a letter",
            trimmed
        )));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | ',' | ' ');
    if !trimmed.chars().all(allowed) {
        return Err(ValidationError::InvalidDataType(format!(
            "'{}' contains characters not allowed in a type name",
            trimmed
        )));
    }

    let opens = trimmed.matches('(').count();
    if opens > 1 || opens != trimmed.matches(')').count() {
        return Err(ValidationError::InvalidDataType(format!(
            "'{}' has unbalanced parentheses",
            trimmed
        )));
    }

    Ok(())
}

/// Validate an ADO-style connection string for suspicious patterns.
pub fn validate_connection_string(conn_str: &str) -> Result<(), ValidationError> {
    if conn_str.trim().is_empty() {
        return Err(ValidationError::EmptyInput);
    }

    if conn_str.contains('\0') {
        return Err(ValidationError::NullBytes);
    }

    let upper = conn_str.to_uppercase();

    // Connection strings should not carry statements
    let dangerous_patterns = [
        "DROP TABLE",
        "DROP DATABASE",
        "DELETE FROM",
        ";--",
        "EXEC(",
        "EXECUTE(",
        "XP_CMDSHELL",
        "SP_EXECUTESQL",
    ];

    for pattern in &dangerous_patterns {
        if upper.contains(pattern) {
            return Err(ValidationError::InvalidConnectionString(format!(
                "suspicious pattern: {}",
                pattern
            )));
        }
    }

    if conn_str.contains('`') || conn_str.contains("$(") {
        return Err(ValidationError::InvalidConnectionString(
            "shell injection pattern detected".to_string(),
        ));
    }

    Ok(())
}
