use crate::error::{CoreError, CoreResult};

/// Longest accepted document key, in bytes.
pub const MAX_KEY_LENGTH: usize = 254;

/// Longest accepted collection name, in bytes.
pub const MAX_COLLECTION_NAME_LENGTH: usize = 256;

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '_' | '-' | ':' | '.' | '@' | '(' | ')' | '+' | ',' | '=' | ';' | '$' | '!' | '*'
                | '\'' | '%'
        )
}

/// Validates a document key.
///
/// # Errors
///
/// Returns `InvalidArgument` for empty, overlong, or badly formed keys.
pub fn validate_key(key: &str) -> CoreResult<()> {
    if key.is_empty() {
        return Err(CoreError::invalid_argument("document key must not be empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(CoreError::invalid_argument(format!(
            "document key longer than {MAX_KEY_LENGTH} bytes"
        )));
    }
    if let Some(c) = key.chars().find(|c| !is_key_char(*c)) {
        return Err(CoreError::invalid_argument(format!(
            "illegal character {c:?} in document key"
        )));
    }
    Ok(())
}

/// Validates a collection name.
///
/// # Errors
///
/// Returns `InvalidArgument` for empty, overlong, or badly formed names.
pub fn validate_collection_name(name: &str) -> CoreResult<()> {
    let Some(first) = name.chars().next() else {
        return Err(CoreError::invalid_argument("collection name must not be empty"));
    };
    if name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(CoreError::invalid_argument(format!(
            "collection name longer than {MAX_COLLECTION_NAME_LENGTH} bytes"
        )));
    }
    if first.is_ascii_digit() || first == '-' {
        return Err(CoreError::invalid_argument(
            "collection name must not start with a digit or '-'",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(CoreError::invalid_argument(format!(
            "illegal collection name {name:?}"
        )));
    }
    Ok(())
}
