//! Path string utilities shared by the store, cache, and lock layers.

use zk_coord_core::error::{CoordError, CoordResult};

/// Validates an absolute node path: leading `/`, no trailing `/` (except
/// the root itself), no empty segments.
pub fn validate(path: &str) -> CoordResult<()> {
    if path == "/" {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(CoordError::Config(format!(
            "path must be absolute: {path:?}"
        )));
    }
    if path.ends_with('/') {
        return Err(CoordError::Config(format!(
            "path must not end with '/': {path:?}"
        )));
    }
    if path[1..].split('/').any(|segment| segment.is_empty()) {
        return Err(CoordError::Config(format!(
            "path contains an empty segment: {path:?}"
        )));
    }
    Ok(())
}

/// Validates one path token (cluster id, entity name, ...): non-empty,
/// no `/`, no surrounding whitespace.
pub fn validate_token(token: &str) -> CoordResult<()> {
    if token.is_empty() {
        return Err(CoordError::Config("path token is empty".to_string()));
    }
    if token.contains('/') {
        return Err(CoordError::Config(format!(
            "path token contains '/': {token:?}"
        )));
    }
    if token.trim() != token {
        return Err(CoordError::Config(format!(
            "path token has surrounding whitespace: {token:?}"
        )));
    }
    Ok(())
}

/// The logical parent of a path; `None` for the root.
pub fn parent_of(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// The final path segment.
pub fn node_name(path: &str) -> &str {
    path.rsplit_once('/').map(|(_, name)| name).unwrap_or(path)
}

/// Joins a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_of_nested() {
        assert_eq!(parent_of("/a/b/c"), Some("/a/b"));
        assert_eq!(parent_of("/a"), Some("/"));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn node_name_is_last_segment() {
        assert_eq!(node_name("/a/b/c"), "c");
        assert_eq!(node_name("/a"), "a");
    }

    #[test]
    fn join_handles_root() {
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn validate_rejects_malformed() {
        assert!(validate("/").is_ok());
        assert!(validate("/a/b").is_ok());
        assert!(validate("a/b").is_err());
        assert!(validate("/a/").is_err());
        assert!(validate("/a//b").is_err());
    }

    #[test]
    fn validate_token_rejects_malformed() {
        assert!(validate_token("cluster-1").is_ok());
        assert!(validate_token("").is_err());
        assert!(validate_token("a/b").is_err());
        assert!(validate_token(" padded ").is_err());
    }
}
