use super::types::{StoreError, StoreResult};

/// Split a store path into its segments.
///
/// Leading and trailing slashes are ignored. Empty inner segments and
/// segments containing characters the store reserves are rejected.
pub(crate) fn segments(path: &str) -> StoreResult<Vec<String>> {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() || segment.contains(['.', '#', '$', '[', ']']) {
                Err(StoreError::InvalidPath(path.to_string()))
            } else {
                Ok(segment.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_trims() {
        assert_eq!(segments("/rooms/R1/").unwrap(), vec!["rooms", "R1"]);
        assert!(segments("").unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_segments() {
        assert!(matches!(segments("rooms//R1"), Err(StoreError::InvalidPath(_))));
        assert!(matches!(segments("rooms/a.b"), Err(StoreError::InvalidPath(_))));
    }
}
