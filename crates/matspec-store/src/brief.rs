use std::path::Path;

use tracing::debug;

use crate::StoreError;

/// Read the project brief as UTF-8 text, trimmed.
pub fn read_brief(path: &Path) -> Result<String, StoreError> {
    if !path.is_file() {
        return Err(StoreError::BriefNotFound(path.to_path_buf()));
    }
    let text = std::fs::read_to_string(path).map_err(|source| StoreError::BriefUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let text = text.trim().to_string();
    debug!(chars = text.chars().count(), "read brief");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_and_trims() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.txt");
        std::fs::write(&path, "\n  A timber library.\n\n").unwrap();
        assert_eq!(read_brief(&path).unwrap(), "A timber library.");
    }

    #[test]
    fn missing_brief() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_brief(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, StoreError::BriefNotFound(_)));
    }

    #[test]
    fn non_utf8_brief_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brief.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(
            read_brief(&path),
            Err(StoreError::BriefUnreadable { .. })
        ));
    }
}
