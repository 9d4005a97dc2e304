//! Document output: timestamped, never overwriting, written atomically.

use std::io::Write;
use std::path::{Path, PathBuf};

use matspec_core::SpecificationDocument;
use tracing::info;

use crate::StoreError;

/// Upper bound on `_N` suffixes tried before giving up.
const MAX_SUFFIX: usize = 1000;

/// Write the rendered document into `dir` and return the final path.
///
/// The content goes to a temp file in the same directory first and is then
/// persisted under a name that does not exist yet, so a re-run in the same
/// second gets `_2`, `_3`, … instead of replacing an earlier result.
pub fn write_document(dir: &Path, document: &SpecificationDocument) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir).map_err(|source| StoreError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let base = document.file_name();
    let stem = base.trim_end_matches(".md");
    let rendered = document.render();

    let write_err = |source: std::io::Error| StoreError::Write {
        path: dir.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(rendered.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    for n in 1..=MAX_SUFFIX {
        let name = if n == 1 {
            base.clone()
        } else {
            format!("{stem}_{n}.md")
        };
        let target = dir.join(name);
        match tmp.persist_noclobber(&target) {
            Ok(_) => {
                info!(
                    path = %target.display(),
                    bytes = rendered.len(),
                    sections = document.sections.len(),
                    "wrote specification document"
                );
                return Ok(target);
            }
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => tmp = e.file,
            Err(e) => {
                return Err(StoreError::Write {
                    path: target,
                    source: e.error,
                });
            }
        }
    }

    Err(StoreError::Write {
        path: dir.join(base),
        source: std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "too many documents with the same timestamp",
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use matspec_core::{SectionOutcome, SectionSource, SpecificationSection};

    fn document() -> SpecificationDocument {
        let at = NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        let section = SpecificationSection {
            index: 0,
            source: SectionSource::Image("a.png".into()),
            outcome: SectionOutcome::Generated {
                body: "### Executive Summary\nConcrete and glass.".into(),
                sustainability: None,
                alternatives: None,
                missing: vec![],
            },
        };
        SpecificationDocument::new(at, 1, vec![section], vec![])
    }

    #[test]
    fn writes_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested").join("output");
        let path = write_document(&out, &document()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "material_specifications_20261018_091500.md"
        );
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("## Image: a.png"));
    }

    #[test]
    fn reruns_never_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let doc = document();
        let first = write_document(dir.path(), &doc).unwrap();
        std::fs::write(&first, "earlier result").unwrap();

        let second = write_document(dir.path(), &doc).unwrap();
        let third = write_document(dir.path(), &doc).unwrap();

        assert_ne!(first, second);
        assert!(second.ends_with("material_specifications_20261018_091500_2.md"));
        assert!(third.ends_with("material_specifications_20261018_091500_3.md"));
        assert_eq!(std::fs::read_to_string(&first).unwrap(), "earlier result");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_name().to_string_lossy().ends_with(".md"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind");
    }
}
