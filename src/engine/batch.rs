/*
    Batch import of `keys,output` lines.
*/

use super::catalog::Catalog;
use super::keys::split_key_spec;
use super::store::ChordStore;
use super::Chord;
use crate::error::CatalogError;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchLine {
    pub line: usize,
    pub keys: String,
    pub output_text: String,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub added: Vec<Chord>,
    pub failed: Vec<(BatchLine, CatalogError)>,
    /// Non-empty lines without a comma.
    pub malformed: Vec<usize>,
}

/// Blank lines and `#` comments are skipped. The first comma separates keys
/// from output, so the output may contain commas.
pub fn parse_batch(content: &str) -> (Vec<BatchLine>, Vec<usize>) {
    let mut lines = vec![];
    let mut malformed = vec![];
    for (i, raw) in content.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.split_once(',') {
            Some((keys, output)) => lines.push(BatchLine {
                line: i + 1,
                keys: keys.trim().to_string(),
                output_text: output.trim().to_string(),
            }),
            None => malformed.push(i + 1),
        }
    }
    (lines, malformed)
}

/// Every line is added on its own; one failure does not stop the rest.
pub fn add_batch<S: ChordStore>(
    catalog: &mut Catalog<S>,
    content: &str,
    category: Option<&str>,
) -> BatchReport {
    let (lines, malformed) = parse_batch(content);
    let mut report = BatchReport {
        malformed,
        ..Default::default()
    };
    for line in lines {
        match catalog.add(&split_key_spec(&line.keys), &line.output_text, category, &[]) {
            Ok(chord) => report.added.push(chord),
            Err(e) => report.failed.push((line, e)),
        }
    }
    info!(
        added = report.added.len(),
        failed = report.failed.len(),
        "batch import finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::YamlStore;
    use crate::error::ValidationError;
    use tempfile::tempdir;

    const BATCH: &str = "# common words\nthe, the\n\na+n+d,and\nq,too short\n\
                         no comma here\nbtw,by the way, really\nt+h+e,dup\n";

    #[test]
    fn parses_lines_and_comments() {
        let (lines, malformed) = parse_batch(BATCH);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].keys, "the");
        assert_eq!(lines[0].output_text, "the");
        assert_eq!(lines[3].output_text, "by the way, really");
        assert_eq!(malformed, vec![6]);
    }

    #[test]
    fn each_line_is_independent() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(YamlStore::new(dir.path().join("chords.yaml"))).unwrap();
        let report = add_batch(&mut catalog, BATCH, Some("words"));

        assert_eq!(report.added.len(), 3);
        assert_eq!(report.failed.len(), 2);
        assert!(matches!(
            report.failed[0].1,
            CatalogError::Validation(ValidationError::TooFewKeys(1))
        ));
        assert!(matches!(report.failed[1].1, CatalogError::Conflict(_)));
        assert_eq!(report.failed[1].0.line, 8);
        assert!(catalog.iter().all(|c| c.category.as_deref() == Some("words")));
    }
}
