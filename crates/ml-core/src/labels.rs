use std::path::Path;

use serde::Deserialize;

use crate::model::{ModelError, read_artifact};

#[derive(Deserialize)]
struct LabelManifest {
    class_names: Vec<String>,
}

/// Load the ordered class labels (index -> sign name).
///
/// `.json` files hold `{"class_names": [..]}`; anything else is read as plain
/// text with one label per line. Blank lines are skipped.
pub fn load_labels(path: impl AsRef<Path>) -> Result<Vec<String>, ModelError> {
    let path = path.as_ref();
    let text = read_artifact(path)?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let labels: Vec<String> = if is_json {
        let manifest: LabelManifest =
            serde_json::from_str(&text).map_err(|err| ModelError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        manifest.class_names
    } else {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    };

    if labels.is_empty() {
        return Err(ModelError::Invalid(format!(
            "label manifest {} contains no labels",
            path.display()
        )));
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn reads_json_manifest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.json");
        fs::write(&path, r#"{"class_names": ["A", "B", "C"]}"#).unwrap();
        assert_eq!(load_labels(&path).unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn reads_plain_text_skipping_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.txt");
        fs::write(&path, "Hello\n\n  Thanks \nYes\n").unwrap();
        assert_eq!(load_labels(&path).unwrap(), vec!["Hello", "Thanks", "Yes"]);
    }

    #[test]
    fn empty_or_broken_manifests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(load_labels(&empty), Err(ModelError::Invalid(_))));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{").unwrap();
        assert!(matches!(load_labels(&broken), Err(ModelError::Parse { .. })));

        assert!(load_labels(dir.path().join("missing.json")).unwrap_err().is_missing_artifact());
    }
}
