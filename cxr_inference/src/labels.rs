//! Class label vocabulary.
//!
//! The label file holds one class name per line; the line index is the class
//! id the model was trained with, so the order is a contract with the
//! checkpoint and is validated against the model's output width at load time.

use std::{
    fs::File,
    io::{self, BufRead},
    path::Path,
};

use crate::error::XrayError;

/// The fixed class vocabulary, in training-time positional order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels {
    labels: Vec<String>,
}

impl ClassLabels {
    /// Build a vocabulary from an in-memory list. Used by tests and by
    /// callers that do not read labels from disk.
    pub fn new(labels: Vec<String>) -> Result<Self, XrayError> {
        if labels.is_empty() {
            return Err(XrayError::Configuration(
                "label vocabulary is empty".into(),
            ));
        }
        Ok(Self { labels })
    }

    /// Load the vocabulary from a label file, one class name per line.
    pub fn from_file(path: &Path) -> Result<Self, XrayError> {
        let file = File::open(path).map_err(|e| {
            XrayError::Configuration(format!("failed to open label file {:?}: {}", path, e))
        })?;
        let reader = io::BufReader::new(file);

        let mut labels = Vec::new();
        for line_result in reader.lines() {
            let line = line_result?;
            let label = line.trim();
            if !label.is_empty() {
                labels.push(label.to_string());
            }
        }

        Self::new(labels)
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Look up a class name by model output index.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(|s| s.as_str())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.labels
    }

    /// Check the positional contract against the model's output width.
    pub fn validate_width(&self, output_width: usize) -> Result<(), XrayError> {
        if self.labels.len() != output_width {
            return Err(XrayError::Configuration(format!(
                "model output width {} does not match label vocabulary size {}",
                output_width,
                self.labels.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_label_file(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("cxr_labels_{}_{}", std::process::id(), name));
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_labels() {
        let path = write_label_file("ok", "Covid19\nNormal\nPneumonia\nTuberculosis\n");
        let labels = ClassLabels::from_file(&path).unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels.get(1), Some("Normal"));
        assert_eq!(labels.get(4), None);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_blank_lines_skipped() {
        let path = write_label_file("blank", "Covid19\n\n  Normal  \n");
        let labels = ClassLabels::from_file(&path).unwrap();
        assert_eq!(labels.as_slice(), &["Covid19".to_string(), "Normal".to_string()]);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_empty_file_rejected() {
        let path = write_label_file("empty", "\n\n");
        let err = ClassLabels::from_file(&path).unwrap_err();
        assert!(matches!(err, XrayError::Configuration(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_width_validation() {
        let labels = ClassLabels::new(vec!["a".into(), "b".into()]).unwrap();
        assert!(labels.validate_width(2).is_ok());
        assert!(matches!(
            labels.validate_width(3),
            Err(XrayError::Configuration(_))
        ));
    }
}
