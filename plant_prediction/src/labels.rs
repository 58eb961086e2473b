use crate::config::LabelsConfig;
use std::{
    fs::File,
    io::{self, BufRead},
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Crop names in the order the classifier was trained on.
pub const PLANT_CLASSES: [&str; 30] = [
    "aloevera",
    "banana",
    "bilimbi",
    "cantaloupe",
    "cassava",
    "coconut",
    "corn",
    "cucumber",
    "curcuma",
    "eggplant",
    "galangal",
    "ginger",
    "guava",
    "kale",
    "longbeans",
    "mango",
    "melon",
    "orange",
    "paddy",
    "papaya",
    "peperchili",
    "pineapple",
    "pomelo",
    "shallot",
    "soybeans",
    "spinach",
    "sweetpotatoes",
    "tobacco",
    "waterapple",
    "watermelon",
];

#[derive(Debug, Error)]
pub enum LabelsError {
    #[error("Failed to load labels from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Labels file {0:?} contains no labels")]
    Empty(PathBuf),
    #[error("Model predicts {expected} classes but {found} labels are loaded")]
    CountMismatch { expected: usize, found: usize },
}

#[derive(Debug, Clone)]
pub struct ClassLabels {
    class_labels: Vec<String>,
}

impl ClassLabels {
    pub fn builtin() -> Self {
        Self {
            class_labels: PLANT_CLASSES.iter().map(|label| label.to_string()).collect(),
        }
    }

    pub fn from_config(labels_cfg: &LabelsConfig) -> Result<Self, LabelsError> {
        match &labels_cfg.labels_file {
            Some(path) => Self::from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    /// One label per line, blank lines skipped.
    pub fn from_file(filepath: &Path) -> Result<Self, LabelsError> {
        let to_error = |source: io::Error| LabelsError::Io {
            path: filepath.to_path_buf(),
            source,
        };
        let file = File::open(filepath).map_err(to_error)?;
        let reader = io::BufReader::new(file);

        let mut class_labels = Vec::new();
        for line_result in reader.lines() {
            let line = line_result.map_err(to_error)?;
            let label = line.trim();
            if !label.is_empty() {
                class_labels.push(label.to_string());
            }
        }

        if class_labels.is_empty() {
            return Err(LabelsError::Empty(filepath.to_path_buf()));
        }
        Ok(Self { class_labels })
    }

    pub fn ensure_len(&self, expected: usize) -> Result<(), LabelsError> {
        if self.class_labels.len() != expected {
            return Err(LabelsError::CountMismatch {
                expected,
                found: self.class_labels.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.class_labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.class_labels.is_empty()
    }

    pub fn get_labels(&self) -> &[String] {
        &self.class_labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_labels() {
        let labels = ClassLabels::builtin();

        assert_eq!(labels.len(), 30);
        assert!(labels.ensure_len(30).is_ok());
        assert_eq!(labels.get(0), Some("aloevera"));
        assert_eq!(labels.get(1), Some("banana"));
        assert_eq!(labels.get(29), Some("watermelon"));
        assert_eq!(labels.get(30), None);
    }

    #[test]
    fn test_count_mismatch() {
        let labels = ClassLabels::builtin();

        let result = labels.ensure_len(1000);
        assert!(matches!(
            result,
            Err(LabelsError::CountMismatch {
                expected: 1000,
                found: 30
            })
        ));
    }

    #[test]
    fn test_from_file_trims_and_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rose\n\n  tulip  \norchid").unwrap();

        let labels = ClassLabels::from_file(file.path()).unwrap();

        assert_eq!(labels.get_labels(), &["rose", "tulip", "orchid"]);
    }

    #[test]
    fn test_from_file_errors() {
        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            ClassLabels::from_file(empty.path()),
            Err(LabelsError::Empty(_))
        ));

        assert!(matches!(
            ClassLabels::from_file(Path::new("./does/not/exist.txt")),
            Err(LabelsError::Io { .. })
        ));
    }

    #[test]
    fn test_from_config_defaults_to_builtin() {
        let labels = ClassLabels::from_config(&LabelsConfig::default()).unwrap();
        assert_eq!(labels.get_labels(), ClassLabels::builtin().get_labels());
    }
}
