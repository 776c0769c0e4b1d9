//! Target label encoding.

use crate::VigilError;
use serde::{Deserialize, Serialize};

/// Maps class labels to dense codes `0..n` in sorted label order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEncoder {
    classes: Vec<String>,
}

impl TargetEncoder {
    /// Fit on the distinct labels of `labels`.
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Result<Self, VigilError> {
        let mut classes: Vec<String> = labels.iter().map(|l| l.as_ref().to_string()).collect();
        classes.sort();
        classes.dedup();
        if classes.is_empty() {
            return Err(VigilError::DataQualityError(
                "no target labels to fit an encoder on".to_string(),
            ));
        }
        Ok(Self { classes })
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn encode(&self, label: &str) -> Result<u32, VigilError> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(label))
            .map(|i| i as u32)
            .map_err(|_| VigilError::UnknownLabel(label.to_string()))
    }

    pub fn encode_all<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<u32>, VigilError> {
        labels.iter().map(|l| self.encode(l.as_ref())).collect()
    }

    pub fn decode(&self, code: u32) -> Result<&str, VigilError> {
        self.classes
            .get(code as usize)
            .map(String::as_str)
            .ok_or_else(|| VigilError::UnknownLabel(format!("code {}", code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_sorted_labels() {
        let encoder = TargetEncoder::fit(&["P", "N", "P"]).expect("fit");
        assert_eq!(encoder.classes(), &["N".to_string(), "P".to_string()]);
        assert_eq!(encoder.encode("N").expect("N"), 0);
        assert_eq!(encoder.encode("P").expect("P"), 1);
        assert_eq!(encoder.decode(1).expect("decode"), "P");
    }

    #[test]
    fn unseen_label_is_rejected() {
        let encoder = TargetEncoder::fit(&["N", "P"]).expect("fit");
        assert!(matches!(
            encoder.encode("maybe"),
            Err(VigilError::UnknownLabel(_))
        ));
        assert!(encoder.decode(2).is_err());
    }
}
