use anyhow::{anyhow, Result};

use super::result::Detection;

/// Default allow-list: the handset labels the deployed model reports.
pub const DEFAULT_LABELS: &[&str] = &["mobile phone", "cell phone", "phone"];

/// Allow-list and confidence floor applied to every detector result.
///
/// A detection passes when its confidence is at least `min_confidence` and its
/// lowercased label contains any allow-list entry ("Cell Phone" passes "phone").
#[derive(Clone, Debug)]
pub struct DetectionFilter {
    labels: Vec<String>,
    min_confidence: f32,
}

impl DetectionFilter {
    pub fn new<I, S>(labels: I, min_confidence: f32) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|label| label.as_ref().trim().to_lowercase())
            .filter(|label| !label.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("label allow-list must not be empty"));
        }
        if !(0.0..=1.0).contains(&min_confidence) {
            return Err(anyhow!(
                "min_confidence must be within 0..=1, got {}",
                min_confidence
            ));
        }
        Ok(Self {
            labels,
            min_confidence,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn min_confidence(&self) -> f32 {
        self.min_confidence
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        if detection.confidence.is_nan() || detection.confidence < self.min_confidence {
            return false;
        }
        let label = detection.label.trim().to_lowercase();
        !label.is_empty() && self.labels.iter().any(|allowed| label.contains(allowed.as_str()))
    }

    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        detections.into_iter().filter(|d| self.matches(d)).collect()
    }
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|l| l.to_string()).collect(),
            min_confidence: 0.5,
        }
    }
}
