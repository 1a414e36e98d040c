use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Maps label strings to class indices and back.
/// Classes are the distinct fitted labels in sorted order, so the same set of
/// labels always yields the same encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LabelEncoder
{
    pub classes: Vec<String>,
}

impl LabelEncoder
{
    pub fn fit<S: AsRef<str>>(labels: &[S]) -> Self
    {
        let classes: BTreeSet<&str> = labels.iter().map(|l| l.as_ref()).collect();
        LabelEncoder { classes: classes.into_iter().map(str::to_string).collect() }
    }

    /// Fits on `labels` and returns their class indices.
    pub fn fit_transform<S: AsRef<str>>(labels: &[S]) -> (Self, Vec<usize>)
    {
        let encoder = Self::fit(labels);
        let encoded = labels.iter()
            .map(|l| encoder.index_of(l.as_ref()).unwrap_or_default())
            .collect();
        (encoder, encoded)
    }

    pub fn index_of(&self, label: &str) -> Option<usize>
    {
        self.classes.binary_search_by(|c| c.as_str().cmp(label)).ok()
    }

    pub fn transform<S: AsRef<str>>(&self, labels: &[S]) -> Result<Vec<usize>, String>
    {
        labels.iter()
            .map(|l| self.index_of(l.as_ref()).ok_or_else(|| format!("Unseen label {:?}", l.as_ref())))
            .collect()
    }

    pub fn inverse_transform(&self, index: usize) -> Option<&str>
    {
        self.classes.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize
    {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.classes.is_empty()
    }
}
