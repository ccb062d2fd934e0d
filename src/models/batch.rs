use serde::{Deserialize, Serialize};

/// One named record of a batch, referencing the images to process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchItem {
    pub name: String,
    pub image_refs: Vec<String>,
}

impl BatchItem {
    pub fn new<I, S>(name: impl Into<String>, image_refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            image_refs: image_refs.into_iter().map(Into::into).collect(),
        }
    }
}
