use serde::{Deserialize, Serialize};

/// Author or location descriptor (h-card).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Card {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub photo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub locality: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(rename = "country-name", default, skip_serializing_if = "String::is_empty")]
    pub country_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latitude: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub longitude: String,
}

fn default_kind() -> String {
    "card".to_string()
}

impl Card {
    pub fn new() -> Self {
        Self {
            kind: default_kind(),
            ..Default::default()
        }
    }

    pub fn with_url(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::new()
        }
    }

    /// True when no descriptive field is set; `kind` is not considered.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty()
            && self.url.is_empty()
            && self.photo.is_empty()
            && self.locality.is_empty()
            && self.region.is_empty()
            && self.country_name.is_empty()
            && self.latitude.is_empty()
            && self.longitude.is_empty()
    }
}
