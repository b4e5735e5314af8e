//! Per-channel quality defaults.

use serde::{Deserialize, Serialize};

use crate::options::QualityPreset;

/// A user-maintained mapping from a channel name to a preferred quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDefault {
    /// Channel (uploader) name as the user typed it.
    pub channel: String,
    /// Quality to use for this channel.
    pub quality: QualityPreset,
}

impl ChannelDefault {
    /// Create a new mapping.
    #[must_use]
    pub fn new(channel: impl Into<String>, quality: QualityPreset) -> Self {
        Self {
            channel: channel.into(),
            quality,
        }
    }
}

/// Read-only lookup over the channel defaults.
///
/// Matching is a case-insensitive substring test in either direction, and
/// the first mapping that matches wins. A short stored name can therefore
/// claim a longer uploader name and vice versa; order the mappings from most
/// to least specific.
#[derive(Debug, Clone, Default)]
pub struct ChannelDefaultsResolver {
    entries: Vec<(String, QualityPreset)>,
}

impl ChannelDefaultsResolver {
    /// Build a resolver from configured mappings, keeping their order.
    #[must_use]
    pub fn new(defaults: &[ChannelDefault]) -> Self {
        let entries = defaults
            .iter()
            .filter(|d| !d.channel.trim().is_empty())
            .map(|d| (d.channel.trim().to_lowercase(), d.quality))
            .collect();
        Self { entries }
    }

    /// Quality preferred for an uploader, if any mapping matches.
    #[must_use]
    pub fn resolve(&self, uploader_name: &str) -> Option<QualityPreset> {
        let uploader = uploader_name.trim().to_lowercase();
        if uploader.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|(channel, _)| uploader.contains(channel.as_str()) || channel.contains(&uploader))
            .map(|(_, quality)| *quality)
    }

    /// Number of mappings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no mappings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
