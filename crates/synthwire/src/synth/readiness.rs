//! Readiness detection from the synth's startup output.

/// Extracts the audio client name from one line of synth output.
pub trait ReadinessMatcher: Send + Sync {
    fn client_name(&self, line: &str) -> Option<String>;
}

/// Matches `<marker> ... '<name>'` and yields the text between the first
/// pair of single quotes after the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatcher {
    marker: String,
}

impl MarkerMatcher {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl ReadinessMatcher for MarkerMatcher {
    fn client_name(&self, line: &str) -> Option<String> {
        let (_, after) = line.split_once(self.marker.as_str())?;
        let (_, quoted) = after.split_once('\'')?;
        let (name, _) = quoted.split_once('\'')?;
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}
