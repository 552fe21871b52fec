//! Device behaviour the driver tolerates on purpose.

use regex::Regex;
use tracing::warn;

/// Some device firmware answers a confirmed commit with an rpc-error naming a
/// backend operation failure even though the commit was applied. Replies whose
/// error text matches one of these patterns count as accepted.
///
/// The conditions under which this is safe have only been observed, not
/// specified by the vendors; keep the pattern list in the EM configuration so
/// it can be narrowed per deployment.
#[derive(Debug, Clone)]
pub struct KnownBenignBackendError {
    patterns: Vec<Regex>,
}

impl Default for KnownBenignBackendError {
    fn default() -> Self {
        Self {
            patterns: Regex::new(DEFAULT_PATTERN)
                .map(|re| vec![re])
                .unwrap_or_default(),
        }
    }
}

const DEFAULT_PATTERN: &str = "ME_BACKEND_ERROR_OP_FAILED";

impl KnownBenignBackendError {
    /// Build from configured fragments; each is a regular expression
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Whether `error_text` is the known benign failure
    pub fn matches(&self, device: &str, error_text: &str) -> bool {
        let hit = self.patterns.iter().find(|p| p.is_match(error_text));
        if let Some(pattern) = hit {
            warn!(
                "[NETCONF] {} reported '{}' matching benign pattern '{}', treating as success",
                device,
                error_text,
                pattern.as_str()
            );
            return true;
        }
        false
    }
}
