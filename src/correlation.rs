use rand::Rng;
use serde::{Deserialize, Serialize};

/// Alphabet for ID segments: lowercase alphanumeric, 36 characters.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate a segmented random token, e.g. `x4k2mz-09qa1p-7dd0mn`.
///
/// Pure sampling with no uniqueness guarantee beyond the 36^length space per
/// segment. Callers that need strict uniqueness check the result against
/// their in-flight set and retry.
pub fn generate_segmented_id(segment_count: usize, segment_length: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(segment_count * (segment_length + 1));

    for segment in 0..segment_count {
        if segment > 0 {
            out.push('-');
        }
        for _ in 0..segment_length {
            let idx = rng.gen_range(0..ALPHABET.len());
            out.push(ALPHABET[idx] as char);
        }
    }

    out
}

/// Token pairing one request message to its one response message.
///
/// Human-debuggable: segmented lowercase-alphanumeric groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Default segment count used for generated IDs.
    pub const DEFAULT_SEGMENTS: usize = 3;
    /// Default segment length used for generated IDs.
    pub const DEFAULT_SEGMENT_LENGTH: usize = 6;

    /// Generate a random ID with the given shape.
    pub fn generate(segment_count: usize, segment_length: usize) -> Self {
        Self(generate_segmented_id(segment_count, segment_length))
    }

    /// Generate a random ID with the default shape.
    pub fn fresh() -> Self {
        Self::generate(Self::DEFAULT_SEGMENTS, Self::DEFAULT_SEGMENT_LENGTH)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_requested_shape() {
        let id = generate_segmented_id(3, 6);
        let segments: Vec<&str> = id.split('-').collect();
        assert_eq!(segments.len(), 3);
        for segment in segments {
            assert_eq!(segment.len(), 6);
            assert!(
                segment
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            );
        }
    }

    #[test]
    fn single_segment_has_no_separator() {
        let id = generate_segmented_id(1, 4);
        assert_eq!(id.len(), 4);
        assert!(!id.contains('-'));
    }

    #[test]
    fn fresh_ids_differ() {
        // 36^18 outcomes; a collision here means the generator is broken.
        assert_ne!(CorrelationId::fresh(), CorrelationId::fresh());
    }
}
