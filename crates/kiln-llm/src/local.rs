//! Deterministic local embedder.
//!
//! Hashes words into a fixed-dimension feature vector. Not semantically
//! comparable to hosted models, but deterministic, offline, and good enough
//! for air-gapped setups and tests.

pub(crate) const LOCAL_DIMS: usize = 384;

/// Embed `text` into a normalized `LOCAL_DIMS`-dimensional vector.
///
/// Each lowercased word hashes to a bucket and a sign; identical input text
/// always yields an identical vector.
#[must_use]
pub(crate) fn hash_embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; LOCAL_DIMS];
    for word in text.split_whitespace() {
        let lower = word.to_lowercase();
        let hash = blake3::hash(lower.as_bytes());
        let bytes = hash.as_bytes();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        let h = u64::from_le_bytes(raw);
        let idx = usize::try_from(h % LOCAL_DIMS as u64).unwrap_or(0);
        let sign = if h & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vec[idx] += sign;
    }
    let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_for_identical_input() {
        let a = hash_embed("the quick brown fox");
        let b = hash_embed("the quick brown fox");
        assert_eq!(a, b);
    }

    #[test]
    fn fixed_dimension() {
        assert_eq!(hash_embed("hello world").len(), LOCAL_DIMS);
        assert_eq!(hash_embed("").len(), LOCAL_DIMS);
    }

    #[test]
    fn nonempty_input_is_normalized() {
        let v = hash_embed("some sample text for embedding");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn different_texts_differ() {
        assert_ne!(hash_embed("alpha beta"), hash_embed("gamma delta"));
    }

    #[test]
    fn empty_input_is_zero_vector() {
        assert!(hash_embed("").iter().all(|v| *v == 0.0));
    }
}
