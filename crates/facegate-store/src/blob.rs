//! Embedding blob codec: little-endian f32, four bytes per dimension.

use crate::StoreError;

/// Encode an embedding vector into its storage blob.
pub fn encode(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a storage blob back into an embedding vector.
pub fn decode(raw: &[u8]) -> Result<Vec<f32>, StoreError> {
    if raw.len() % 4 != 0 {
        return Err(StoreError::CorruptEmbedding(format!(
            "blob length {} is not a multiple of 4",
            raw.len()
        )));
    }
    Ok(raw
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let values = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE];
        assert_eq!(decode(&encode(&values)).unwrap(), values);
    }

    #[test]
    fn empty_vector() {
        assert!(decode(&encode(&[])).unwrap().is_empty());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let mut raw = encode(&[1.0f32]);
        raw.pop();
        assert!(matches!(
            decode(&raw),
            Err(StoreError::CorruptEmbedding(_))
        ));
    }

    #[test]
    fn encoded_length() {
        assert_eq!(encode(&[1.0, 2.0, 3.0]).len(), 12);
    }
}
