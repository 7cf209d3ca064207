//! Reed-Solomon erasure coding
//!
//! Systematic (k, n) coding over bytes: data is split into k chunks and
//! encoded into n equal-length shards, any k of which reconstruct the
//! original. Shards 0..k are the input chunks themselves; the rest are
//! parity.
//!
//! The decode path strips trailing zero bytes to undo encode-side padding,
//! which is only safe for effectively-random input. Callers must feed the
//! codec ciphertext, never raw plaintext.

use crate::error::{PeerVaultError, Result};
use bytes::Bytes;
use reed_solomon_erasure::galois_8::ReedSolomon;

/// Systematic Reed-Solomon encoder/decoder
pub struct ErasureCodec {
    required_shards: usize,
    total_shards: usize,
    rs: ReedSolomon,
}

impl ErasureCodec {
    /// Create a codec producing `total` shards of which any `required`
    /// suffice to reconstruct.
    pub fn new(required: usize, total: usize) -> Result<Self> {
        if required == 0 {
            return Err(PeerVaultError::Configuration(
                "shards_required must be > 0".to_string(),
            ));
        }
        if total <= required {
            return Err(PeerVaultError::Configuration(format!(
                "shards_total ({}) must exceed shards_required ({})",
                total, required
            )));
        }
        let rs = ReedSolomon::new(required, total - required)?;
        Ok(Self {
            required_shards: required,
            total_shards: total,
            rs,
        })
    }

    /// Minimum shards needed for reconstruction (k)
    pub fn required_shards(&self) -> usize {
        self.required_shards
    }

    /// Total shards produced (n)
    pub fn total_shards(&self) -> usize {
        self.total_shards
    }

    /// Number of parity shards
    pub fn parity_shards(&self) -> usize {
        self.total_shards - self.required_shards
    }

    /// Maximum number of lost shards that can be tolerated
    pub fn max_loss(&self) -> usize {
        self.parity_shards()
    }

    /// Encode data into `total` equal-length shards.
    ///
    /// Data is zero-padded to the smallest length divisible by `required`
    /// before splitting; the padding is removed again by [`decode`].
    ///
    /// [`decode`]: ErasureCodec::decode
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Bytes>> {
        if data.is_empty() {
            return Err(PeerVaultError::Erasure(
                "cannot encode empty input".to_string(),
            ));
        }

        let pad = (self.required_shards - data.len() % self.required_shards) % self.required_shards;
        let mut padded = data.to_vec();
        padded.resize(data.len() + pad, 0);

        let shard_size = padded.len() / self.required_shards;
        let mut shards: Vec<Vec<u8>> = padded.chunks(shard_size).map(|c| c.to_vec()).collect();

        for _ in 0..self.parity_shards() {
            shards.push(vec![0u8; shard_size]);
        }

        self.rs.encode(&mut shards)?;

        Ok(shards.into_iter().map(Bytes::from).collect())
    }

    /// Reconstruct the original data from any `required` of the `total`
    /// shards, given as (index, bytes) pairs.
    ///
    /// Out-of-range indices are ignored. Fails with
    /// [`PeerVaultError::InsufficientShards`] when fewer than `required`
    /// usable shards remain. Trailing zero bytes are stripped after
    /// reconstruction.
    pub fn decode(&self, shards: &[(usize, Bytes)]) -> Result<Vec<u8>> {
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; self.total_shards];
        for (index, data) in shards {
            if *index < self.total_shards {
                slots[*index] = Some(data.to_vec());
            }
        }

        let available = slots.iter().filter(|s| s.is_some()).count();
        if available < self.required_shards {
            return Err(PeerVaultError::InsufficientShards {
                available,
                required: self.required_shards,
            });
        }

        self.rs.reconstruct(&mut slots)?;

        let shard_size = slots[0].as_ref().map(|s| s.len()).unwrap_or(0);
        let mut result = Vec::with_capacity(shard_size * self.required_shards);
        for slot in slots.iter().take(self.required_shards) {
            match slot {
                Some(shard) => result.extend_from_slice(shard),
                None => {
                    return Err(PeerVaultError::Erasure(
                        "reconstruction left a data shard empty".to_string(),
                    ))
                }
            }
        }

        while result.last() == Some(&0) {
            result.pop();
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_shards(shards: Vec<Bytes>) -> Vec<(usize, Bytes)> {
        shards.into_iter().enumerate().collect()
    }

    #[test]
    fn test_invalid_config() {
        assert!(ErasureCodec::new(0, 4).is_err());
        assert!(ErasureCodec::new(4, 4).is_err());
        assert!(ErasureCodec::new(5, 4).is_err());
        assert!(ErasureCodec::new(8, 20).is_ok());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let codec = ErasureCodec::new(8, 20).unwrap();
        let original = b"The quick brown fox jumps over the lazy dog".to_vec();

        let shards = codec.encode(&original).unwrap();
        assert_eq!(shards.len(), 20);

        let decoded = codec.decode(&all_shards(shards)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_shards_equal_length() {
        let codec = ErasureCodec::new(8, 20).unwrap();
        // 43 bytes: pads to 48, shard size 6
        let shards = codec.encode(&vec![7u8; 43]).unwrap();
        assert!(shards.iter().all(|s| s.len() == shards[0].len()));
        assert_eq!(shards[0].len(), 6);
    }

    #[test]
    fn test_systematic_prefix() {
        let codec = ErasureCodec::new(4, 6).unwrap();
        let data: Vec<u8> = (1..=16).collect();

        let shards = codec.encode(&data).unwrap();
        for (i, chunk) in data.chunks(4).enumerate() {
            assert_eq!(shards[i].as_ref(), chunk, "shard {} is not systematic", i);
        }
    }

    #[test]
    fn test_decode_with_maximum_loss() {
        let codec = ErasureCodec::new(8, 20).unwrap();
        let original: Vec<u8> = (0..4096).map(|i| (i % 251 + 1) as u8).collect();

        let shards = codec.encode(&original).unwrap();

        // Drop 12 shards (the maximum), keeping an arbitrary 8
        let kept: Vec<(usize, Bytes)> = all_shards(shards)
            .into_iter()
            .filter(|(i, _)| [1, 3, 5, 9, 11, 14, 17, 19].contains(i))
            .collect();

        let decoded = codec.decode(&kept).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_insufficient_shards() {
        let codec = ErasureCodec::new(8, 20).unwrap();
        let shards = codec.encode(b"some data worth keeping").unwrap();

        let kept: Vec<(usize, Bytes)> = all_shards(shards).into_iter().take(7).collect();

        let result = codec.decode(&kept);
        assert!(matches!(
            result,
            Err(PeerVaultError::InsufficientShards {
                available: 7,
                required: 8
            })
        ));
    }

    #[test]
    fn test_decode_ignores_out_of_range_indices() {
        let codec = ErasureCodec::new(2, 4).unwrap();
        let shards = codec.encode(b"abcd").unwrap();

        let mut kept = all_shards(shards);
        kept.push((99, Bytes::from_static(b"junk")));

        let decoded = codec.decode(&kept).unwrap();
        assert_eq!(decoded, b"abcd");
    }

    #[test]
    fn test_small_config() {
        let codec = ErasureCodec::new(2, 4).unwrap();
        let original = b"hello world".to_vec();

        let shards = codec.encode(&original).unwrap();
        assert_eq!(shards.len(), 4);
        // 11 bytes pads to 12, shard size 6
        assert_eq!(shards[0].len(), 6);

        // Any two shards suffice
        let kept: Vec<(usize, Bytes)> = all_shards(shards)
            .into_iter()
            .filter(|(i, _)| *i == 1 || *i == 3)
            .collect();
        assert_eq!(codec.decode(&kept).unwrap(), original);
    }

    #[test]
    fn test_trailing_zero_caveat() {
        // Padding removal eats a genuine trailing zero; this is the
        // documented reason the codec only accepts ciphertext.
        let codec = ErasureCodec::new(2, 4).unwrap();
        let data = b"data\0".to_vec();

        let shards = codec.encode(&data).unwrap();
        let decoded = codec.decode(&all_shards(shards)).unwrap();
        assert_eq!(decoded, b"data");
    }

    #[test]
    fn test_empty_input_rejected() {
        let codec = ErasureCodec::new(2, 4).unwrap();
        assert!(codec.encode(b"").is_err());
    }

    #[test]
    fn test_exact_multiple_no_padding() {
        let codec = ErasureCodec::new(4, 6).unwrap();
        let data: Vec<u8> = (1..=12).collect();

        let shards = codec.encode(&data).unwrap();
        assert_eq!(shards[0].len(), 3);
        assert_eq!(codec.decode(&all_shards(shards)).unwrap(), data);
    }
}
