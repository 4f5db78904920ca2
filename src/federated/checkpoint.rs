//! Global-state checkpoints.
//!
//! Layout: `b"FPCK"` magic, 32-byte SHA3-256 digest of the uncompressed
//! payload, then the LZ4-compressed bincode payload (size-prepended).

use crate::core::{now, sha3_digest, Error, Hash256, ParameterState, Result, Timestamp};
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAGIC: &[u8; 4] = b"FPCK";
const HEADER_LEN: usize = 4 + 32;

/// Snapshot of the global model between rounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Completed rounds at snapshot time
    pub round: u64,
    /// Snapshot time
    pub created_at: Timestamp,
    /// Global parameter state
    pub state: ParameterState,
}

impl Checkpoint {
    pub fn new(round: u64, state: ParameterState) -> Self {
        Self {
            round,
            created_at: now(),
            state,
        }
    }

    /// Digest of the serialized checkpoint.
    pub fn digest(&self) -> Result<Hash256> {
        let payload = bincode::serialize(self)?;
        Ok(sha3_digest(&[&payload]))
    }

    /// Encode to the sealed, compressed byte format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let digest = sha3_digest(&[&payload]);
        let compressed = compress_prepend_size(&payload);

        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(digest.as_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Decode and verify bytes produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(Error::Checkpoint("not a checkpoint".to_string()));
        }
        let mut expected = [0u8; 32];
        expected.copy_from_slice(&bytes[4..HEADER_LEN]);

        let payload = decompress_size_prepended(&bytes[HEADER_LEN..])
            .map_err(|e| Error::Checkpoint(e.to_string()))?;
        let actual = sha3_digest(&[&payload]);
        if actual != Hash256::new(expected) {
            return Err(Error::Checkpoint(format!(
                "digest mismatch: stored {}, computed {}",
                Hash256::new(expected),
                actual
            )));
        }
        Ok(bincode::deserialize(&payload)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Tensor;

    fn checkpoint() -> Checkpoint {
        let mut state = ParameterState::new();
        state.insert("linear.weight", Tensor::from_vec(&[2, 2], vec![0.1, 0.2, 0.3, 0.4]).unwrap());
        state.insert("linear.bias", Tensor::zeros(&[2]));
        Checkpoint::new(12, state)
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = checkpoint();
        let decoded = Checkpoint::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.digest().unwrap(), original.digest().unwrap());
    }

    #[test]
    fn test_tampered_digest_rejected() {
        let mut bytes = checkpoint().to_bytes().unwrap();
        bytes[10] ^= 0xFF;
        assert!(matches!(
            Checkpoint::from_bytes(&bytes),
            Err(Error::Checkpoint(_))
        ));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = checkpoint().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(Checkpoint::from_bytes(&bytes).is_err());
        assert!(Checkpoint::from_bytes(b"FP").is_err());
    }

    #[test]
    fn test_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "fedprivacy-checkpoint-{}.bin",
            std::process::id()
        ));
        let original = checkpoint();
        original.save(&path).unwrap();
        let loaded = Checkpoint::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, original);
    }
}
