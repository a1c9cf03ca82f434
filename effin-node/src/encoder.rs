//! Fingerprint transform
//!
//! Maps a [`Transaction`] to a fixed-length float vector. Layout of the
//! reference [`FraudEncoder`] (zero-padded to the configured dimension):
//!
//! | component | width | weight |
//! |-----------|-------|--------|
//! | behavioural signature | len(signature) | 1.5 |
//! | shared fraud pattern | 4 | 5.0 (fraud only) |
//! | amount / 5000 | 1 | 0.3 |
//! | merchant embedding | 4 | 0.5 |
//! | location embedding | 4 | 0.5 |
//! | device embedding | 4 | 0.5 |
//!
//! Categorical embeddings are derived from a SHA-256 seed of the category
//! value, so every bank node maps the same merchant to the same sub-vector.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

use effin_common::{Error, Result, Transaction};

/// Shared fraud signature, identical on every node
pub const FRAUD_VECTOR: [f32; 4] = [0.25, 0.22, 0.31, 0.45];

const CATEGORY_WIDTH: usize = 4;
const SIGNATURE_WEIGHT: f32 = 1.5;
const FRAUD_WEIGHT: f32 = 5.0;
const AMOUNT_SCALE: f64 = 5000.0;
const AMOUNT_WEIGHT: f32 = 0.3;
const CATEGORY_WEIGHT: f32 = 0.5;

/// Guard added to the norm before dividing
pub const NORM_EPSILON: f32 = 1e-12;

/// Deterministic transaction-to-vector transform
pub trait FingerprintTransform: Send + Sync {
    /// Output vector length
    fn dimension(&self) -> usize;

    /// Embed one transaction (not yet normalized)
    fn embed(&self, tx: &Transaction) -> Result<Vec<f32>>;
}

/// Reference fingerprint transform
pub struct FraudEncoder {
    dimension: usize,
    vocab: RwLock<HashMap<String, [f32; CATEGORY_WIDTH]>>,
}

impl FraudEncoder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vocab: RwLock::new(HashMap::new()),
        }
    }

    /// Deterministic sub-vector for a categorical value
    ///
    /// `field` namespaces the value so "devA" as a merchant and as a device
    /// do not share an embedding.
    fn category(&self, field: &str, value: &str) -> [f32; CATEGORY_WIDTH] {
        let key = format!("{}:{}", field, value);
        if let Ok(vocab) = self.vocab.read() {
            if let Some(v) = vocab.get(&key) {
                return *v;
            }
        }

        let digest = Sha256::digest(key.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);
        let mut embedding = [0f32; CATEGORY_WIDTH];
        for slot in embedding.iter_mut() {
            *slot = rng.gen_range(-0.5f32..0.5f32);
        }

        // A poisoned cache only costs recomputation.
        if let Ok(mut vocab) = self.vocab.write() {
            vocab.insert(key, embedding);
        }
        embedding
    }
}

impl FingerprintTransform for FraudEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, tx: &Transaction) -> Result<Vec<f32>> {
        tx.validate()?;

        let mut vec = Vec::with_capacity(self.dimension);
        vec.extend(tx.signature.iter().map(|v| *v as f32 * SIGNATURE_WEIGHT));

        if tx.is_fraud {
            vec.extend(FRAUD_VECTOR.iter().map(|v| v * FRAUD_WEIGHT));
        } else {
            vec.extend([0.0f32; 4]);
        }

        vec.push((tx.amount / AMOUNT_SCALE) as f32 * AMOUNT_WEIGHT);

        for (field, value) in [
            ("merchant", tx.merchant_category.as_str()),
            ("location", tx.location.as_str()),
            ("device", tx.device_fingerprint.as_str()),
        ] {
            vec.extend(self.category(field, value).iter().map(|v| v * CATEGORY_WEIGHT));
        }

        if vec.len() > self.dimension {
            return Err(Error::InvalidInput(format!(
                "transaction {} needs {} components, index dimension is {}",
                tx.id,
                vec.len(),
                self.dimension
            )));
        }
        vec.resize(self.dimension, 0.0);

        if vec.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "transaction {} produced a non-finite fingerprint",
                tx.id
            )));
        }
        Ok(vec)
    }
}

/// L2-normalize in place (epsilon-guarded)
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    let denom = norm + NORM_EPSILON;
    for v in vector.iter_mut() {
        *v /= denom;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(is_fraud: bool) -> Transaction {
        Transaction {
            id: "tx-1".to_string(),
            timestamp: 1_700_000_000.0,
            amount: 2500.0,
            merchant_category: "GroceryMart".to_string(),
            location: "Mumbai".to_string(),
            device_fingerprint: "devA".to_string(),
            signature: vec![0.1, 0.2, 0.3, 0.4],
            origin: "bank1".to_string(),
            is_fraud,
        }
    }

    #[test]
    fn test_embed_has_fixed_dimension() {
        let encoder = FraudEncoder::new(32);
        let v = encoder.embed(&tx(false)).unwrap();
        assert_eq!(v.len(), 32);
        // Padding is zero
        assert!(v[21..].iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_embed_is_deterministic_across_encoders() {
        let a = FraudEncoder::new(32).embed(&tx(false)).unwrap();
        let b = FraudEncoder::new(32).embed(&tx(false)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_layout_of_leading_components() {
        let v = FraudEncoder::new(32).embed(&tx(true)).unwrap();
        assert!((v[0] - 0.15).abs() < 1e-6);
        assert!((v[4] - 1.25).abs() < 1e-6);
        // amount 2500 / 5000 * 0.3
        assert!((v[8] - 0.15).abs() < 1e-6);
        for x in &v[9..21] {
            assert!(x.abs() <= 0.25);
        }
    }

    #[test]
    fn test_category_namespaces_differ() {
        let encoder = FraudEncoder::new(32);
        assert_ne!(encoder.category("merchant", "devA"), encoder.category("device", "devA"));
    }

    #[test]
    fn test_oversized_signature_rejected() {
        let encoder = FraudEncoder::new(16);
        let err = encoder.embed(&tx(false)).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_malformed_transaction_rejected() {
        let mut bad = tx(false);
        bad.amount = f64::NAN;
        assert!(FraudEncoder::new(32).embed(&bad).is_err());
    }

    #[test]
    fn test_normalize_unit_norm() {
        let mut v = vec![3.0f32, 4.0, 0.0];
        normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_zero_vector_stays_finite() {
        let mut v = vec![0.0f32; 8];
        normalize(&mut v);
        assert!(v.iter().all(|x| *x == 0.0));
    }
}
