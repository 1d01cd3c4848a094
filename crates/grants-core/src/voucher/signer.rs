use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Opaque signing capability. The core never touches raw private-key
/// material beyond this trait — an implementer may back it with an
/// in-process key or a remote key-management service.
pub trait VoucherSigner: Send + Sync {
    fn sign(&self, bytes: &[u8]) -> [u8; 64];
    fn verifying_key(&self) -> VerifyingKey;
    /// Key identifier surfaced in the envelope header's `kid` field.
    fn key_id(&self) -> String {
        String::new()
    }
}

/// In-process Ed25519 signer. The secret is held only as raw bytes inside a
/// `Zeroizing` buffer, which wipes it on drop; `SigningKey` itself does not
/// expose in-place zeroization, so it is reconstructed on demand rather than
/// kept around as a field.
pub struct Ed25519Signer {
    secret: Zeroizing<[u8; 32]>,
    verifying_key: VerifyingKey,
    key_id: String,
}

impl Ed25519Signer {
    pub fn from_bytes(secret: &[u8; 32], key_id: impl Into<String>) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self {
            secret: Zeroizing::new(*secret),
            verifying_key: signing_key.verifying_key(),
            key_id: key_id.into(),
        }
    }

    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            secret: Zeroizing::new(signing_key.to_bytes()),
            verifying_key: signing_key.verifying_key(),
            key_id: String::new(),
        }
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.secret)
    }
}

impl VoucherSigner for Ed25519Signer {
    fn sign(&self, bytes: &[u8]) -> [u8; 64] {
        self.signing_key().sign(bytes).to_bytes()
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.verifying_key
    }

    fn key_id(&self) -> String {
        self.key_id.clone()
    }
}
