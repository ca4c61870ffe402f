use crate::errors::{FairnessError, StorageError};
use crate::fairness::beacon::{random_beacon_string, BeaconDraw, BeaconSource, RandomBeacon};
use crate::storage::{KvBackend, WriteOp};
use async_trait::async_trait;
use schnorrkel::context::SigningContext;
use schnorrkel::{ExpansionMode, Keypair, MiniSecretKey, PublicKey, Signature};
use std::sync::Arc;

const SIGNING_CONTEXT: &[u8] = b"wagerline-beacon";
const LOCAL_SEED_KEY: &[u8] = b"fairness:local_beacon_seed";

/// Development beacon: random strings signed with the engine's own key.
///
/// Not an independent party, so production mode refuses it, but every draw is
/// still signed and verifiable against the published public key.
pub struct LocalBeacon {
    keypair: Arc<Keypair>,
}

impl LocalBeacon {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair: Arc::new(keypair),
        }
    }

    /// Fresh key (tests)
    pub fn new_random() -> Self {
        let mini = MiniSecretKey::generate_with(rand_core::OsRng);
        Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519))
    }

    /// Key persisted in storage so the public key is stable across restarts
    pub fn load_or_create(storage: &dyn KvBackend) -> Result<Self, StorageError> {
        if let Some(existing) = storage.get(LOCAL_SEED_KEY)? {
            let seed: [u8; 32] = existing.try_into().map_err(|_| {
                StorageError::CorruptedData("Local beacon seed must be 32 bytes".to_string())
            })?;
            let mini = MiniSecretKey::from_bytes(&seed).map_err(|e| {
                StorageError::CorruptedData(format!("Invalid local beacon seed: {:?}", e))
            })?;
            return Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)));
        }

        let mini = MiniSecretKey::generate_with(rand_core::OsRng);
        storage.write_batch(vec![WriteOp::Put(
            LOCAL_SEED_KEY.to_vec(),
            mini.to_bytes().to_vec(),
        )])?;
        tracing::info!("Generated new local beacon signing key");
        Ok(Self::new(mini.expand_to_keypair(ExpansionMode::Ed25519)))
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.keypair.public.to_bytes())
    }

    fn sign(&self, payload: &str) -> String {
        let ctx = SigningContext::new(SIGNING_CONTEXT);
        let signature = self.keypair.sign(ctx.bytes(payload.as_bytes()));
        hex::encode(signature.to_bytes())
    }

    /// Check a locally signed draw (public verification function)
    pub fn verify_draw(draw: &BeaconDraw, user_data: &str) -> Result<bool, FairnessError> {
        if draw.source != BeaconSource::Local {
            return Ok(false);
        }
        if draw.payload != local_payload(user_data, &draw.randomness) {
            return Ok(false);
        }

        let public_key_bytes = hex::decode(&draw.signer)
            .map_err(|e| FairnessError::InvalidSignature(format!("Invalid public key hex: {}", e)))?;
        let public_key = PublicKey::from_bytes(&public_key_bytes)
            .map_err(|e| FairnessError::InvalidSignature(format!("Invalid public key: {:?}", e)))?;

        let signature_bytes = hex::decode(&draw.signature)
            .map_err(|e| FairnessError::InvalidSignature(format!("Invalid signature hex: {}", e)))?;
        let signature = Signature::from_bytes(&signature_bytes)
            .map_err(|e| FairnessError::InvalidSignature(format!("Invalid signature: {:?}", e)))?;

        let ctx = SigningContext::new(SIGNING_CONTEXT);
        Ok(public_key
            .verify(ctx.bytes(draw.payload.as_bytes()), &signature)
            .is_ok())
    }
}

fn local_payload(user_data: &str, randomness: &str) -> String {
    format!("{}:{}", user_data, randomness)
}

#[async_trait]
impl RandomBeacon for LocalBeacon {
    fn source(&self) -> BeaconSource {
        BeaconSource::Local
    }

    async fn draw(&self, user_data: &str) -> Result<BeaconDraw, FairnessError> {
        let randomness = random_beacon_string();
        let payload = local_payload(user_data, &randomness);
        Ok(BeaconDraw {
            source: BeaconSource::Local,
            signature: self.sign(&payload),
            signer: self.public_key_hex(),
            randomness,
            payload,
        })
    }
}
