//! External random beacons.
//!
//! A beacon returns a random string bound to the round's commitment hash and
//! signed by a party other than the engine's outcome logic.

use crate::errors::FairnessError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const RANDOM_STRING_LENGTH: u32 = 20;
const RANDOM_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BeaconSource {
    RandomOrg,
    Local,
}

/// One signed draw from a beacon
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BeaconDraw {
    pub source: BeaconSource,
    pub randomness: String,
    pub signature: String,
    /// Exact bytes the signature covers
    pub payload: String,
    /// Who signed: `random.org` or the local public key in hex
    pub signer: String,
}

#[async_trait]
pub trait RandomBeacon: Send + Sync {
    fn source(&self) -> BeaconSource;

    /// Draw randomness bound to `user_data` (the round's commitment hash)
    async fn draw(&self, user_data: &str) -> Result<BeaconDraw, FairnessError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignedStringsParams<'a> {
    api_key: &'a str,
    n: u32,
    length: u32,
    characters: &'a str,
    replacement: bool,
    user_data: &'a str,
}

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'static str,
    params: SignedStringsParams<'a>,
    id: u64,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    result: Option<SignedStringsResult>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct SignedStringsResult {
    random: serde_json::Value,
    signature: String,
}

/// random.org `generateSignedStrings` client
pub struct RandomOrgBeacon {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl RandomOrgBeacon {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self, FairnessError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FairnessError::RandomnessUnavailable(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    fn parse_response(body: JsonRpcResponse, user_data: &str) -> Result<BeaconDraw, FairnessError> {
        if let Some(err) = body.error {
            return Err(FairnessError::RandomnessUnavailable(format!(
                "random.org error {}: {}",
                err.code, err.message
            )));
        }
        let result = body
            .result
            .ok_or_else(|| FairnessError::InvalidBeaconResponse("missing result".into()))?;

        let randomness = result
            .random
            .get("data")
            .and_then(|d| d.get(0))
            .and_then(|v| v.as_str())
            .ok_or_else(|| FairnessError::InvalidBeaconResponse("missing random.data[0]".into()))?
            .to_string();

        let echoed = result.random.get("userData").and_then(|v| v.as_str());
        if echoed != Some(user_data) {
            return Err(FairnessError::InvalidBeaconResponse(format!(
                "userData mismatch: expected {}, got {:?}",
                user_data, echoed
            )));
        }

        Ok(BeaconDraw {
            source: BeaconSource::RandomOrg,
            randomness,
            signature: result.signature,
            payload: result.random.to_string(),
            signer: "random.org".to_string(),
        })
    }
}

#[async_trait]
impl RandomBeacon for RandomOrgBeacon {
    fn source(&self) -> BeaconSource {
        BeaconSource::RandomOrg
    }

    async fn draw(&self, user_data: &str) -> Result<BeaconDraw, FairnessError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method: "generateSignedStrings",
            params: SignedStringsParams {
                api_key: &self.api_key,
                n: 1,
                length: RANDOM_STRING_LENGTH,
                characters: RANDOM_ALPHABET,
                replacement: false,
                user_data,
            },
            id: rand::random::<u32>() as u64,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| FairnessError::RandomnessUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FairnessError::RandomnessUnavailable(format!(
                "random.org returned HTTP {}",
                response.status()
            )));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| FairnessError::InvalidBeaconResponse(e.to_string()))?;

        let draw = Self::parse_response(body, user_data)?;
        tracing::debug!(user_data, "Drew signed randomness from random.org");
        Ok(draw)
    }
}

/// Random string over the beacon alphabet
pub(crate) fn random_string(len: u32) -> String {
    use rand::Rng;
    let alphabet = RANDOM_ALPHABET.as_bytes();
    let mut rng = rand::rngs::OsRng;
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

pub(crate) fn random_beacon_string() -> String {
    random_string(RANDOM_STRING_LENGTH)
}
