//! Read-side Stellar ledger access.
//!
//! The gateway never walks raw XDR blobs coming back from the RPC node; it
//! requests `xdrFormat: "json"` and navigates the decoded tree. Outbound
//! ledger keys are still binary XDR, built in [`crate::xdr`]. Identity
//! lookups are cached for the life of the process because a contract's
//! asset identity cannot change once deployed.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    classify::{classify_response, classify_transport, CallFailure},
    xdr::{self, ScAddress, XdrError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger RPC call failed: {0}")]
    Rpc(#[from] CallFailure),
    #[error("contract {contract_id} is not a Stellar asset contract")]
    NotAToken { contract_id: String },
    #[error("ledger entry has unexpected shape: {0}")]
    MalformedEntry(String),
    #[error("invalid address: {0}")]
    BadAddress(#[from] XdrError),
    #[error("unrecognized asset name {0:?}")]
    BadAssetName(String),
}

/// What a token contract mints, derived from its on-ledger metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetIdentity {
    Native,
    Issued { code: String, issuer: String },
}

/// Parse a Stellar Asset Contract's metadata name: `"native"` for lumens,
/// `"CODE:ISSUER"` for an issued asset.
pub fn parse_asset_name(name: &str) -> Result<AssetIdentity, LedgerError> {
    if name == "native" {
        return Ok(AssetIdentity::Native);
    }

    let Some((code, issuer)) = name.split_once(':') else {
        return Err(LedgerError::BadAssetName(name.to_string()));
    };
    let code_ok = (1..=12).contains(&code.len())
        && code.bytes().all(|b| b.is_ascii_alphanumeric());
    let issuer_ok = issuer.len() == 56 && issuer.starts_with('G');
    if !code_ok || !issuer_ok {
        return Err(LedgerError::BadAssetName(name.to_string()));
    }

    Ok(AssetIdentity::Issued {
        code: code.to_string(),
        issuer: issuer.to_string(),
    })
}

/// Seam over the RPC node's `getLedgerEntries`. Returns the decoded
/// `dataJson` for the entry, or `None` when the ledger has no such entry.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    async fn get_ledger_entry(&self, key_base64: &str) -> Result<Option<Value>, CallFailure>;
}

pub struct StellarRpcClient {
    client: reqwest::Client,
    rpc_url: String,
}

impl StellarRpcClient {
    pub fn new(rpc_url: String) -> Result<Self, CallFailure> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| CallFailure::fatal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, rpc_url })
    }
}

#[async_trait]
impl LedgerRpc for StellarRpcClient {
    async fn get_ledger_entry(&self, key_base64: &str) -> Result<Option<Value>, CallFailure> {
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getLedgerEntries",
            "params": { "keys": [key_base64], "xdrFormat": "json" },
        });
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|err| classify_transport(&err))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|err| classify_transport(&err))?;
        if let Some(failure) = classify_response(status, &body).into_failure() {
            return Err(failure);
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| CallFailure::fatal(format!("malformed RPC response: {err}")))?;
        if let Some(error) = parsed.get("error") {
            return Err(CallFailure::retryable(format!("RPC error: {error}")));
        }
        let data = parsed
            .pointer("/result/entries/0/dataJson")
            .cloned();
        Ok(data)
    }
}

pub struct LedgerResolver {
    rpc: Box<dyn LedgerRpc>,
    identities: RwLock<HashMap<String, AssetIdentity>>,
}

impl LedgerResolver {
    pub fn new(rpc: Box<dyn LedgerRpc>) -> Self {
        Self {
            rpc,
            identities: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve what asset a token contract represents. The first successful
    /// lookup per contract is cached for the life of the process.
    pub async fn asset_identity(&self, contract_id: &str) -> Result<AssetIdentity, LedgerError> {
        if let Some(identity) = self.identities.read().await.get(contract_id) {
            return Ok(identity.clone());
        }

        let contract = ScAddress::from_contract_strkey(contract_id)?;
        let key = xdr::contract_instance_key(&contract);
        let Some(data) = self.rpc.get_ledger_entry(&key).await? else {
            return Err(LedgerError::MalformedEntry(format!(
                "no instance entry for contract {contract_id}"
            )));
        };

        let instance = data
            .pointer("/contract_data/val/contract_instance")
            .ok_or_else(|| LedgerError::MalformedEntry("missing contract_instance".to_string()))?;

        // Wasm-backed contracts are not asset contracts, whatever their
        // storage happens to contain.
        let executable = instance
            .get("executable")
            .ok_or_else(|| LedgerError::MalformedEntry("missing executable".to_string()))?;
        if executable.get("stellar_asset").is_none() && executable != "stellar_asset" {
            return Err(LedgerError::NotAToken {
                contract_id: contract_id.to_string(),
            });
        }

        let name = instance_metadata_name(instance).ok_or_else(|| {
            LedgerError::MalformedEntry("instance storage has no METADATA name".to_string())
        })?;
        let identity = parse_asset_name(&name)?;

        self.identities
            .write()
            .await
            .insert(contract_id.to_string(), identity.clone());
        Ok(identity)
    }

    /// Token balance of `holder` on `contract_id`. A missing balance entry
    /// means the holder has simply never held the asset, so it reads as 0.
    pub async fn balance(&self, contract_id: &str, holder: &str) -> Result<i128, LedgerError> {
        let token = ScAddress::from_contract_strkey(contract_id)?;
        let holder = ScAddress::from_strkey(holder)?;
        let key = xdr::balance_entry_key(&token, &holder);
        let Some(data) = self.rpc.get_ledger_entry(&key).await? else {
            return Ok(0);
        };

        let amount = data
            .pointer("/contract_data/val/map")
            .and_then(Value::as_array)
            .and_then(|entries| {
                entries.iter().find(|entry| {
                    entry.pointer("/key/symbol").and_then(Value::as_str) == Some("amount")
                })
            })
            .and_then(|entry| entry.pointer("/val/i128"))
            .ok_or_else(|| LedgerError::MalformedEntry("balance entry has no amount".to_string()))?;

        parse_i128(amount)
            .ok_or_else(|| LedgerError::MalformedEntry("unparseable i128 amount".to_string()))
    }
}

/// Walk the instance storage for the `METADATA` map and pull its `name`.
fn instance_metadata_name(instance: &Value) -> Option<String> {
    let storage = instance.get("storage")?.as_array()?;
    let metadata = storage.iter().find(|entry| {
        entry.pointer("/key/symbol").and_then(Value::as_str) == Some("METADATA")
    })?;
    let fields = metadata.pointer("/val/map")?.as_array()?;
    let name = fields.iter().find(|field| {
        field.pointer("/key/symbol").and_then(Value::as_str) == Some("name")
    })?;
    name.pointer("/val/string")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// JSON-decoded i128 comes as `{"hi": ..., "lo": ...}` halves; the node may
/// emit them as numbers or as decimal strings.
fn parse_i128(value: &Value) -> Option<i128> {
    fn half(value: &Value) -> Option<i64> {
        if let Some(number) = value.as_i64() {
            return Some(number);
        }
        value.as_str()?.parse::<i64>().ok()
    }
    fn half_unsigned(value: &Value) -> Option<u64> {
        if let Some(number) = value.as_u64() {
            return Some(number);
        }
        value.as_str()?.parse::<u64>().ok()
    }

    let hi = half(value.get("hi")?)?;
    let lo = half_unsigned(value.get("lo")?)?;
    Some(((hi as i128) << 64) | lo as i128)
}
