//! NEAR JSON-RPC client, scoped to the two queries the relayer performs:
//! access-key listings (scope checks) and transaction status (keygen tx
//! verification).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};

// ---------------------------------------------------------------------------
// Public data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyEntry {
    pub public_key: String,
    #[serde(default)]
    pub access_key: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyList {
    #[serde(default)]
    pub keys: Vec<AccessKeyEntry>,
}

/// The slice of a final execution outcome the keygen flow inspects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalExecutionOutcome {
    #[serde(default)]
    pub status: Value,
    #[serde(default)]
    pub transaction: Value,
}

impl FinalExecutionOutcome {
    /// Base64-decoded `SuccessValue`, when the transaction succeeded with one.
    pub fn success_value(&self) -> Option<Vec<u8>> {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine;
        let raw = self.status.get("SuccessValue")?.as_str()?;
        STANDARD.decode(raw).ok()
    }
}

// ---------------------------------------------------------------------------
// Client trait + JSON-RPC implementation
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NearClient: Send + Sync {
    async fn view_access_key_list(&self, account_id: &str) -> AppResult<AccessKeyList>;
    async fn tx_status(
        &self,
        tx_hash: &str,
        sender_account_id: &str,
    ) -> AppResult<FinalExecutionOutcome>;
}

pub struct HttpNearClient {
    client: Client,
    rpc_url: String,
    req_id: AtomicU64,
}

impl HttpNearClient {
    pub fn new(client: Client, rpc_url: impl Into<String>) -> Self {
        Self {
            client,
            rpc_url: rpc_url.into(),
            req_id: AtomicU64::new(1),
        }
    }

    async fn rpc_call(&self, method: &str, params: Value) -> AppResult<Value> {
        let id = self.req_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response: Value = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("NEAR RPC request failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::internal(format!("NEAR RPC reply was not JSON: {e}")))?;

        if let Some(error) = response.get("error") {
            return Err(AppError::internal(format!("NEAR RPC error: {error}")));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| AppError::internal("NEAR RPC reply missing result"))
    }
}

#[async_trait]
impl NearClient for HttpNearClient {
    async fn view_access_key_list(&self, account_id: &str) -> AppResult<AccessKeyList> {
        let result = self
            .rpc_call(
                "query",
                json!({
                    "request_type": "view_access_key_list",
                    "finality": "final",
                    "account_id": account_id,
                }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::internal(format!("Unexpected access key list shape: {e}")))
    }

    async fn tx_status(
        &self,
        tx_hash: &str,
        sender_account_id: &str,
    ) -> AppResult<FinalExecutionOutcome> {
        let result = self
            .rpc_call("tx", json!([tx_hash, sender_account_id]))
            .await?;
        serde_json::from_value(result)
            .map_err(|e| AppError::internal(format!("Unexpected tx status shape: {e}")))
    }
}
