//! WebAuthn assertion verification is delegated to an external service; the
//! relayer only forwards the VRF challenge data and the raw credential and
//! acts on the verdict.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::models::VrfData;

#[derive(Debug, Clone, Serialize)]
pub struct VerifyAuthenticationRequest<'a> {
    pub vrf_data: &'a VrfData,
    pub webauthn_authentication: &'a Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyAuthenticationOutcome {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait WebAuthnVerifier: Send + Sync {
    async fn verify_authentication(
        &self,
        request: VerifyAuthenticationRequest<'_>,
    ) -> AppResult<VerifyAuthenticationOutcome>;
}

/// Require a positive verdict; map everything else to `not_verified`.
pub fn ensure_verified(outcome: &VerifyAuthenticationOutcome) -> AppResult<()> {
    if outcome.success && outcome.verified {
        return Ok(());
    }
    let reason = outcome
        .message
        .clone()
        .or_else(|| outcome.code.clone())
        .unwrap_or_else(|| "WebAuthn verification failed".to_string());
    Err(AppError::not_verified(reason))
}

pub struct HttpWebAuthnVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl HttpWebAuthnVerifier {
    pub fn new(client: reqwest::Client, verify_url: impl Into<String>) -> Self {
        Self {
            client,
            verify_url: verify_url.into(),
        }
    }
}

#[async_trait]
impl WebAuthnVerifier for HttpWebAuthnVerifier {
    async fn verify_authentication(
        &self,
        request: VerifyAuthenticationRequest<'_>,
    ) -> AppResult<VerifyAuthenticationOutcome> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::internal(format!("WebAuthn verifier request failed: {e}")))?;

        let status = response.status();
        let outcome: VerifyAuthenticationOutcome = response
            .json()
            .await
            .map_err(|e| AppError::internal(format!("WebAuthn verifier reply was not JSON: {e}")))?;

        if !status.is_success() && outcome.message.is_none() {
            return Err(AppError::internal(format!(
                "WebAuthn verifier returned HTTP {status}"
            )));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
pub mod testing {
    //! A verifier double for service-level tests.

    use super::*;

    pub struct StaticVerifier {
        verified: bool,
    }

    impl StaticVerifier {
        pub fn approving() -> Self {
            Self { verified: true }
        }

        pub fn rejecting() -> Self {
            Self { verified: false }
        }
    }

    #[async_trait]
    impl WebAuthnVerifier for StaticVerifier {
        async fn verify_authentication(
            &self,
            _request: VerifyAuthenticationRequest<'_>,
        ) -> AppResult<VerifyAuthenticationOutcome> {
            Ok(VerifyAuthenticationOutcome {
                success: true,
                verified: self.verified,
                code: (!self.verified).then(|| "not_verified".to_string()),
                message: (!self.verified).then(|| "assertion rejected".to_string()),
            })
        }
    }
}
