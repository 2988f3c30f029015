//! Carrier collaborator the messenger webhook calls when an incoming
//! `connect` can't be resolved to a chatbot (§6 "must call the carrier's
//! reject endpoint with a reason"). Mirrors the `CallPersistence`/
//! `NullPersistence` split in `voicecore-runner`: a narrow trait plus a
//! no-op default for deployments that don't wire a real carrier account.

use async_trait::async_trait;

#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Rejects an inbound carrier call (e.g. `no_chatbot`, `disabled`).
    async fn reject_call(&self, carrier_call_id: &str, reason: &str);
}

pub struct NullCarrierClient;

#[async_trait]
impl CarrierClient for NullCarrierClient {
    async fn reject_call(&self, carrier_call_id: &str, reason: &str) {
        tracing::warn!(carrier_call_id, reason, "no carrier client configured, call left unanswered");
    }
}

/// WhatsApp Business Calling API reject endpoint, authenticated with the
/// access token issued alongside the app secret (§6 externals).
pub struct WhatsAppCarrierClient {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppCarrierClient {
    pub fn new(access_token: String, phone_number_id: String) -> Self {
        Self { http: reqwest::Client::new(), access_token, phone_number_id }
    }
}

#[async_trait]
impl CarrierClient for WhatsAppCarrierClient {
    async fn reject_call(&self, carrier_call_id: &str, reason: &str) {
        let url = format!("https://graph.facebook.com/v19.0/{}/calls", self.phone_number_id);
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "call_id": carrier_call_id,
            "status": "reject",
            "biz_opaque_callback_data": reason,
        });
        if let Err(err) = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
        {
            tracing::warn!(carrier_call_id, reason, error = %err, "carrier reject call failed");
        }
    }
}
