//! JSON-RPC client for a Lightning node with hold invoice support.

use super::traits::{DecodedInvoice, LightningNodeClient, RailError};
use crate::crypto::{PaymentHash, Preimage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

/// Lightning node reached over JSON-RPC
pub struct RpcLightningClient {
    client: Client,
    rpc_url: String,
}

impl RpcLightningClient {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            rpc_url: rpc_url.into(),
        }
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Params go out as a one-element array holding an object
    async fn call(&self, method: &str, params: Value) -> Result<Value, RailError> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [params],
        });
        debug!("{method} -> {}", self.rpc_url);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RailError::Network(e.to_string()))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| RailError::Network(e.to_string()))?;
        debug!("{method} <- {body}");

        parse_response(body)
    }
}

/// Map a JSON-RPC envelope to its result or a rail error
fn parse_response(body: Value) -> Result<Value, RailError> {
    if let Some(error) = body.get("error") {
        let msg = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error");
        return Err(classify(msg));
    }
    body.get("result")
        .cloned()
        .ok_or_else(|| RailError::Network("No result in response".to_string()))
}

fn classify(message: &str) -> RailError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("preimage") {
        RailError::InvalidPreimage
    } else if lower.contains("already settled") || lower.contains("already paid") {
        RailError::AlreadySettled
    } else if lower.contains("expired") {
        RailError::Expired
    } else if lower.contains("not found") {
        RailError::NotFound(message.to_string())
    } else if lower.contains("insufficient") {
        RailError::InsufficientFunds
    } else {
        RailError::PaymentFailed(message.to_string())
    }
}

fn hex_u64(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => u64::from_str_radix(s.trim_start_matches("0x"), 16).ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str, RailError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RailError::Network(format!("No {field} in response")))
}

#[async_trait]
impl LightningNodeClient for RpcLightningClient {
    async fn create_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        description: &str,
    ) -> Result<String, RailError> {
        let mut params = json!({
            "payment_hash": payment_hash.to_hex(),
            "expiry": format!("0x{expiry_secs:x}"),
            "description": description,
        });
        if let Some(amount) = amount_sats {
            params["amount"] = json!(format!("0x{amount:x}"));
        }

        let result = self.call("new_invoice", params).await?;
        Ok(str_field(&result, "invoice_address")?.to_string())
    }

    async fn create_invoice(
        &self,
        amount_sats: Option<u64>,
        expiry_secs: u64,
        description: &str,
    ) -> Result<String, RailError> {
        // Node generates the preimage when none is given
        let preimage = Preimage::random();
        let mut params = json!({
            "payment_preimage": preimage.to_hex(),
            "expiry": format!("0x{expiry_secs:x}"),
            "description": description,
        });
        if let Some(amount) = amount_sats {
            params["amount"] = json!(format!("0x{amount:x}"));
        }

        let result = self.call("new_invoice", params).await?;
        Ok(str_field(&result, "invoice_address")?.to_string())
    }

    async fn settle_hold_invoice(
        &self,
        payment_hash: &PaymentHash,
        preimage: &Preimage,
    ) -> Result<(), RailError> {
        if !payment_hash.verify(preimage) {
            return Err(RailError::InvalidPreimage);
        }
        let params = json!({
            "payment_hash": payment_hash.to_hex(),
            "payment_preimage": preimage.to_hex(),
        });
        self.call("settle_invoice", params).await?;
        Ok(())
    }

    async fn decode_invoice(&self, invoice: &str) -> Result<DecodedInvoice, RailError> {
        let result = self.call("parse_invoice", json!({ "invoice": invoice })).await?;
        let parsed = result.get("invoice").unwrap_or(&result);

        let payment_hash = str_field(parsed, "payment_hash")?
            .parse::<PaymentHash>()
            .map_err(|e| RailError::InvalidRequest(e.to_string()))?;
        let expiry_time = parsed
            .get("expiry_time")
            .and_then(hex_u64)
            .ok_or_else(|| RailError::Network("No expiry_time in response".to_string()))?;

        Ok(DecodedInvoice {
            payment_hash,
            amount_sats: parsed.get("amount").and_then(hex_u64),
            expiry_time,
        })
    }

    async fn estimate_fee(&self, invoice: &str, amount_sats: u64) -> Result<u64, RailError> {
        let params = json!({
            "invoice": invoice,
            "amount": format!("0x{amount_sats:x}"),
        });
        let result = self.call("estimate_fee", params).await?;
        result
            .get("fee")
            .and_then(hex_u64)
            .ok_or_else(|| RailError::Network("No fee in response".to_string()))
    }

    async fn pay_invoice(&self, invoice: &str, amount_sats: u64) -> Result<String, RailError> {
        let params = json!({
            "invoice": invoice,
            "amount": format!("0x{amount_sats:x}"),
        });
        let result = self.call("send_payment", params).await?;

        let status = result
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        match status {
            "success" | "inflight" | "created" => Ok(result
                .get("payment_hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()),
            _ => {
                let error = result
                    .get("failed_error")
                    .and_then(Value::as_str)
                    .unwrap_or("Payment failed");
                Err(RailError::PaymentFailed(error.to_string()))
            }
        }
    }
}
