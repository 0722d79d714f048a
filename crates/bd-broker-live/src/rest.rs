//! Live REST `BrokerAdapter`.
//!
//! `reqwest::blocking` cannot be dropped inside an async context without
//! panicking on this Tokio version, so every call wraps its blocking work
//! in `tokio::task::block_in_place`. `BrokerAdapter` methods are `&self`
//! and synchronous per the trait contract; `block_in_place` lets the
//! caller stay on a multi-threaded Tokio runtime without special-casing
//! this adapter.

use std::time::Duration;

use bd_execution::{
    BrokerAdapter, BrokerCancelResponse, BrokerInvokeToken, BrokerReplaceRequest,
    BrokerReplaceResponse, BrokerSubmitRequest, BrokerSubmitResponse,
};
use serde::Deserialize;

/// Connection details for the live REST endpoint.
#[derive(Clone, Debug)]
pub struct LiveBrokerConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub timeout_ms: u64,
}

impl LiveBrokerConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            timeout_ms: 5_000,
        }
    }
}

pub struct LiveBroker {
    client: reqwest::blocking::Client,
    config: LiveBrokerConfig,
}

#[derive(Deserialize)]
struct OrderAck {
    order_id: String,
    status: String,
}

impl LiveBroker {
    pub fn new(config: LiveBrokerConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authed(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        builder
            .header("X-API-KEY", &self.config.api_key)
            .header("X-API-SECRET", &self.config.api_secret)
    }
}

impl BrokerAdapter for LiveBroker {
    fn submit_order(
        &self,
        req: BrokerSubmitRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerSubmitResponse, Box<dyn std::error::Error>> {
        tokio::task::block_in_place(|| {
            let body = serde_json::json!({
                "clientOrderId": req.order_id,
                "symbol": req.symbol,
                "quantity": req.quantity,
                "orderType": req.order_type,
                "limitPrice": req.limit_price,
                "timeInForce": req.time_in_force,
            });
            let resp = self
                .authed(self.client.post(self.endpoint("/v1/orders")))
                .json(&body)
                .send()?
                .error_for_status()?;
            let ack: OrderAck = resp.json()?;
            Ok(BrokerSubmitResponse {
                broker_order_id: ack.order_id,
                submitted_at: chrono::Utc::now().timestamp_millis() as u64,
                status: ack.status,
            })
        })
    }

    fn cancel_order(
        &self,
        broker_order_id: &str,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerCancelResponse, Box<dyn std::error::Error>> {
        tokio::task::block_in_place(|| {
            let resp = self
                .authed(
                    self.client
                        .delete(self.endpoint(&format!("/v1/orders/{broker_order_id}"))),
                )
                .send()?
                .error_for_status()?;
            let ack: OrderAck = resp.json()?;
            Ok(BrokerCancelResponse {
                broker_order_id: ack.order_id,
                cancelled_at: chrono::Utc::now().timestamp_millis() as u64,
                status: ack.status,
            })
        })
    }

    fn replace_order(
        &self,
        req: BrokerReplaceRequest,
        _token: &BrokerInvokeToken,
    ) -> Result<BrokerReplaceResponse, Box<dyn std::error::Error>> {
        tokio::task::block_in_place(|| {
            let body = serde_json::json!({
                "quantity": req.quantity,
                "limitPrice": req.limit_price,
                "timeInForce": req.time_in_force,
            });
            let resp = self
                .authed(
                    self.client
                        .patch(self.endpoint(&format!("/v1/orders/{}", req.broker_order_id))),
                )
                .json(&body)
                .send()?
                .error_for_status()?;
            let ack: OrderAck = resp.json()?;
            Ok(BrokerReplaceResponse {
                broker_order_id: ack.order_id,
                replaced_at: chrono::Utc::now().timestamp_millis() as u64,
                status: ack.status,
            })
        })
    }
}
