use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{signature, ChargeOutcome, GatewayEvent, GatewayEventKind, PaymentGateway, PaymentIntent};
use crate::config::GatewayConfig;
use crate::error::{AppError, AppResult};

/// Stripe-compatible REST client
pub struct StripeGateway {
    client: Client,
    config: GatewayConfig,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct IntentResponse {
    id: String,
    client_secret: Option<String>,
    status: String,
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: WebhookObject,
}

#[derive(Debug, Deserialize)]
struct WebhookObject {
    id: String,
    amount: Option<i64>,
    last_payment_error: Option<ErrorBody>,
}

/// Amounts travel in minor units (cents)
pub fn to_minor_units(amount: Decimal) -> AppResult<i64> {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp(0)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("Amount out of range: {}", amount)))
}

pub fn from_minor_units(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

impl StripeGateway {
    pub fn new(config: GatewayConfig, currency: &str) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            currency: currency.to_lowercase(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn post_form(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> AppResult<(StatusCode, String)> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| {
                error!("Payment gateway request to {} failed: {}", path, e);
                AppError::ExternalGateway(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AppError::ExternalGateway(e.to_string()))?;
        Ok((status, body))
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .ok()
            .and_then(|e| e.error.message.or(e.error.code))
            .unwrap_or_else(|| "Payment gateway error".to_string())
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_customer(&self, user_id: Uuid) -> AppResult<String> {
        let form = [("metadata[user_id]", user_id.to_string())];
        let (status, body) = self.post_form("/v1/customers", &form).await?;
        if !status.is_success() {
            return Err(AppError::ExternalGateway(Self::error_message(&body)));
        }

        let customer: CustomerResponse = serde_json::from_str(&body)?;
        info!("Created gateway customer {} for user {}", customer.id, user_id);
        Ok(customer.id)
    }

    async fn create_intent(
        &self,
        amount: Decimal,
        customer_ref: Option<&str>,
        description: &str,
    ) -> AppResult<PaymentIntent> {
        let mut form = vec![
            ("amount", to_minor_units(amount)?.to_string()),
            ("currency", self.currency.clone()),
            ("description", description.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[type]", "deposit".to_string()),
        ];
        if let Some(customer) = customer_ref {
            form.push(("customer", customer.to_string()));
        }

        let (status, body) = self.post_form("/v1/payment_intents", &form).await?;
        if !status.is_success() {
            return Err(AppError::ExternalGateway(Self::error_message(&body)));
        }

        let intent: IntentResponse = serde_json::from_str(&body)?;
        let client_token = intent.client_secret.ok_or_else(|| {
            AppError::ExternalGateway(format!("Intent {} has no client secret", intent.id))
        })?;

        info!("Created payment intent {} for {}", intent.id, amount);
        Ok(PaymentIntent {
            external_id: intent.id,
            client_token,
            status: intent.status,
        })
    }

    async fn charge_saved_instrument(
        &self,
        customer_ref: &str,
        amount: Decimal,
        instrument_ref: &str,
    ) -> AppResult<ChargeOutcome> {
        let form = [
            ("amount", to_minor_units(amount)?.to_string()),
            ("currency", self.currency.clone()),
            ("customer", customer_ref.to_string()),
            ("payment_method", instrument_ref.to_string()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
            ("metadata[type]", "deposit".to_string()),
        ];

        let (status, body) = self.post_form("/v1/payment_intents", &form).await?;

        // Card declines come back as 402 with a user-facing message
        if status == StatusCode::PAYMENT_REQUIRED {
            let message = Self::error_message(&body);
            warn!("Charge for customer {} declined: {}", customer_ref, message);
            return Ok(ChargeOutcome::failed(message));
        }
        if !status.is_success() {
            return Err(AppError::ExternalGateway(Self::error_message(&body)));
        }

        let intent: IntentResponse = serde_json::from_str(&body)?;
        match intent.status.as_str() {
            "succeeded" => {
                info!("Charged customer {} {}", customer_ref, amount);
                Ok(ChargeOutcome::succeeded(
                    intent.latest_charge.unwrap_or(intent.id),
                ))
            }
            "processing" | "requires_action" => {
                info!("Charge intent {} is {}, awaiting callback", intent.id, intent.status);
                Ok(ChargeOutcome::pending(intent.id))
            }
            other => {
                warn!("Charge intent {} ended in status {}", intent.id, other);
                Ok(ChargeOutcome::failed(format!("Payment status: {}", other)))
            }
        }
    }

    fn verify_callback(&self, raw_body: &[u8], signature_header: &str) -> AppResult<GatewayEvent> {
        signature::verify(
            &self.config.webhook_secret,
            signature_header,
            raw_body,
            self.config.signature_tolerance_secs,
            Utc::now().timestamp(),
        )?;

        let payload: WebhookPayload = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::Validation(format!("Malformed callback body: {}", e)))?;

        Ok(GatewayEvent {
            id: payload.id,
            kind: GatewayEventKind::parse(&payload.event_type),
            external_reference: payload.data.object.id,
            amount: payload.data.object.amount.map(from_minor_units),
            failure_message: payload
                .data
                .object
                .last_payment_error
                .and_then(|e| e.message),
        })
    }
}
