//! Payment gateway adapter: the consumed interface plus a Stripe-compatible client

pub mod signature;
pub mod stripe;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

pub use stripe::StripeGateway;

/// Intent created for a deposit without a saved instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Gateway id; correlates later callbacks with the pending deposit
    pub external_id: String,
    /// Opaque token the client uses to complete payment
    pub client_token: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    Succeeded,
    /// Accepted but not final; a callback reports the outcome
    Pending,
    Failed,
}

/// Result of charging a saved instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub status: ChargeStatus,
    /// Charge id once captured, the intent id while pending
    pub external_charge_id: Option<String>,
    pub error_message: Option<String>,
}

impl ChargeOutcome {
    pub fn succeeded(charge_id: impl Into<String>) -> Self {
        Self {
            status: ChargeStatus::Succeeded,
            external_charge_id: Some(charge_id.into()),
            error_message: None,
        }
    }

    pub fn pending(intent_id: impl Into<String>) -> Self {
        Self {
            status: ChargeStatus::Pending,
            external_charge_id: Some(intent_id.into()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ChargeStatus::Failed,
            external_charge_id: None,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ChargeStatus::Succeeded
    }
}

/// Asynchronous outcome reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayEventKind {
    Succeeded,
    Failed,
    RequiresAction,
    Processing,
    Canceled,
    /// Anything the wallet does not act on
    Other(String),
}

impl GatewayEventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Succeeded => "payment.succeeded",
            Self::Failed => "payment.failed",
            Self::RequiresAction => "payment.requires_action",
            Self::Processing => "payment.processing",
            Self::Canceled => "payment.canceled",
            Self::Other(raw) => raw,
        }
    }

    /// Map a gateway event type; accepts both the processor's and the wallet's names
    pub fn parse(raw: &str) -> Self {
        match raw {
            "payment_intent.succeeded" | "payment.succeeded" => Self::Succeeded,
            "payment_intent.payment_failed" | "payment.failed" => Self::Failed,
            "payment_intent.requires_action" | "payment.requires_action" => Self::RequiresAction,
            "payment_intent.processing" | "payment.processing" => Self::Processing,
            "payment_intent.canceled" | "payment.canceled" => Self::Canceled,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Authenticated callback event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    pub kind: GatewayEventKind,
    /// Intent id the event refers to
    pub external_reference: String,
    pub amount: Option<Decimal>,
    pub failure_message: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a customer record at the gateway; returns its id
    async fn create_customer(&self, user_id: Uuid) -> AppResult<String>;

    async fn create_intent(
        &self,
        amount: Decimal,
        customer_ref: Option<&str>,
        description: &str,
    ) -> AppResult<PaymentIntent>;

    /// Declines come back as a failed [`ChargeOutcome`]; transport problems as errors
    async fn charge_saved_instrument(
        &self,
        customer_ref: &str,
        amount: Decimal,
        instrument_ref: &str,
    ) -> AppResult<ChargeOutcome>;

    /// Authenticate and decode a callback body; `InvalidSignature` when it cannot be trusted
    fn verify_callback(&self, raw_body: &[u8], signature_header: &str) -> AppResult<GatewayEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!(
            GatewayEventKind::parse("payment_intent.succeeded"),
            GatewayEventKind::Succeeded
        );
        assert_eq!(
            GatewayEventKind::parse("payment_intent.payment_failed"),
            GatewayEventKind::Failed
        );
        assert_eq!(GatewayEventKind::parse("payment.canceled"), GatewayEventKind::Canceled);
        assert_eq!(
            GatewayEventKind::parse("charge.refunded"),
            GatewayEventKind::Other("charge.refunded".to_string())
        );
        assert_eq!(GatewayEventKind::Processing.as_str(), "payment.processing");
    }
}
