use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{debug, error, info};

use crate::services::DepositService;

/// Background task that cancels pending deposits once their expiry passes
pub struct ExpirySweeper {
    deposits: Arc<DepositService>,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(deposits: Arc<DepositService>, interval: Duration) -> Self {
        Self { deposits, interval }
    }

    /// Run until the task is dropped
    pub async fn start(self) {
        let mut interval = time::interval(self.interval);
        info!("Expiry sweeper started, checking every {:?}", self.interval);

        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    /// One pass; returns how many deposits were cancelled
    pub async fn sweep_once(&self) -> usize {
        match self.deposits.expire_pending_deposits(Utc::now()).await {
            Ok(expired) => {
                for op in &expired {
                    debug!(
                        "Deposit {} ({}) for user {} expired",
                        op.id, op.external_reference, op.user_id
                    );
                }
                expired.len()
            }
            Err(e) => {
                error!("Error expiring pending deposits: {}", e);
                0
            }
        }
    }
}
