use chrono::Local;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::models::batch::{BatchRequest, BatchResultPayload};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const SEND_RETRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitoringPayload {
    monitoring_name: String,
    count: usize,
}

/// Best-effort reporting of batch outcomes and liveness. Nothing here may
/// fail or block a processing run: every error ends in a log line.
pub struct ResultDispatcher {
    http: Client,
    callback_url: String,
    monitoring_url: String,
    monitoring_enabled: bool,
}

impl ResultDispatcher {
    pub fn new(callback_url: String, monitoring_url: String, monitoring_enabled: bool) -> Self {
        Self {
            http: Client::new(),
            callback_url,
            monitoring_url,
            monitoring_enabled,
        }
    }

    /// POST the whole batch's outcomes to the callback endpoint, then (if
    /// enabled) a count payload to the monitoring endpoint. The monitoring
    /// path never affects the callback path.
    pub async fn send_batch_result(&self, requests: &[BatchRequest]) {
        if requests.is_empty() {
            tracing::warn!("No batch results to send");
            return;
        }

        let payloads: Vec<BatchResultPayload> =
            requests.iter().map(BatchResultPayload::from).collect();

        match self.post_with_retry(&self.callback_url, &payloads).await {
            Ok(()) => {
                tracing::info!(count = payloads.len(), "Batch results delivered to callback");
            }
            Err(e) => {
                let failed_ids = requests
                    .iter()
                    .map(|r| r.request_id.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                tracing::error!(
                    error = %e,
                    request_ids = %failed_ids,
                    "Batch result delivery failed"
                );
            }
        }

        if !self.monitoring_enabled {
            return;
        }

        let today = Local::now().format("%Y-%m-%d");
        let body = MonitoringPayload {
            monitoring_name: format!("ai 검수결과 ({today})"),
            count: payloads.len(),
        };

        if let Err(e) = self.post_with_retry(&self.monitoring_url, &body).await {
            tracing::warn!(error = %e, "Monitoring count delivery failed");
        }
    }

    /// Liveness ping on its own schedule: tells monitoring the pipeline
    /// process is up even when no batch ran.
    pub async fn send_alive_ping(&self) {
        if !self.monitoring_enabled {
            return;
        }

        let body = MonitoringPayload {
            monitoring_name: "ai 생존여부".to_string(),
            count: 0,
        };

        match self.post_with_retry(&self.monitoring_url, &body).await {
            Ok(()) => tracing::debug!("Liveness ping delivered"),
            Err(e) => tracing::warn!(error = %e, "Liveness ping failed"),
        }
    }

    async fn post_with_retry<T: Serialize>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<(), reqwest::Error> {
        let mut attempt = 0;
        loop {
            let result = self
                .http
                .post(url)
                .timeout(SEND_TIMEOUT)
                .json(body)
                .send()
                .await
                .and_then(|response| response.error_for_status());

            match result {
                Ok(_) => return Ok(()),
                Err(e) if attempt < SEND_RETRIES => {
                    attempt += 1;
                    tracing::debug!(url, attempt, error = %e, "POST failed, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitoring_payload_uses_the_expected_field_names() {
        let body = MonitoringPayload {
            monitoring_name: "ai 생존여부".into(),
            count: 0,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["monitoringName"], "ai 생존여부");
        assert_eq!(json["count"], 0);
    }
}
