use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of a queued inspection request. Stored as uppercase text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Outcome of the AI inspection itself, independent of the request lifecycle.
/// A rejected listing is `status = COMPLETED, inspection_status = FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum InspectionStatus {
    Completed,
    Failed,
}

/// Observed state of the per-day ingestion gate.
///
/// `None` and `Error` are inferred, never stored: `None` means no usable row
/// exists for the day, `Error` means more than one row exists (invariant
/// breach) or the stored value is unrecognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum IngestStatus {
    None,
    Pending,
    Success,
    Failed,
    Error,
}

/// A queued inspection request (one row of the work queue).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub request_id: i64,
    pub batch_job_id: String,
    pub status: BatchStatus,
    pub inspection_status: Option<InspectionStatus>,
    pub goods_code: String,
    pub goods_name: String,
    pub mobile_goods_name: String,
    pub sale_price: i64,
    pub buy_price: i64,
    pub goods_info: String,
    pub image_html: String,
    pub representative_file: String,
    pub lgroup: Option<String>,
    pub lgroup_name: Option<String>,
    pub mgroup: Option<String>,
    pub mgroup_name: Option<String>,
    pub sgroup: Option<String>,
    pub sgroup_name: Option<String>,
    pub dgroup: Option<String>,
    pub dgroup_name: Option<String>,
    pub forbidden_word: Option<String>,
    pub error_message: Option<String>,
    pub retries: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchRequest {
    /// Prompt-facing view of the listing.
    pub fn to_goods(&self) -> crate::models::goods::Goods {
        crate::models::goods::Goods {
            goods_code: self.goods_code.clone(),
            goods_name: self.goods_name.clone(),
            mobile_goods_name: self.mobile_goods_name.clone(),
            sale_price: self.sale_price,
            buy_price: self.buy_price,
            goods_info: self.goods_info.clone(),
            lgroup: self.lgroup.clone(),
            mgroup: self.mgroup.clone(),
            sgroup: self.sgroup.clone(),
            dgroup: self.dgroup.clone(),
        }
    }
}

/// Fields of a request as produced by the importer, before it has an id.
#[derive(Debug, Clone)]
pub struct NewBatchRequest {
    pub goods_code: String,
    pub goods_name: String,
    pub mobile_goods_name: String,
    pub sale_price: i64,
    pub buy_price: i64,
    pub goods_info: String,
    pub image_html: String,
    pub representative_file: String,
    pub lgroup: Option<String>,
    pub lgroup_name: Option<String>,
    pub mgroup: Option<String>,
    pub mgroup_name: Option<String>,
    pub sgroup: Option<String>,
    pub sgroup_name: Option<String>,
    pub dgroup: Option<String>,
    pub dgroup_name: Option<String>,
}

/// Per-request outcome reported to the callback endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultPayload {
    pub request_id: i64,
    pub batch_job_id: String,
    pub goods_code: String,
    pub status: BatchStatus,
    pub inspection_status: Option<InspectionStatus>,
    pub forbidden_word: Option<String>,
    pub error_message: Option<String>,
}

impl From<&BatchRequest> for BatchResultPayload {
    fn from(request: &BatchRequest) -> Self {
        Self {
            request_id: request.request_id,
            batch_job_id: request.batch_job_id.clone(),
            goods_code: request.goods_code.clone(),
            status: request.status,
            inspection_status: request.inspection_status,
            forbidden_word: request.forbidden_word.clone(),
            error_message: request.error_message.clone(),
        }
    }
}

/// Filters accepted by the read-only results endpoint.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ResultQuery {
    #[garde(length(min = 8, max = 8))]
    pub yyyymmdd: Option<String>,

    #[garde(length(max = 10))]
    pub status: Option<String>,

    #[garde(length(max = 10))]
    pub inspection_status: Option<String>,

    #[garde(length(max = 2))]
    pub lgroup: Option<String>,

    #[garde(length(max = 2))]
    pub mgroup: Option<String>,

    #[garde(length(max = 2))]
    pub sgroup: Option<String>,

    #[garde(length(max = 2))]
    pub dgroup: Option<String>,

    #[garde(length(max = 100))]
    pub forbidden_word: Option<String>,

    #[garde(length(max = 20))]
    pub goods_code: Option<String>,

    #[garde(length(max = 200))]
    pub goods_name: Option<String>,
}

/// Response envelope shared by the operational endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_status_round_trips_as_uppercase_text() {
        assert_eq!(BatchStatus::Pending.to_string(), "PENDING");
        assert_eq!("PROCESSING".parse::<BatchStatus>().unwrap(), BatchStatus::Processing);
        assert!("pending".parse::<BatchStatus>().is_err());
    }

    #[test]
    fn result_payload_carries_terminal_fields() {
        let request = BatchRequest {
            request_id: 7,
            batch_job_id: "job-1".into(),
            status: BatchStatus::Completed,
            inspection_status: Some(InspectionStatus::Failed),
            goods_code: "G001".into(),
            goods_name: "name".into(),
            mobile_goods_name: "m-name".into(),
            sale_price: 1000,
            buy_price: 800,
            goods_info: String::new(),
            image_html: String::new(),
            representative_file: String::new(),
            lgroup: None,
            lgroup_name: None,
            mgroup: None,
            mgroup_name: None,
            sgroup: None,
            sgroup_name: None,
            dgroup: None,
            dgroup_name: None,
            forbidden_word: Some("담배".into()),
            error_message: Some("상품명에서 발견".into()),
            retries: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let payload = BatchResultPayload::from(&request);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["requestId"], 7);
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["inspectionStatus"], "FAILED");
        assert_eq!(json["forbiddenWord"], "담배");
    }
}
