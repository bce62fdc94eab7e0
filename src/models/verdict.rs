use serde::Serialize;

/// The inspector's decision for one request attempt. Folded into the
/// request row on finalization, never persisted on its own.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionVerdict {
    pub approved: bool,
    pub forbidden_word: Option<String>,
    pub reason: String,
    pub inspector_id: String,
}

impl InspectionVerdict {
    pub fn approve(inspector_id: impl Into<String>) -> Self {
        Self {
            approved: true,
            forbidden_word: None,
            reason: "승인되었습니다.".to_string(),
            inspector_id: inspector_id.into(),
        }
    }

    pub fn reject(
        forbidden_word: Option<String>,
        reason: impl Into<String>,
        inspector_id: impl Into<String>,
    ) -> Self {
        Self {
            approved: false,
            forbidden_word,
            reason: reason.into(),
            inspector_id: inspector_id.into(),
        }
    }
}
