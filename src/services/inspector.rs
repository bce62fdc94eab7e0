use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::models::goods::Goods;
use crate::models::verdict::InspectionVerdict;
use crate::services::images::ImagePart;

/// Provider calls are bounded; a hung inspection surfaces as the retry path.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability interface over interchangeable moderation providers.
///
/// `inspect` returns an error only for transport/protocol failures; every
/// well-formed (or malformed-but-present) provider reply becomes a verdict.
pub trait Inspector: Send + Sync {
    fn id(&self) -> &str;

    fn inspect(
        &self,
        goods: &Goods,
        images: &[ImagePart],
        forbidden_terms: &str,
    ) -> impl Future<Output = Result<InspectionVerdict, InspectError>> + Send;
}

/// Client for the Gemini generateContent API.
pub struct GeminiInspector {
    http: Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GeminiInspector {
    pub fn new(api_url: String, api_key: String, model: String) -> Self {
        Self {
            http: Client::new(),
            api_url,
            api_key,
            model,
        }
    }

    async fn call(&self, request: &GeminiRequest) -> Result<GeminiResponse, InspectError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.api_url, self.model, self.api_key
        );

        let response = self
            .http
            .post(&url)
            .timeout(CALL_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(InspectError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InspectError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        response.json().await.map_err(InspectError::Http)
    }
}

impl Inspector for GeminiInspector {
    fn id(&self) -> &str {
        &self.model
    }

    async fn inspect(
        &self,
        goods: &Goods,
        images: &[ImagePart],
        forbidden_terms: &str,
    ) -> Result<InspectionVerdict, InspectError> {
        let mut parts = vec![Part {
            text: Some(build_prompt(goods, forbidden_terms)),
            inline_data: None,
        }];
        parts.extend(image_parts(images));

        let request = GeminiRequest {
            contents: vec![Content { parts }],
        };

        let response = self.call(&request).await?;
        Ok(parse_response(&response, self.id()))
    }
}

/// Convert prepared images into provider parts. Zero-byte payloads are
/// dropped and ambiguous content types coerced to a safe image default —
/// the provider rejects both.
fn image_parts(images: &[ImagePart]) -> Vec<Part> {
    let mut parts = Vec::new();
    for image in images {
        if image.content.is_empty() {
            tracing::warn!(file = %image.file_name, "Empty image payload dropped");
            continue;
        }

        let mime_type = coerce_mime(&image.mime_type);
        parts.push(Part {
            text: Some(format!("--- 첨부 이미지 파일명: {} ---", image.file_name)),
            inline_data: None,
        });
        parts.push(Part {
            text: None,
            inline_data: Some(InlineData {
                mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(&image.content),
            }),
        });
    }
    parts
}

fn coerce_mime(mime_type: &str) -> String {
    let lower = mime_type.to_lowercase();
    if lower.is_empty() || lower == "application/octet-stream" || lower == "unknown" {
        "image/jpeg".to_string()
    } else {
        lower
    }
}

/// Build the moderation prompt. Deterministic for identical inputs: the
/// listing's display names, the tag-stripped free-text field, the full term
/// list, and the reply-grammar instructions.
pub(crate) fn build_prompt(goods: &Goods, forbidden_terms: &str) -> String {
    let info = strip_html(&goods.goods_info);
    let info_line = if info.trim().is_empty() {
        String::new()
    } else {
        format!("\n- **기타 공시사항:** {}", info.trim())
    };

    format!(
        "너는 쇼핑몰 상품 정보에서 금칙어를 탐지하는 AI다. 너의 유일한 임무는 '검수 대상 텍스트'에 '금칙어 목록'의 단어가 포함되어 있는지 확인하고, '출력 규칙'에 따라 최종 결론만 내리는 것이다.\n\
         \n\
         ### 검수 규칙\n\
         - **금칙어 포함 여부 검수:** '검수 대상 텍스트' 또는 첨부된 이미지 속 텍스트에 '금칙어 목록'에 있는 단어가 하나라도 포함되어 있는가?\n\
         \n\
         ### 검수 대상 텍스트\n\
         - **등록 상품명:** {goods_name}\n\
         - **모바일용 상품명:** {mobile_goods_name}{info_line}\n\
         \n\
         ### 금칙어 목록\n\
         - [{forbidden_terms}]\n\
         \n\
         ### 출력 규칙\n\
         - 절대 검수 과정이나 부가적인 설명을 하지 말 것.\n\
         - **금칙어 미포함 시:** 오직 '승인' 한 단어만 출력한다.\n\
         - **금칙어 포함 시:** `반려:[발견된 금칙어]:[금칙어가 발견된 위치를 밝힌 한 문장의 사유]` 형식으로만 출력한다.\n\
         - **[실패 출력 예시]**\n\
         - 반려:담배:등록 상품명 '최고급 명품 담배'에서 금칙어 '담배'가 발견되었습니다.\n\
         \n\
         검수를 시작하고 최종 결과만 답변하라.",
        goods_name = goods.goods_name,
        mobile_goods_name = goods.mobile_goods_name,
        info_line = info_line,
        forbidden_terms = forbidden_terms,
    )
}

/// Drop markup from the listing's free-text field, keeping the text nodes.
pub(crate) fn strip_html(input: &str) -> String {
    if input.trim().is_empty() {
        return String::new();
    }
    let fragment = scraper::Html::parse_fragment(input);
    fragment
        .root_element()
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_response(response: &GeminiResponse, inspector_id: &str) -> InspectionVerdict {
    // A provider-level block of the request itself is a rejection carrying
    // the block reason, not a transport failure.
    if let Some(feedback) = &response.prompt_feedback {
        if let Some(block_reason) = &feedback.block_reason {
            return InspectionVerdict::reject(
                None,
                format!("AI 검수 요청이 차단되었습니다: {block_reason}"),
                inspector_id,
            );
        }
    }

    let text = response
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .and_then(|content| content.parts.first())
        .map(|part| part.text.as_str())
        .unwrap_or("");

    if text.trim().is_empty() {
        return InspectionVerdict::reject(
            None,
            "AI 검수 서버로부터 유효한 응답을 받지 못했습니다.",
            inspector_id,
        );
    }

    parse_reply(text, inspector_id)
}

/// Parse the constrained reply grammar: `승인` alone, or
/// `반려:<금칙어>:<사유>`. Every shape outside the grammar rejects —
/// ambiguous provider output never approves a listing.
pub(crate) fn parse_reply(text: &str, inspector_id: &str) -> InspectionVerdict {
    let reply = text.trim();

    if reply.starts_with("승인") {
        return InspectionVerdict::approve(inspector_id);
    }

    if let Some(rest) = reply.strip_prefix("반려") {
        let parts: Vec<&str> = reply.splitn(3, ':').collect();
        if parts.len() == 3 {
            return InspectionVerdict::reject(
                Some(parts[1].trim().to_string()),
                parts[2].trim().to_string(),
                inspector_id,
            );
        }

        // Rejecting but off-grammar: keep the rejection, salvage a reason.
        tracing::warn!(reply, "Reject reply did not match the 3-part grammar");
        let salvaged = rest.trim_start_matches(':').trim();
        let reason = if salvaged.is_empty() {
            "AI가 등록을 거부했습니다.".to_string()
        } else {
            salvaged.to_string()
        };
        return InspectionVerdict::reject(None, reason, inspector_id);
    }

    InspectionVerdict::reject(
        None,
        format!("AI가 판독 불가 응답을 반환했습니다: {reply}"),
        inspector_id,
    )
}

#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}")]
    Provider { status: u16, body: String },
}
