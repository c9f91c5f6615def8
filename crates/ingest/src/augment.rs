use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use trimatch_core::{DocType, StructuredRecord};

#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("Request failed: {0}")]
    Connection(String),
    #[error("Service returned HTTP {0}")]
    Api(String),
    #[error("Malformed response: {0}")]
    Parse(String),
    #[error("Response document type {got}, expected {expected}")]
    WrongDocType { expected: DocType, got: DocType },
}

/// Abstraction over the extraction-augmentation collaborator.
/// Implementations take the same (text, doc type) input as the deterministic
/// extractor and must return a record in the canonical schema. Callers treat
/// every error as "collaborator unavailable" and keep the deterministic
/// partial record — an unreliable service must never sink a document.
#[async_trait]
pub trait AugmentBackend: Send + Sync {
    async fn augment(
        &self,
        text: &str,
        doc_type: DocType,
    ) -> Result<StructuredRecord, AugmentError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Chat-completions endpoint of an OpenAI-compatible service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,
    /// Hard per-call ceiling — an augmentation request is never left pending.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

// ── HTTP backend ─────────────────────────────────────────────────────────────

/// Calls an OpenAI-style chat-completions API in JSON mode and parses the
/// reply as a canonical structured record.
pub struct HttpAugmenter {
    config: AugmentConfig,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: ResponseFormat<'a>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

impl HttpAugmenter {
    pub fn new(config: AugmentConfig) -> Result<Self, AugmentError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AugmentError::Connection(e.to_string()))?;
        Ok(Self { config, client })
    }

    fn prompt(text: &str, doc_type: DocType) -> String {
        let fields = match doc_type {
            DocType::PurchaseOrder => {
                "\"number\", \"vendor\", \"country\", \"currency\", \"date\" (YYYY-MM-DD), \
                 \"total\", \"items\" (array of {\"sku\", \"description\", \"qty\", \"unit_price\"})"
            }
            DocType::Invoice => {
                "\"number\", \"po_number\", \"vendor\", \"country\", \"currency\", \"date\" \
                 (YYYY-MM-DD), \"total\", \"items\" (array of {\"sku\", \"description\", \
                 \"qty\", \"unit_price\"})"
            }
            _ => "\"number\", \"po_number\", \"vendor\", \"country\", \"date\" (YYYY-MM-DD), \
                  \"items\" (array of {\"sku\", \"qty\"})",
        };
        format!(
            "Extract structured data from this {doc_type} document and return valid JSON.\n\n\
             Required shape: {{\"type\": \"{doc_type}\", {fields}}}. Use null for fields you \
             cannot read; amounts are plain decimal strings.\n\n\
             Document text:\n{text}\n\nReturn only valid JSON matching the expected structure."
        )
    }
}

#[async_trait]
impl AugmentBackend for HttpAugmenter {
    async fn augment(
        &self,
        text: &str,
        doc_type: DocType,
    ) -> Result<StructuredRecord, AugmentError> {
        let prompt = Self::prompt(text, doc_type);
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are a document data extraction expert. Return only valid JSON.",
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            response_format: ResponseFormat { kind: "json_object" },
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AugmentError::Connection(e.to_string()))?;
        if !response.status().is_success() {
            return Err(AugmentError::Api(response.status().to_string()));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AugmentError::Parse(e.to_string()))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| AugmentError::Parse("empty choices".to_string()))?;

        let record: StructuredRecord =
            serde_json::from_str(content).map_err(|e| AugmentError::Parse(e.to_string()))?;
        record
            .validate()
            .map_err(|e| AugmentError::Parse(e.to_string()))?;
        if record.doc_type() != doc_type {
            return Err(AugmentError::WrongDocType {
                expected: doc_type,
                got: record.doc_type(),
            });
        }
        Ok(record)
    }
}

// ── Mock backend (always available, used for tests) ──────────────────────────

/// Returns a preset record or a canned failure — lets the pipeline be tested
/// without any network service.
pub struct MockAugmenter {
    record: Option<StructuredRecord>,
}

impl MockAugmenter {
    pub fn new(record: StructuredRecord) -> Self {
        Self {
            record: Some(record),
        }
    }

    pub fn unavailable() -> Self {
        Self { record: None }
    }
}

#[async_trait]
impl AugmentBackend for MockAugmenter {
    async fn augment(
        &self,
        _text: &str,
        doc_type: DocType,
    ) -> Result<StructuredRecord, AugmentError> {
        match &self.record {
            Some(record) if record.doc_type() == doc_type => Ok(record.clone()),
            Some(record) => Err(AugmentError::WrongDocType {
                expected: doc_type,
                got: record.doc_type(),
            }),
            None => Err(AugmentError::Connection("mock offline".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trimatch_core::Invoice;

    fn invoice_record() -> StructuredRecord {
        StructuredRecord::Invoice(Invoice {
            number: Some("INV-1000-1".into()),
            po_number: Some("PO-1000".into()),
            currency: Some("USD".into()),
            total: Some("99.00".parse().unwrap()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn mock_returns_preset_record() {
        let augmenter = MockAugmenter::new(invoice_record());
        let record = augmenter.augment("scan noise", DocType::Invoice).await.unwrap();
        assert_eq!(record, invoice_record());
    }

    #[tokio::test]
    async fn mock_rejects_wrong_kind() {
        let augmenter = MockAugmenter::new(invoice_record());
        let err = augmenter.augment("text", DocType::PurchaseOrder).await.unwrap_err();
        assert!(matches!(err, AugmentError::WrongDocType { .. }));
    }

    #[tokio::test]
    async fn unavailable_mock_errors() {
        let augmenter = MockAugmenter::unavailable();
        assert!(augmenter.augment("text", DocType::Invoice).await.is_err());
    }

    #[test]
    fn chat_response_schema_parses() {
        let body = r#"{"choices":[{"message":{"content":"{\"type\":\"INVOICE\",\"number\":\"INV-1\"}"}}]}"#;
        let chat: ChatResponse = serde_json::from_str(body).unwrap();
        let record: StructuredRecord =
            serde_json::from_str(&chat.choices[0].message.content).unwrap();
        assert_eq!(record.doc_type(), DocType::Invoice);
    }
}
