//! Answer composition from retrieved chunks.
//!
//! [`AnswerComposer::compose`] turns a question plus ranked
//! [`RetrievalResult`]s into an [`Answer`]:
//!
//! 1. No results → fixed "insufficient information" answer, confidence 0.
//! 2. Otherwise build a context block (`Source N: <preview>` per result).
//! 3. Hand question and context to the configured [`AnswerSynthesizer`].
//!    If it fails, the [`TemplateSynthesizer`] produces the text instead.
//! 4. Attach [`Source`]s and a confidence derived from the scores.
//!
//! The answer language is an input. Detection belongs to the caller.

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

use crate::config::AnswerConfig;
use crate::models::{Answer, Language, RetrievalResult, Source};

const UNKNOWN_DOCUMENT: &str = "Unknown Document";

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("chat API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("chat request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid chat response: {0}")]
    InvalidResponse(String),
}

/// Inputs handed to a synthesizer.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub question: &'a str,
    pub context: &'a str,
    pub language: Language,
}

/// Produces answer text from a question and a context block.
#[async_trait]
pub trait AnswerSynthesizer: Send + Sync {
    /// Variant name (`"template"`, `"openai"`).
    fn name(&self) -> &str;
    /// Recorded as `Answer::composed_by`.
    fn model_name(&self) -> &str;

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String, SynthesisError>;

    fn describe(&self) -> String {
        if self.name() == self.model_name() {
            self.name().to_string()
        } else {
            format!("{}/{}", self.name(), self.model_name())
        }
    }
}

// ============ Template ============

/// Fixed bilingual answer templates. Never fails.
#[derive(Debug, Clone)]
pub struct TemplateSynthesizer {
    contact: String,
}

impl TemplateSynthesizer {
    pub fn new(contact: impl Into<String>) -> Self {
        Self {
            contact: contact.into(),
        }
    }

    pub fn render(&self, question: &str, context: &str, language: Language) -> String {
        let mut text = match language {
            Language::En => format!(
                "Based on the information available in our knowledge base, here's the answer to your question:\n\n\
                 Question: {}\n\n\
                 Answer:\n{}\n\n\
                 Note: This answer is based on the information available in our knowledge base. \
                 Please verify the information before making any important decisions.",
                question, context
            ),
            Language::Ar => format!(
                "بناءً على المعلومات المتاحة في قاعدة المعرفة، إليك الإجابة على سؤالك:\n\n\
                 السؤال: {}\n\n\
                 الإجابة:\n{}\n\n\
                 ملاحظة: هذه إجابة مبنية على المعلومات المتاحة في قاعدة المعرفة. \
                 يرجى التأكد من صحة المعلومات قبل اتخاذ أي قرارات مهمة.",
                question, context
            ),
        };

        if !self.contact.trim().is_empty() {
            let line = match language {
                Language::En => format!(
                    "If you need more detailed information, please contact our sales team at {}",
                    self.contact
                ),
                Language::Ar => format!(
                    "إذا كنت بحاجة إلى معلومات أكثر تفصيلاً، يرجى التواصل مع فريق المبيعات على {}",
                    self.contact
                ),
            };
            text.push_str("\n\n");
            text.push_str(&line);
        }
        text
    }
}

#[async_trait]
impl AnswerSynthesizer for TemplateSynthesizer {
    fn name(&self) -> &str {
        "template"
    }
    fn model_name(&self) -> &str {
        "template"
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String, SynthesisError> {
        Ok(self.render(request.question, request.context, request.language))
    }
}

// ============ OpenAI chat ============

/// Answer synthesis via `POST {base_url}/chat/completions`.
pub struct OpenAIChatSynthesizer {
    model: String,
    temperature: f32,
    max_tokens: u32,
    organization: String,
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIChatSynthesizer {
    /// Create a synthesizer reading the API key from `OPENAI_API_KEY`.
    pub fn new(config: &AnswerConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &AnswerConfig, api_key: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            organization: config.organization.clone(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            client,
        })
    }

    fn system_prompt(&self, language: Language) -> String {
        match language {
            Language::En => format!(
                "You are an intelligent assistant specialized in {} products.\n\
                 Your task is to help customers by answering their questions about our products and services.\n\
                 Always respond in English and be helpful and accurate.",
                self.organization
            ),
            Language::Ar => format!(
                "أنت مساعد ذكي متخصص في منتجات شركة {}.\n\
                 مهمتك هي مساعدة العملاء من خلال الإجابة على أسئلتهم حول منتجاتنا وخدماتنا.\n\
                 أجب دائماً باللغة العربية وكن مفيداً ودقيقاً.",
                self.organization
            ),
        }
    }
}

fn user_prompt(request: &SynthesisRequest<'_>) -> String {
    match request.language {
        Language::En => format!(
            "Question: {}\n\n\
             Available Information:\n{}\n\n\
             Please provide a helpful and detailed answer in English. \
             If the information is insufficient, please state that clearly.",
            request.question, request.context
        ),
        Language::Ar => format!(
            "السؤال: {}\n\n\
             المعلومات المتاحة:\n{}\n\n\
             يرجى تقديم إجابة مفيدة ومفصلة باللغة العربية. \
             إذا كانت المعلومات غير كافية، يرجى توضيح ذلك.",
            request.question, request.context
        ),
    }
}

#[async_trait]
impl AnswerSynthesizer for OpenAIChatSynthesizer {
    fn name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<String, SynthesisError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt(request.language)},
                {"role": "user", "content": user_prompt(request)},
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, SynthesisError> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| SynthesisError::InvalidResponse("missing choices[0].message.content".into()))?;

    let content = content.trim();
    if content.is_empty() {
        return Err(SynthesisError::InvalidResponse("empty completion".into()));
    }
    Ok(content.to_string())
}

// ============ Composer ============

pub struct AnswerComposer {
    synthesizer: Box<dyn AnswerSynthesizer>,
    fallback: TemplateSynthesizer,
    preview_chars: usize,
}

impl AnswerComposer {
    pub fn new(
        synthesizer: Box<dyn AnswerSynthesizer>,
        fallback: TemplateSynthesizer,
        preview_chars: usize,
    ) -> Self {
        Self {
            synthesizer,
            fallback,
            preview_chars,
        }
    }

    pub fn synthesizer(&self) -> &dyn AnswerSynthesizer {
        self.synthesizer.as_ref()
    }

    pub async fn compose(
        &self,
        question: &str,
        results: &[RetrievalResult],
        language: Language,
    ) -> Answer {
        if results.is_empty() {
            return insufficient_information(question, language);
        }

        let context = build_context(results, self.preview_chars);
        let request = SynthesisRequest {
            question,
            context: &context,
            language,
        };

        let (text, composed_by) = match self.synthesizer.synthesize(&request).await {
            Ok(text) => (text, self.synthesizer.model_name().to_string()),
            Err(e) => {
                tracing::warn!(
                    synthesizer = self.synthesizer.name(),
                    error = %e,
                    "answer synthesis failed, using template"
                );
                (
                    self.fallback.render(question, &context, language),
                    self.fallback.model_name().to_string(),
                )
            }
        };

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        Answer {
            question: question.to_string(),
            answer: text,
            sources: format_sources(results),
            confidence: confidence(&scores),
            language,
            composed_by,
            timestamp: Utc::now(),
        }
    }
}

/// Answer returned when nothing relevant was retrieved.
pub fn insufficient_information(question: &str, language: Language) -> Answer {
    let text = match language {
        Language::En => format!(
            "Sorry, I couldn't find sufficient information to answer your question: \"{}\"\n\n\
             Please try rephrasing your question or contact our sales team for assistance.",
            question
        ),
        Language::Ar => format!(
            "عذراً، لم أتمكن من العثور على معلومات كافية للإجابة على سؤالك: \"{}\"\n\n\
             يرجى المحاولة مرة أخرى بصياغة مختلفة أو التواصل مع فريق المبيعات للحصول على المساعدة.",
            question
        ),
    };
    empty_answer(question, text, language, "template")
}

/// Answer returned when the query path itself failed.
pub fn error_answer(question: &str, language: Language) -> Answer {
    let text = match language {
        Language::En => "Sorry, there was an error processing your question. \
                         Please try again or contact our support team."
            .to_string(),
        Language::Ar => "عذراً، حدث خطأ في معالجة سؤالك. \
                         يرجى المحاولة مرة أخرى أو التواصل مع فريق الدعم."
            .to_string(),
    };
    empty_answer(question, text, language, "fallback")
}

fn empty_answer(question: &str, text: String, language: Language, composed_by: &str) -> Answer {
    Answer {
        question: question.to_string(),
        answer: text,
        sources: Vec::new(),
        confidence: 0.0,
        language,
        composed_by: composed_by.to_string(),
        timestamp: Utc::now(),
    }
}

/// `Source N: <text>` blocks separated by blank lines. Each chunk is cut
/// to `preview_chars` characters, with `...` marking a cut.
pub fn build_context(results: &[RetrievalResult], preview_chars: usize) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("Source {}: {}", i + 1, preview(&r.chunk.text, preview_chars)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Mean score, boosted ×1.1 for two results and ×1.2 for three or more,
/// clamped to `[0, 1]` and rounded to two decimals.
pub fn confidence(scores: &[f32]) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let avg = scores.iter().map(|s| *s as f64).sum::<f64>() / scores.len() as f64;
    let boost = match scores.len() {
        1 => 1.0,
        2 => 1.1,
        _ => 1.2,
    };
    let value = (avg * boost).clamp(0.0, 1.0);
    (value * 100.0).round() / 100.0
}

pub fn format_sources(results: &[RetrievalResult]) -> Vec<Source> {
    results
        .iter()
        .map(|r| Source {
            title: if r.chunk.filename.trim().is_empty() {
                UNKNOWN_DOCUMENT.to_string()
            } else {
                r.chunk.filename.clone()
            },
            score: r.score,
            format: r.chunk.format.tag().to_string(),
            language: r.chunk.language,
        })
        .collect()
}

/// Build the composer for the configured answer provider.
///
/// | Config Value | Synthesizer |
/// |-------------|-------------|
/// | `"template"` | [`TemplateSynthesizer`] |
/// | `"openai"` | [`OpenAIChatSynthesizer`] |
pub fn create_composer(config: &AnswerConfig, preview_chars: usize) -> anyhow::Result<AnswerComposer> {
    let template = TemplateSynthesizer::new(config.contact.clone());
    let synthesizer: Box<dyn AnswerSynthesizer> = match config.provider.as_str() {
        "template" => Box::new(template.clone()),
        "openai" => Box::new(OpenAIChatSynthesizer::new(config)?),
        other => bail!("Unknown answer provider: {}", other),
    };
    Ok(AnswerComposer::new(synthesizer, template, preview_chars))
}
