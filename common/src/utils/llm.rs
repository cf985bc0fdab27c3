use std::sync::Arc;

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use crate::{error::AppError, utils::config::AppConfig};

/// Chat completion client with an OpenAI backend and, for tests, a scripted
/// backend keyed on prompt content. Mirrors the backend-enum shape of
/// [`crate::utils::embedding::EmbeddingProvider`].
#[derive(Clone)]
pub struct LlmClient {
    inner: LlmInner,
}

#[derive(Clone)]
enum LlmInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    #[cfg(any(test, feature = "test-utils"))]
    Scripted { rules: Arc<Vec<ScriptRule>> },
}

/// A scripted response triggered when the prompt contains `trigger`.
/// Rules are checked in order; the first match wins.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Clone, Debug)]
pub struct ScriptRule {
    pub trigger: String,
    pub response: ScriptedResponse,
}

#[cfg(any(test, feature = "test-utils"))]
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    Text(String),
    TransientFailure,
}

impl LlmClient {
    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        Self {
            inner: LlmInner::OpenAI { client, model },
        }
    }

    pub fn from_config(
        config: &AppConfig,
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        Self::new_openai(client, config.query_model.clone())
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn scripted(rules: Vec<ScriptRule>) -> Self {
        Self {
            inner: LlmInner::Scripted {
                rules: Arc::new(rules),
            },
        }
    }

    /// Plain text completion.
    pub async fn complete(
        &self,
        system_prompt: &str,
        user_message: &str,
        temperature: Option<f32>,
    ) -> Result<String, AppError> {
        match &self.inner {
            LlmInner::OpenAI { client, model } => {
                let request =
                    build_chat_request(model, system_prompt, user_message, temperature, None)?;
                let response = client
                    .chat()
                    .create(request)
                    .await
                    .map_err(|err| AppError::Transient(err.to_string()))?;
                response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .ok_or(AppError::LLMParsing(
                        "No content found in LLM response".into(),
                    ))
            }
            #[cfg(any(test, feature = "test-utils"))]
            LlmInner::Scripted { rules } => scripted_response(rules, system_prompt, user_message),
        }
    }

    /// Completion constrained to a strict JSON schema; returns the raw JSON
    /// content for the caller to deserialize.
    pub async fn complete_json(
        &self,
        system_prompt: &str,
        user_message: &str,
        schema_name: &str,
        schema: Value,
    ) -> Result<String, AppError> {
        match &self.inner {
            LlmInner::OpenAI { client, model } => {
                let request = build_chat_request(
                    model,
                    system_prompt,
                    user_message,
                    None,
                    Some((schema_name, schema)),
                )?;
                let response = client
                    .chat()
                    .create(request)
                    .await
                    .map_err(|err| AppError::Transient(err.to_string()))?;
                response
                    .choices
                    .first()
                    .and_then(|choice| choice.message.content.clone())
                    .ok_or(AppError::LLMParsing(
                        "No content found in LLM response".into(),
                    ))
            }
            #[cfg(any(test, feature = "test-utils"))]
            LlmInner::Scripted { rules } => scripted_response(rules, system_prompt, user_message),
        }
    }
}

fn build_chat_request(
    model: &str,
    system_prompt: &str,
    user_message: &str,
    temperature: Option<f32>,
    json_schema: Option<(&str, Value)>,
) -> Result<CreateChatCompletionRequest, AppError> {
    let mut builder = CreateChatCompletionRequestArgs::default();
    builder.model(model).messages([
        ChatCompletionRequestSystemMessage::from(system_prompt.to_owned()).into(),
        ChatCompletionRequestUserMessage::from(user_message.to_owned()).into(),
    ]);
    if let Some(temperature) = temperature {
        builder.temperature(temperature);
    }
    if let Some((name, schema)) = json_schema {
        builder.response_format(ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: None,
                name: name.to_owned(),
                schema: Some(schema),
                strict: Some(true),
            },
        });
    }
    builder.build().map_err(AppError::from)
}

#[cfg(any(test, feature = "test-utils"))]
fn scripted_response(
    rules: &[ScriptRule],
    system_prompt: &str,
    user_message: &str,
) -> Result<String, AppError> {
    let haystack = format!("{system_prompt}\n{user_message}");
    for rule in rules {
        if haystack.contains(&rule.trigger) {
            return match &rule.response {
                ScriptedResponse::Text(text) => Ok(text.clone()),
                ScriptedResponse::TransientFailure => {
                    Err(AppError::Transient("scripted failure".into()))
                }
            };
        }
    }
    Err(AppError::LLMParsing(format!(
        "no scripted rule matched prompt: {}",
        haystack.chars().take(120).collect::<String>()
    )))
}

/// Deserialize JSON content from an LLM response into a typed struct.
pub fn parse_llm_content<T: DeserializeOwned>(content: &str) -> Result<T, AppError> {
    serde_json::from_str::<T>(content)
        .map_err(|e| AppError::LLMParsing(format!("Failed to parse LLM response: {e}")))
}

/// Run an LLM-backed operation with at most one jittered retry.
pub async fn with_single_retry<T, F, Fut>(operation: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, AppError>>,
{
    let retry_strategy = ExponentialBackoff::from_millis(100).map(jitter).take(1);
    Retry::spawn(retry_strategy, operation).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_rules_match_in_order() {
        let client = LlmClient::scripted(vec![
            ScriptRule {
                trigger: "critique".into(),
                response: ScriptedResponse::Text("No issues found".into()),
            },
            ScriptRule {
                trigger: "".into(),
                response: ScriptedResponse::Text("fallback".into()),
            },
        ]);

        let critique = client
            .complete("You critique answers", "critique this", None)
            .await
            .expect("scripted completion failed");
        assert_eq!(critique, "No issues found");

        let other = client
            .complete("general", "anything else", None)
            .await
            .expect("scripted completion failed");
        assert_eq!(other, "fallback");
    }

    #[tokio::test]
    async fn scripted_failure_is_transient() {
        let client = LlmClient::scripted(vec![ScriptRule {
            trigger: "".into(),
            response: ScriptedResponse::TransientFailure,
        }]);

        let err = client
            .complete("sys", "user", None)
            .await
            .expect_err("expected scripted failure");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn retry_recovers_after_one_transient_failure() {
        let mut attempts = 0u32;
        let result = with_single_retry(|| {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt == 1 {
                    Err(AppError::Transient("first attempt fails".into()))
                } else {
                    Ok("recovered")
                }
            }
        })
        .await
        .expect("retry should recover");

        assert_eq!(result, "recovered");
        assert_eq!(attempts, 2);
    }
}
