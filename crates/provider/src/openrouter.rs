//! OpenRouter / OpenAI-compatible chat completions

use crate::*;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, trace};

/// Chat-completions client for OpenRouter or any OpenAI-compatible endpoint
pub struct OpenRouterProvider {
    client: Client,
    api_key: String,
    api_base: String,
    default_model: String,
    is_openrouter: bool,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: impl Into<String>,
        api_base: Option<String>,
        default_model: Option<String>,
    ) -> Self {
        let api_key = api_key.into();
        let is_openrouter = api_key.starts_with("sk-or-")
            || api_base
                .as_ref()
                .map(|b| b.contains("openrouter"))
                .unwrap_or(false);

        let api_base = api_base.unwrap_or_else(|| {
            if is_openrouter {
                "https://openrouter.ai/api/v1".to_string()
            } else {
                "https://api.openai.com/v1".to_string()
            }
        });

        let default_model = default_model.unwrap_or_else(|| {
            if is_openrouter {
                "anthropic/claude-sonnet-4".to_string()
            } else {
                "gpt-4o".to_string()
            }
        });

        Self {
            client: Client::new(),
            api_key,
            api_base,
            default_model,
            is_openrouter,
        }
    }

    pub fn is_openrouter(&self) -> bool {
        self.is_openrouter
    }

    fn build_request(&self, params: &ChatParams) -> serde_json::Value {
        let model = if params.model.is_empty() {
            self.default_model.clone()
        } else {
            params.model.clone()
        };

        let messages: Vec<serde_json::Value> = params
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": &m.content }))
            .collect();

        json!({
            "model": model,
            "messages": messages,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        })
    }

    fn parse_response(&self, json: serde_json::Value) -> Result<ChatResponse> {
        let choice = json["choices"]
            .get(0)
            .ok_or(ProviderError::InvalidResponse)?;
        let content = choice["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = choice["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();

        let usage = if let Some(usage) = json["usage"].as_object() {
            let field = |name: &str| usage.get(name).and_then(|v| v.as_u64()).unwrap_or(0) as u32;
            Usage {
                prompt_tokens: field("prompt_tokens"),
                completion_tokens: field("completion_tokens"),
                total_tokens: field("total_tokens"),
            }
        } else {
            Usage::default()
        };

        Ok(ChatResponse {
            content,
            finish_reason,
            usage,
        })
    }
}

/// Map a failed HTTP exchange to an error. The body may be JSON with an
/// `error.message`, or anything else a gateway sends back.
fn error_for_status(status: u16, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| json["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            let excerpt: String = body.trim().chars().take(200).collect();
            if excerpt.is_empty() {
                "UNKNOWN ERROR".to_string()
            } else {
                excerpt
            }
        });

    match status {
        429 => ProviderError::RateLimited,
        500..=599 => ProviderError::Server { status, message },
        _ => ProviderError::Api(message),
    }
}

#[async_trait::async_trait]
impl Provider for OpenRouterProvider {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NoApiKey);
        }
        trace!("◆ CALLING MODEL AT {}", self.api_base);

        let url = format!("{}/chat/completions", self.api_base);
        let body = self.build_request(&params);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(error_for_status(status.as_u16(), &text));
        }

        let json: serde_json::Value = serde_json::from_str(&text)?;
        let response = self.parse_response(json)?;
        debug!(
            "◆ MODEL REPLIED: {} CHARS, {} TOKENS",
            response.content.len(),
            response.usage.total_tokens
        );
        Ok(response)
    }

    fn default_model(&self) -> String {
        self.default_model.clone()
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_with_openrouter_key() {
        let provider = OpenRouterProvider::new("sk-or-test123", None, None);
        assert!(provider.is_openrouter());
        assert_eq!(provider.api_base, "https://openrouter.ai/api/v1");
        assert_eq!(provider.default_model, "anthropic/claude-sonnet-4");
    }

    #[test]
    fn test_new_with_openai_key() {
        let provider = OpenRouterProvider::new("sk-openai123", None, None);
        assert!(!provider.is_openrouter());
        assert_eq!(provider.api_base, "https://api.openai.com/v1");
        assert_eq!(provider.default_model, "gpt-4o");
    }

    #[test]
    fn test_new_with_custom_openrouter_base() {
        let provider = OpenRouterProvider::new(
            "some-key",
            Some("https://custom.openrouter.ai/api".to_string()),
            Some("custom/model".to_string()),
        );
        assert!(provider.is_openrouter());
        assert_eq!(provider.api_base, "https://custom.openrouter.ai/api");
        assert_eq!(provider.default_model(), "custom/model");
    }

    #[test]
    fn test_is_configured() {
        assert!(OpenRouterProvider::new("key", None, None).is_configured());
        assert!(!OpenRouterProvider::new("", None, None).is_configured());
    }

    #[test]
    fn test_build_request_roles_and_content() {
        let provider = OpenRouterProvider::new("sk-test", None, None);
        let params = ChatParams {
            model: "gpt-4o".to_string(),
            messages: vec![
                Message::system("You are helpful"),
                Message::user("Hello"),
                Message::assistant("Hi there"),
            ],
            max_tokens: 1024,
            temperature: 0.5,
        };

        let request = provider.build_request(&params);
        assert_eq!(request["model"], "gpt-4o");
        assert_eq!(request["max_tokens"], 1024);
        assert_eq!(request["temperature"], 0.5);

        let messages = request["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "Hello");
        assert_eq!(messages[2]["role"], "assistant");
    }

    #[test]
    fn test_build_request_falls_back_to_default_model() {
        let provider = OpenRouterProvider::new("sk-or-x", None, Some("m/default".to_string()));
        let request = provider.build_request(&ChatParams::default());
        assert_eq!(request["model"], "m/default");
    }

    #[test]
    fn test_parse_response() {
        let provider = OpenRouterProvider::new("sk-test", None, None);
        let body = json!({
            "choices": [{
                "message": { "role": "assistant", "content": "<list_notes><directory></directory></list_notes>" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
        });

        let response = provider.parse_response(body).unwrap();
        assert!(response.content.starts_with("<list_notes>"));
        assert_eq!(response.finish_reason, "stop");
        assert_eq!(response.usage.total_tokens, 20);
    }

    #[test]
    fn test_parse_response_without_choices() {
        let provider = OpenRouterProvider::new("sk-test", None, None);
        let result = provider.parse_response(json!({ "choices": [] }));
        assert!(matches!(result, Err(ProviderError::InvalidResponse)));
    }

    #[test]
    fn test_parse_response_null_content() {
        let provider = OpenRouterProvider::new("sk-test", None, None);
        let body = json!({ "choices": [{ "message": { "content": null } }] });
        let response = provider.parse_response(body).unwrap();
        assert!(response.content.is_empty());
        assert_eq!(response.usage, Usage::default());
    }

    #[test]
    fn test_error_for_status_reads_json_message() {
        let error = error_for_status(400, r#"{"error":{"message":"bad model"}}"#);
        assert!(matches!(error, ProviderError::Api(ref m) if m == "bad model"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_for_status_tolerates_html() {
        let error = error_for_status(502, "<html>Bad Gateway</html>");
        assert!(matches!(
            error,
            ProviderError::Server { status: 502, ref message } if message == "<html>Bad Gateway</html>"
        ));
        assert!(error.is_retryable());
        assert!(error_for_status(429, "").is_retryable());
        assert!(matches!(error_for_status(503, ""), ProviderError::Server { ref message, .. } if message == "UNKNOWN ERROR"));
    }

    #[tokio::test]
    async fn test_chat_without_key_is_rejected() {
        let provider = OpenRouterProvider::new("", None, None);
        let result = provider.chat(ChatParams::default()).await;
        assert!(matches!(result, Err(ProviderError::NoApiKey)));
    }
}
