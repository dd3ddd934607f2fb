use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::generic_provider::GenericProvider;
use super::registry::ProviderRegistry;
use super::{ChatMessage, GatewayError, LlmProvider};
use crate::core::config::GatewayConfig;

const PROMPT_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InvokeRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl InvokeRequest {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Where a reply's text came from.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOrigin {
    Provider,
    Unconfigured,
    Fallback { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayReply {
    pub response: String,
    pub tool_to_call: Option<String>,
    #[serde(skip)]
    pub origin: ReplyOrigin,
}

struct PrimaryProvider {
    provider: Box<dyn LlmProvider>,
    model: String,
}

/// Front door to the language model. `invoke` always produces a reply:
/// when the primary provider is missing or fails, the canned fallback
/// answers instead.
pub struct LlmGateway {
    primary: Option<PrimaryProvider>,
    timeout: Duration,
}

impl LlmGateway {
    pub fn from_config(config: &GatewayConfig, registry: &ProviderRegistry) -> Self {
        Self::from_config_with_env(config, registry, |key| std::env::var(key).ok())
    }

    pub fn from_config_with_env(
        config: &GatewayConfig,
        registry: &ProviderRegistry,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let provider_id = config.provider.trim();
        if provider_id.is_empty() || provider_id.eq_ignore_ascii_case("none") {
            info!("LLM gateway: no provider selected, using canned replies");
            return Self::unconfigured(timeout);
        }

        let Some(def) = registry.get_provider(provider_id) else {
            warn!("LLM gateway: unknown provider '{}', using canned replies", provider_id);
            return Self::unconfigured(timeout);
        };

        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env(&def.auth.env_key).filter(|k| !k.trim().is_empty()));
        let Some(api_key) = api_key else {
            warn!(
                "LLM gateway: {} selected but {} is not set, using canned replies",
                def.name, def.auth.env_key
            );
            return Self::unconfigured(timeout);
        };

        let mut def = def.clone();
        if let Some(base_url) = config.base_url.as_ref().filter(|u| !u.is_empty()) {
            def.base_url = base_url.clone();
        }
        let model = config
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| def.default_model.clone());

        info!("LLM gateway: {} ({})", def.name, model);
        Self::with_provider(Box::new(GenericProvider::new(def, api_key)), model, timeout)
    }

    pub fn with_provider(provider: Box<dyn LlmProvider>, model: String, timeout: Duration) -> Self {
        Self {
            primary: Some(PrimaryProvider { provider, model }),
            timeout,
        }
    }

    pub fn unconfigured(timeout: Duration) -> Self {
        Self {
            primary: None,
            timeout,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.primary.is_some()
    }

    /// `(provider id, model)` of the primary provider, if any.
    pub fn describe(&self) -> Option<(&str, &str)> {
        self.primary
            .as_ref()
            .map(|p| (p.provider.provider_id(), p.model.as_str()))
    }

    pub async fn invoke(&self, request: &InvokeRequest) -> GatewayReply {
        match self.call_primary(request).await {
            Ok(response) => GatewayReply {
                response,
                tool_to_call: None,
                origin: ReplyOrigin::Provider,
            },
            Err(GatewayError::Unconfigured) => GatewayReply {
                response: fallback_reply(&request.prompt, &request.tools),
                tool_to_call: None,
                origin: ReplyOrigin::Unconfigured,
            },
            Err(e) => {
                warn!("LLM gateway falling back to canned reply: {}", e);
                GatewayReply {
                    response: fallback_reply(&request.prompt, &request.tools),
                    tool_to_call: None,
                    origin: ReplyOrigin::Fallback {
                        error: e.to_string(),
                    },
                }
            }
        }
    }

    async fn call_primary(&self, request: &InvokeRequest) -> Result<String, GatewayError> {
        let primary = self.primary.as_ref().ok_or(GatewayError::Unconfigured)?;
        let messages = build_messages(request);
        match tokio::time::timeout(
            self.timeout,
            primary
                .provider
                .generate(&primary.model, &messages, request.temperature),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout {
                provider: primary.provider.provider_id().to_string(),
                secs: self.timeout.as_secs(),
            }),
        }
    }
}

fn build_messages(request: &InvokeRequest) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(3);
    if let Some(system_prompt) = request.system_prompt.as_ref().filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system_prompt.clone()));
    }
    if !request.tools.is_empty() {
        messages.push(ChatMessage::system(format!(
            "Tools available for this task (advisory): {}",
            request.tools.join(", ")
        )));
    }
    messages.push(ChatMessage::user(request.prompt.clone()));
    messages
}

/// Deterministic reply used whenever the primary provider cannot answer.
pub fn fallback_reply(prompt: &str, tools: &[String]) -> String {
    let excerpt: String = prompt.chars().take(PROMPT_EXCERPT_CHARS).collect();
    let mut reply = format!("(placeholder reply) Received: {}...", excerpt);
    if !tools.is_empty() {
        reply.push_str(&format!(" [tools: {}]", tools.join(", ")));
    }
    reply
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GatewayConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoProvider {
        seen: Mutex<Vec<ChatMessage>>,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn provider_id(&self) -> &str {
            "echo"
        }

        async fn generate(
            &self,
            _model_id: &str,
            messages: &[ChatMessage],
            _temperature: Option<f32>,
        ) -> Result<String, GatewayError> {
            self.seen.lock().unwrap().extend_from_slice(messages);
            Ok(format!("echo: {}", messages.last().unwrap().content))
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl LlmProvider for FailingProvider {
        fn provider_id(&self) -> &str {
            "failing"
        }

        async fn generate(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _temperature: Option<f32>,
        ) -> Result<String, GatewayError> {
            Err(GatewayError::Api {
                provider: "failing".into(),
                status: 500,
                body: "boom".into(),
            })
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl LlmProvider for SlowProvider {
        fn provider_id(&self) -> &str {
            "slow"
        }

        async fn generate(
            &self,
            _model_id: &str,
            _messages: &[ChatMessage],
            _temperature: Option<f32>,
        ) -> Result<String, GatewayError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("too late".into())
        }
    }

    #[test]
    fn fallback_echoes_prompt_excerpt_and_tools() {
        let long = "x".repeat(300);
        let reply = fallback_reply(&long, &[]);
        assert_eq!(reply, format!("(placeholder reply) Received: {}...", "x".repeat(120)));

        let reply = fallback_reply("summarize leads", &["gmail".into(), "sheets".into()]);
        assert!(reply.contains("summarize leads"));
        assert!(reply.ends_with("[tools: gmail, sheets]"));
    }

    #[test]
    fn fallback_counts_characters_not_bytes() {
        let prompt = "ש".repeat(130);
        let reply = fallback_reply(&prompt, &[]);
        assert!(reply.contains(&"ש".repeat(120)));
        assert!(!reply.contains(&"ש".repeat(121)));
    }

    #[tokio::test]
    async fn provider_reply_passes_through() {
        let provider = EchoProvider {
            seen: Mutex::new(Vec::new()),
        };
        let gateway = LlmGateway::with_provider(Box::new(provider), "m".into(), Duration::from_secs(5));
        let reply = gateway
            .invoke(&InvokeRequest {
                prompt: "hi".into(),
                tools: vec!["gmail".into()],
                system_prompt: Some("You are terse.".into()),
                temperature: Some(0.2),
            })
            .await;
        assert_eq!(reply.response, "echo: hi");
        assert_eq!(reply.origin, ReplyOrigin::Provider);
        assert!(reply.tool_to_call.is_none());
    }

    #[test]
    fn messages_carry_persona_and_tools_before_prompt() {
        let messages = build_messages(&InvokeRequest {
            prompt: "go".into(),
            tools: vec!["calendar".into()],
            system_prompt: Some("persona".into()),
            temperature: None,
        });
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::system("persona"));
        assert!(messages[1].content.contains("calendar"));
        assert_eq!(messages[2], ChatMessage::user("go"));
    }

    #[tokio::test]
    async fn unconfigured_gateway_uses_canned_reply() {
        let gateway = LlmGateway::unconfigured(Duration::from_secs(5));
        let reply = gateway.invoke(&InvokeRequest::prompt("hello")).await;
        assert_eq!(reply.origin, ReplyOrigin::Unconfigured);
        assert_eq!(reply.response, "(placeholder reply) Received: hello...");
    }

    #[tokio::test]
    async fn provider_error_falls_back_and_records_error() {
        let gateway = LlmGateway::with_provider(Box::new(FailingProvider), "m".into(), Duration::from_secs(5));
        let reply = gateway.invoke(&InvokeRequest::prompt("hello")).await;
        assert!(reply.response.starts_with("(placeholder reply)"));
        match reply.origin {
            ReplyOrigin::Fallback { error } => assert!(error.contains("500")),
            other => panic!("unexpected origin {:?}", other),
        }
    }

    #[tokio::test]
    async fn hung_provider_times_out_into_fallback() {
        let gateway =
            LlmGateway::with_provider(Box::new(SlowProvider), "m".into(), Duration::from_millis(50));
        let reply = gateway.invoke(&InvokeRequest::prompt("hello")).await;
        assert!(matches!(reply.origin, ReplyOrigin::Fallback { .. }));
    }

    #[test]
    fn config_without_credentials_is_unconfigured() {
        let registry = ProviderRegistry::builtin().unwrap();
        let config = GatewayConfig::default();
        let gateway = LlmGateway::from_config_with_env(&config, &registry, |_| None);
        assert!(!gateway.is_configured());

        let gateway = LlmGateway::from_config_with_env(&config, &registry, |key| {
            (key == "OPENAI_API_KEY").then(|| "sk-test".to_string())
        });
        assert_eq!(gateway.describe(), Some(("openai", "gpt-4o-mini")));
    }

    #[test]
    fn unknown_provider_is_unconfigured() {
        let registry = ProviderRegistry::builtin().unwrap();
        let config = GatewayConfig {
            provider: "acme".into(),
            api_key: Some("k".into()),
            ..GatewayConfig::default()
        };
        let gateway = LlmGateway::from_config_with_env(&config, &registry, |_| None);
        assert!(!gateway.is_configured());
    }
}
