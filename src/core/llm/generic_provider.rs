use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::registry::{ApiFormat, AuthType, ProviderDef};
use super::{ChatMessage, GatewayError, LlmProvider};

// ── OpenAI-compatible request/response ──

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

// ── Gemini request/response ──

#[derive(Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Serialize, Debug, PartialEq)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Debug, PartialEq)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiResContent,
}

#[derive(Deserialize)]
struct GeminiResContent {
    #[serde(default)]
    parts: Vec<GeminiResPart>,
}

#[derive(Deserialize)]
struct GeminiResPart {
    #[serde(default)]
    text: String,
}

/// Split chat messages into Gemini's system instruction plus strictly
/// alternating user/model turns.
fn to_gemini_contents(messages: &[ChatMessage]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
    let mut system_lines = Vec::new();
    let mut contents: Vec<GeminiContent> = Vec::new();

    for m in messages {
        let (role, text) = match m.role.as_str() {
            "system" if contents.is_empty() => {
                system_lines.push(m.content.clone());
                continue;
            }
            "system" => ("user", format!("[SYSTEM] {}", m.content)),
            "assistant" => ("model", m.content.clone()),
            _ => ("user", m.content.clone()),
        };

        match contents.last_mut() {
            Some(last) if last.role == role => {
                if let Some(part) = last.parts.first_mut() {
                    part.text.push('\n');
                    part.text.push_str(&text);
                }
            }
            _ => contents.push(GeminiContent {
                role: role.to_string(),
                parts: vec![GeminiPart { text }],
            }),
        }
    }

    let system = (!system_lines.is_empty()).then(|| GeminiContent {
        role: "user".to_string(),
        parts: vec![GeminiPart {
            text: system_lines.join("\n"),
        }],
    });
    (system, contents)
}

// ── Generic Provider ──

/// Talks to any provider described by a [`ProviderDef`].
pub struct GenericProvider {
    provider_def: ProviderDef,
    api_key: String,
    client: Client,
}

impl GenericProvider {
    pub fn new(provider_def: ProviderDef, api_key: String) -> Self {
        Self {
            provider_def,
            api_key,
            client: Client::new(),
        }
    }

    fn authorize(&self, mut request: RequestBuilder) -> RequestBuilder {
        for (name, value) in &self.provider_def.extra_headers {
            request = request.header(name, value);
        }
        match self.provider_def.auth.auth_type {
            AuthType::Bearer => request.header("Authorization", format!("Bearer {}", self.api_key)),
            AuthType::Header => {
                let header = self
                    .provider_def
                    .auth
                    .header_name
                    .as_deref()
                    .unwrap_or("Authorization");
                request.header(header, &self.api_key)
            }
            // Appended to the URL by the caller.
            AuthType::QueryParam => request,
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, GatewayError> {
        let provider = self.provider_def.name.clone();
        let res = request.send().await.map_err(|source| GatewayError::Http {
            provider: provider.clone(),
            source,
        })?;
        let status = res.status();
        if !status.is_success() {
            return Err(GatewayError::Api {
                provider,
                status: status.as_u16(),
                body: res.text().await.unwrap_or_default(),
            });
        }
        res.json::<T>()
            .await
            .map_err(|source| GatewayError::Decode { provider, source })
    }

    async fn generate_openai(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        let req = OpenAiRequest {
            model: model_id,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature,
        };

        let request = self.authorize(self.client.post(&self.provider_def.base_url).json(&req));
        let parsed: OpenAiResponse = self.send(request).await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| GatewayError::EmptyResponse {
                provider: self.provider_def.name.clone(),
            })
    }

    async fn generate_gemini(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        let (system_instruction, contents) = to_gemini_contents(messages);
        let req = GeminiRequest {
            system_instruction,
            contents,
            generation_config: temperature.map(|temperature| GeminiGenerationConfig { temperature }),
        };

        let base = self.provider_def.base_url.replace("{model}", model_id);
        let url = match self.provider_def.auth.auth_type {
            AuthType::QueryParam => {
                let param_name = self.provider_def.auth.param_name.as_deref().unwrap_or("key");
                format!("{}?{}={}", base, param_name, self.api_key)
            }
            AuthType::Bearer | AuthType::Header => base,
        };

        let request = self.authorize(self.client.post(&url).json(&req));
        let parsed: GeminiResponse = self.send(request).await?;
        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| GatewayError::EmptyResponse {
                provider: self.provider_def.name.clone(),
            })
    }
}

#[async_trait]
impl LlmProvider for GenericProvider {
    fn provider_id(&self) -> &str {
        &self.provider_def.id
    }

    async fn generate(
        &self,
        model_id: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String, GatewayError> {
        match self.provider_def.api_format {
            ApiFormat::Openai => self.generate_openai(model_id, messages, temperature).await,
            ApiFormat::Gemini => self.generate_gemini(model_id, messages, temperature).await,
        }
    }
}
