//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；
//! 错误映射为 LlmError 的 timeout / connection / http / parse 四类，重试交给上层。

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;

use crate::llm::{GenerateOptions, LlmClient, LlmError};

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiLlm {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiLlm {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("SCOUT_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
        }
    }

    fn map_error(e: OpenAIError) -> LlmError {
        match e {
            OpenAIError::Reqwest(re) => {
                let msg = re.to_string();
                if msg.contains("timed out") || msg.contains("timeout") {
                    LlmError::Timeout
                } else {
                    LlmError::Connection(msg)
                }
            }
            OpenAIError::ApiError(api) => {
                let status = api
                    .code
                    .as_ref()
                    .map(|c| c.to_string())
                    .and_then(|s| s.trim_matches('"').parse::<u16>().ok())
                    .unwrap_or(500);
                LlmError::Http(status, api.message)
            }
            OpenAIError::JSONDeserialize(je) => LlmError::Parse(je.to_string()),
            other => LlmError::Connection(other.to_string()),
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiLlm {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<String, LlmError> {
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()
            .map_err(Self::map_error)?;
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(opts.temperature)
            .max_tokens(opts.max_tokens)
            .messages(vec![ChatCompletionRequestMessage::User(user_msg)])
            .build()
            .map_err(Self::map_error)?;

        let response = tokio::time::timeout(opts.timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(Self::map_error)?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::Parse("empty completion".to_string()));
        }
        Ok(content)
    }
}
