//! services/api/src/adapters/classifier_llm.rs
//!
//! Adapter for the prompt classifier. Implements the `TextClassifier` port
//! with a zero-temperature chat completion that answers with one label.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use production_core::ports::{PortError, PortResult, TextClassifier};

const SYSTEM_INSTRUCTIONS: &str = r#"Classify the text in exactly one word, chosen from: "action", "commedia", "dramma".

Strict rules:
- Ghosting, a love that ended or sadness -> dramma
- Danger, guards or escapes -> action
- An embarrassing moment or school -> commedia

Answer with the single word only."#;

pub struct OpenAiClassifierAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiClassifierAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl TextClassifier for OpenAiClassifierAdapter {
    async fn classify(&self, text: &str) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(SYSTEM_INSTRUCTIONS)
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(format!("Text: \"{}\"", text))
                    .build()
                    .map_err(|e| PortError::Unexpected(e.to_string()))?,
            ),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .max_tokens(5u32)
            .temperature(0.0)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| PortError::Unexpected("Classifier returned no label".to_string()))
    }
}
