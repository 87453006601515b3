use serde::{Deserialize, Serialize};

use crate::core::config::{GenerationConfig, TransmissionMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Constraint on the shape of the backend's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub format: ResponseFormat,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub transmission: TransmissionMode,
    pub keep_alive: Option<String>,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>, config: &GenerationConfig) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            format: ResponseFormat::Text,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            transmission: config.transmission,
            keep_alive: config.keep_alive.clone(),
        }
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.format = format;
        self
    }

    /// The conversation as one prompt, for backends taking a single string.
    pub fn flattened_prompt(&self) -> String {
        flatten_messages(&self.messages)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderModel {
    pub id: String,
    pub name: String,
}

/// Renders messages as `role: content` lines.
pub fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", message.role.as_str(), clean_input(&message.content)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Strips zero-width characters and control characters other than
/// newline, carriage return and tab.
pub fn clean_input(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(c, '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{2060}' | '\u{feff}'))
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let value = serde_json::to_value(Message::system("be brief")).unwrap();
        assert_eq!(value, serde_json::json!({ "role": "system", "content": "be brief" }));
    }

    #[test]
    fn flattening_prefixes_each_line_with_its_role() {
        let prompt = flatten_messages(&[
            Message::system("You extract facts."),
            Message::user("Alice met Bob."),
        ]);
        assert_eq!(prompt, "system: You extract facts.\nuser: Alice met Bob.");
    }

    #[test]
    fn clean_input_drops_invisible_characters() {
        assert_eq!(clean_input("a\u{200b}b\u{0007}c\n\td"), "abc\n\td");
    }

    #[test]
    fn request_takes_sampling_settings_from_config() {
        let config = GenerationConfig::default();
        let request = GenerationRequest::new(vec![Message::user("hi")], &config)
            .with_format(ResponseFormat::Json);
        assert_eq!(request.model, config.model);
        assert_eq!(request.max_output_tokens, 1000);
        assert_eq!(request.format, ResponseFormat::Json);
        assert_eq!(request.keep_alive.as_deref(), Some("5m"));
    }
}
