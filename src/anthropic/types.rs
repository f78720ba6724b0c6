//! Tipos de dados do endpoint `v1/messages` da Anthropic usados pelo
//! provedor de legendas.
//!
//! Só o subconjunto que o pipeline envia e lê: prompt de sistema opcional,
//! mensagens de texto e os blocos de texto da resposta.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    /// Identificador do modelo (ex.: "claude-haiku-4-5-20251001").
    pub model: String,
    /// Limite de tokens da resposta.
    pub max_tokens: u32,
    /// Instruções de sistema, omitidas do JSON quando ausentes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

impl MessagesRequest {
    /// Requisição de um único turno do usuário.
    pub fn single_turn(model: impl Into<String>, max_tokens: u32, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: None,
            messages: vec![Message {
                role: "user".into(),
                content: prompt.into(),
            }],
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// "user" ou "assistant".
    pub role: String,
    pub content: String,
}

/// Resposta de `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub model: String,
    /// Motivo da parada ("end_turn", "max_tokens"); `None` se em progresso.
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl MessagesResponse {
    /// Concatena todos os blocos de texto da resposta.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.content_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Bloco de conteúdo. `content_type` é serializado como `"type"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}
