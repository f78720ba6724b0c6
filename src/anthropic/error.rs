//! Tipos de erro para o cliente da API Anthropic.
//!
//! [`AnthropicError`] distingue rate limiting, erros HTTP da API e falhas de
//! rede. A conversão para a taxonomia dos provedores de geração fica em
//! [`AnthropicError::into_provider_error`].

use thiserror::Error;

use crate::error::ProviderError;

/// Erros que podem ocorrer ao interagir com a API da Anthropic.
#[derive(Debug, Error)]
pub enum AnthropicError {
    /// HTTP 429. `retry_after_ms` indica quanto esperar antes de retentar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status de erro (4xx/5xx), com o corpo da resposta.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl AnthropicError {
    /// Mapeia para [`ProviderError`]: 429 vira cota, 5xx/529 indisponível,
    /// demais 4xx entrada inválida, timeout de rede vira timeout.
    pub fn into_provider_error(self, timeout: std::time::Duration) -> ProviderError {
        match self {
            AnthropicError::RateLimited { retry_after_ms } => {
                ProviderError::QuotaExceeded(format!("rate limited, retry after {retry_after_ms}ms"))
            }
            AnthropicError::ApiError { status, message } if status >= 500 => {
                ProviderError::Unavailable(format!("status {status}: {message}"))
            }
            AnthropicError::ApiError { status, message } => {
                ProviderError::InvalidInput(format!("status {status}: {message}"))
            }
            AnthropicError::NetworkError(e) if e.is_timeout() => ProviderError::Timeout(timeout),
            AnthropicError::NetworkError(e) => ProviderError::Unavailable(e.to_string()),
        }
    }
}
