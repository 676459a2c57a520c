//! Tipos de erro para a entrega de notificações de oferta.
//!
//! Nenhum destes erros interrompe o protocolo de despacho: o coordenador
//! apenas registra a falha e segue, já que o contratado ainda pode encontrar
//! a oferta por polling.

use thiserror::Error;

/// Erros que podem ocorrer ao notificar um contratado.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// O serviço de push retornou HTTP 429.
    /// O campo `retry_after_ms` indica quanto esperar antes de retentar.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro erro HTTP (4xx/5xx) do serviço de push.
    #[error("push API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    /// O serviço aceitou a requisição mas recusou a mensagem (ex.: token inválido).
    #[error("push rejected: {0}")]
    Rejected(String),

    /// Nenhum token de push registrado para o contratado.
    #[error("no push token registered for contractor {0}")]
    NoToken(String),

    /// Falha ao ler ou gravar o arquivo de tokens.
    #[error("token store error: {0}")]
    TokenStore(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout).
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl NotifyError {
    /// Falhas transitórias que valem uma nova tentativa com backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            NotifyError::RateLimited { .. } | NotifyError::NetworkError(_) => true,
            NotifyError::ApiError { status, .. } => *status >= 500,
            NotifyError::Rejected(_) | NotifyError::NoToken(_) | NotifyError::TokenStore(_) => {
                false
            }
        }
    }
}
