//! Tipos de dados para as notificações de oferta e o formato do serviço Expo Push.
//!
//! [`OfferNotice`] é o que o coordenador entrega à ponte de notificação;
//! [`PushMessage`] e [`PushTicketResponse`] espelham o JSON do endpoint
//! `/--/api/v2/push/send`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dispatch::JobAssignment;

/// Uma oferta recém-criada, com o contexto necessário para redigir a mensagem.
#[derive(Debug, Clone)]
pub struct OfferNotice {
    pub assignment: JobAssignment,
    pub job_type: String,
    pub estimated_value: f64,
}

impl OfferNotice {
    pub fn countdown_seconds(&self) -> i64 {
        (self.assignment.expires_at - self.assignment.created_at)
            .num_seconds()
            .max(0)
    }

    pub fn title(&self) -> &'static str {
        "⚡ New Job Alert!"
    }

    /// Ex.: "Plumbing job 2.4 miles away - $350. Accept in 3:00!"
    pub fn body(&self) -> String {
        let secs = self.countdown_seconds();
        format!(
            "{} job {:.1} miles away - ${}. Accept in {}:{:02}!",
            self.job_type,
            self.assignment.distance_to_job,
            format_dollars(self.estimated_value),
            secs / 60,
            secs % 60
        )
    }

    pub fn to_push(&self, token: &str) -> PushMessage {
        PushMessage {
            to: token.to_string(),
            sound: "default".into(),
            title: self.title().into(),
            body: self.body(),
            data: PushData {
                assignment_id: self.assignment.id.clone(),
                job_id: self.assignment.job_id.clone(),
                action: "dispatch_ping".into(),
                expires_at: self.assignment.expires_at,
                countdown_seconds: self.countdown_seconds(),
            },
        }
    }
}

// Whole dollars with thousands separators: 12500.0 -> "12,500".
fn format_dollars(value: f64) -> String {
    let whole = value.round().max(0.0) as u64;
    let digits = whole.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Corpo da requisição para o endpoint de push da Expo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushMessage {
    /// Token Expo do dispositivo do contratado.
    pub to: String,
    pub sound: String,
    pub title: String,
    pub body: String,
    /// Dados extras entregues ao app para abrir a oferta certa.
    pub data: PushData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub assignment_id: String,
    pub job_id: String,
    pub action: String,
    pub expires_at: DateTime<Utc>,
    pub countdown_seconds: i64,
}

/// Resposta do endpoint de push. `data` vem ausente em alguns erros.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicketResponse {
    #[serde(default)]
    pub data: Option<PushTicket>,
}

/// Ticket de entrega: `status` é "ok" ou "error".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushTicket {
    pub status: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Configuração de retentativas da entrega de push.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Máximo de retentativas após a primeira tentativa.
    pub max_retries: u32,
    /// Atraso base em milissegundos para backoff exponencial.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms * 2u64.pow(attempt.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn notice() -> OfferNotice {
        let now = Utc::now();
        OfferNotice {
            assignment: JobAssignment::offer("job-9", "c-1", 1, 2.44, now, Duration::minutes(3))
                .unwrap(),
            job_type: "Plumbing".into(),
            estimated_value: 12500.0,
        }
    }

    #[test]
    fn body_mentions_distance_value_and_countdown() {
        assert_eq!(
            notice().body(),
            "Plumbing job 2.4 miles away - $12,500. Accept in 3:00!"
        );
    }

    #[test]
    fn push_payload_matches_expo_shape() {
        let n = notice();
        let json = serde_json::to_value(n.to_push("ExponentPushToken[abc]")).unwrap();
        assert_eq!(json["to"], "ExponentPushToken[abc]");
        assert_eq!(json["sound"], "default");
        assert_eq!(json["data"]["action"], "dispatch_ping");
        assert_eq!(json["data"]["assignmentId"], n.assignment.id.as_str());
        assert_eq!(json["data"]["jobId"], "job-9");
        assert_eq!(json["data"]["countdownSeconds"], 180);
    }

    #[test]
    fn ticket_response_parses_error() {
        let resp: PushTicketResponse = serde_json::from_str(
            r#"{"data":{"status":"error","message":"DeviceNotRegistered"}}"#,
        )
        .unwrap();
        let ticket = resp.data.unwrap();
        assert_eq!(ticket.status, "error");
        assert_eq!(ticket.message.as_deref(), Some("DeviceNotRegistered"));
        assert!(ticket.id.is_none());
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
    }

    #[test]
    fn dollars_get_separators() {
        assert_eq!(format_dollars(0.0), "0");
        assert_eq!(format_dollars(999.4), "999");
        assert_eq!(format_dollars(1000.0), "1,000");
        assert_eq!(format_dollars(1234567.0), "1,234,567");
    }
}
