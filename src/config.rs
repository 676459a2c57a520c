//! Configuração do despacho carregada a partir de `dispatch.toml`.
//!
//! A struct [`DispatchConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `EXPO_ACCESS_TOKEN` tem precedência sobre o arquivo.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, ensure};
use serde::Deserialize;

use crate::dispatch::{AcceptanceWindow, MAX_WINDOW_SECS};
use crate::notify::RetryConfig;
use crate::notify::expo::EXPO_PUSH_URL;

pub const DEFAULT_CONFIG_PATH: &str = "dispatch.toml";

/// Configuração de nível superior carregada de `dispatch.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Janela de aceitação por nível de urgência.
    #[serde(default)]
    pub acceptance_window: AcceptanceWindow,

    /// Máximo de rodadas antes de declarar o despacho esgotado. Ausente = sem limite.
    #[serde(default)]
    pub max_rounds: Option<u32>,

    /// Intervalo entre varreduras de ofertas expiradas.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Raio máximo de busca de contratados, em milhas.
    #[serde(default = "default_max_distance_miles")]
    pub max_distance_miles: f64,

    /// Arquivo JSON com ofertas e estado de despacho.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Arquivo TOML com o cadastro de contratados.
    #[serde(default = "default_roster_path")]
    pub roster_path: PathBuf,

    #[serde(default)]
    pub push: PushConfig,
}

/// Entrega de notificações push via Expo.
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    /// Desligado = ofertas apenas registradas no log.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub access_token: String,

    /// Onde os tokens registrados são guardados.
    #[serde(default = "default_tokens_path")]
    pub tokens_path: PathBuf,

    #[serde(default = "default_push_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_push_base_delay_ms")]
    pub base_delay_ms: u64,
}

// Valor padrão para o intervalo de varredura: 30s.
fn default_sweep_interval_secs() -> u64 {
    30
}

// Valor padrão para o raio de busca: 50 milhas.
fn default_max_distance_miles() -> f64 {
    50.0
}

fn default_state_path() -> PathBuf {
    PathBuf::from("dispatch-state.json")
}

fn default_roster_path() -> PathBuf {
    PathBuf::from("contractors.toml")
}

fn default_push_endpoint() -> String {
    EXPO_PUSH_URL.to_string()
}

fn default_tokens_path() -> PathBuf {
    PathBuf::from("push-tokens.json")
}

fn default_push_max_retries() -> u32 {
    3
}

fn default_push_base_delay_ms() -> u64 {
    500
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_push_endpoint(),
            access_token: String::new(),
            tokens_path: default_tokens_path(),
            max_retries: default_push_max_retries(),
            base_delay_ms: default_push_base_delay_ms(),
        }
    }
}

impl PushConfig {
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay_ms,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            acceptance_window: AcceptanceWindow::default(),
            max_rounds: None,
            sweep_interval_secs: default_sweep_interval_secs(),
            max_distance_miles: default_max_distance_miles(),
            state_path: default_state_path(),
            roster_path: default_roster_path(),
            push: PushConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Carrega a configuração de `dispatch.toml` no diretório atual.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Carrega a configuração de `path`. Usa valores padrão se o arquivo não existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<DispatchConfig>(&contents)?
        } else {
            Self::default()
        };
        config.validate()?;

        // Variável de ambiente tem precedência sobre o arquivo para o token de acesso.
        if let Ok(token) = std::env::var("EXPO_ACCESS_TOKEN") {
            if !token.is_empty() {
                config.push.access_token = token;
            }
        }

        Ok(config)
    }

    /// Rejeita janelas de aceitação nulas ou acima de [`MAX_WINDOW_SECS`].
    /// Chamada de novo depois que a CLI sobrescreve valores.
    pub fn validate(&self) -> Result<()> {
        let window = &self.acceptance_window;
        ensure!(
            window.shortest_secs() > 0,
            "acceptance_window must be at least 1 second"
        );
        ensure!(
            window.longest_secs() <= MAX_WINDOW_SECS,
            "acceptance_window of {}s exceeds the {MAX_WINDOW_SECS}s limit",
            window.longest_secs()
        );
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.acceptance_window.normal_secs, 180);
        assert_eq!(config.acceptance_window.emergency_secs, 60);
        assert_eq!(config.max_rounds, None);
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.max_distance_miles, 50.0);
        assert!(!config.push.enabled);
        assert_eq!(config.push.endpoint, EXPO_PUSH_URL);
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_rounds = 5
            sweep_interval_secs = 10

            [acceptance_window]
            urgent_secs = 90

            [push]
            enabled = true
            max_retries = 1
        "#;
        let config: DispatchConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_rounds, Some(5));
        assert_eq!(config.sweep_interval(), Duration::from_secs(10));
        assert_eq!(config.acceptance_window.urgent_secs, 90);
        assert_eq!(config.acceptance_window.normal_secs, 180);
        assert!(config.push.enabled);
        assert_eq!(config.push.retry().max_retries, 1);
        assert_eq!(config.push.retry().base_delay_ms, 500);
        assert_eq!(config.state_path, PathBuf::from("dispatch-state.json"));
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let config = DispatchConfig::load_from(Path::new("/no/such/dispatch.toml")).unwrap();
        assert_eq!(config.sweep_interval_secs, 30);
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        std::fs::write(&path, "max_distance_miles = 12.5\n").unwrap();
        let config = DispatchConfig::load_from(&path).unwrap();
        assert_eq!(config.max_distance_miles, 12.5);
    }

    #[test]
    fn load_rejects_out_of_range_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dispatch.toml");
        std::fs::write(
            &path,
            "[acceptance_window]\nnormal_secs = 100000000000000\n",
        )
        .unwrap();
        let err = DispatchConfig::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("exceeds"));

        std::fs::write(&path, "[acceptance_window]\nemergency_secs = 0\n").unwrap();
        assert!(DispatchConfig::load_from(&path).is_err());
    }

    #[test]
    fn validate_checks_overridden_window() {
        let mut config = DispatchConfig::default();
        config.acceptance_window = AcceptanceWindow::uniform(MAX_WINDOW_SECS);
        assert!(config.validate().is_ok());
        config.acceptance_window = AcceptanceWindow::uniform(MAX_WINDOW_SECS + 1);
        assert!(config.validate().is_err());
    }
}
