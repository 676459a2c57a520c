//! Interface de linha de comando do despachante baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (ping, accept, reject,
//! pending, sweep, watch, demo...) e flags globais (--config, --window-secs,
//! --max-rounds, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use lightning_dispatch::dispatch::Urgency;

/// Lightning Dispatch: oferta de jobs a um contratado por vez, com prazo.
#[derive(Debug, Parser)]
#[command(name = "lightning-dispatch", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: dispatch.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Sobrescreve a janela de aceitação (segundos) para todas as urgências.
    #[arg(long, global = true)]
    pub window_secs: Option<u64>,

    /// Máximo de rodadas antes de esgotar o despacho.
    #[arg(long, global = true)]
    pub max_rounds: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Urgência aceita pela CLI, mapeada para [`Urgency`] internamente.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum UrgencyArg {
    /// Janela padrão (3 minutos).
    Normal,
    /// Janela curta (2 minutos).
    Urgent,
    /// Janela mínima (1 minuto).
    Emergency,
}

impl From<UrgencyArg> for Urgency {
    fn from(arg: UrgencyArg) -> Self {
        match arg {
            UrgencyArg::Normal => Urgency::Normal,
            UrgencyArg::Urgent => Urgency::Urgent,
            UrgencyArg::Emergency => Urgency::Emergency,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inicia (ou retoma) o despacho de um job.
    Ping {
        job_id: String,

        /// Latitude do local do job.
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,

        /// Longitude do local do job.
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,

        /// Tipo de serviço (ex.: Plumbing, HVAC).
        #[arg(long, default_value = "General")]
        job_type: String,

        /// Valor estimado do job em dólares.
        #[arg(long, default_value_t = 0.0)]
        value: f64,

        #[arg(long, value_enum, default_value_t = UrgencyArg::Normal)]
        urgency: UrgencyArg,
    },

    /// Aceita uma oferta.
    Accept { assignment_id: String },

    /// Recusa uma oferta e passa o job para o próximo contratado.
    Reject { assignment_id: String },

    /// Lista as ofertas pendentes de um contratado.
    Pending { contractor_id: String },

    /// Registra o token push de um contratado.
    RegisterPush { contractor_id: String, token: String },

    /// Cancela o despacho de um job.
    Cancel { job_id: String },

    /// Mostra o estado de despacho de um job, ou de todos.
    Status { job_id: Option<String> },

    /// Executa uma única varredura de ofertas expiradas.
    Sweep,

    /// Executa varreduras periódicas até Ctrl-C.
    Watch,

    /// Executa a demonstração embutida do protocolo, em memória.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_ping_subcommand() {
        let cli = Cli::parse_from([
            "lightning-dispatch",
            "ping",
            "job-42",
            "--lat",
            "30.27",
            "--lng",
            "-97.74",
            "--job-type",
            "Plumbing",
            "--value",
            "350",
            "--urgency",
            "emergency",
        ]);
        match cli.command {
            Command::Ping {
                job_id,
                lat,
                lng,
                job_type,
                value,
                urgency,
            } => {
                assert_eq!(job_id, "job-42");
                assert_eq!(lat, 30.27);
                assert_eq!(lng, -97.74);
                assert_eq!(job_type, "Plumbing");
                assert_eq!(value, 350.0);
                assert_eq!(Urgency::from(urgency), Urgency::Emergency);
            }
            _ => panic!("expected Ping command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "lightning-dispatch",
            "--config",
            "custom.toml",
            "--window-secs",
            "300",
            "--max-rounds",
            "5",
            "--verbose",
            "sweep",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.window_secs, Some(300));
        assert_eq!(cli.max_rounds, Some(5));
        assert!(matches!(cli.command, Command::Sweep));
    }

    #[test]
    fn cli_parses_register_push() {
        let cli = Cli::parse_from([
            "lightning-dispatch",
            "register-push",
            "c-7",
            "ExponentPushToken[xyz]",
        ]);
        match cli.command {
            Command::RegisterPush {
                contractor_id,
                token,
            } => {
                assert_eq!(contractor_id, "c-7");
                assert_eq!(token, "ExponentPushToken[xyz]");
            }
            _ => panic!("expected RegisterPush command"),
        }
    }

    #[test]
    fn cli_status_job_is_optional() {
        let cli = Cli::parse_from(["lightning-dispatch", "status"]);
        assert!(matches!(cli.command, Command::Status { job_id: None }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
