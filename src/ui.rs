//! Interface de terminal do despachante: spinner e saída colorida.
//!
//! Usa `indicatif` para o spinner do modo `watch` e `console` para
//! estilização. Respostas completas continuam saindo em JSON; aqui ficam
//! apenas os resumos legíveis.

use chrono::{DateTime, Utc};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use lightning_dispatch::api::{ApiError, JobReport};
use lightning_dispatch::dispatch::{AssignmentStatus, DispatchPhase, JobAssignment, SweepReport};

/// Formata segundos restantes como `m:ss`.
pub fn format_countdown(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

fn status_style(status: AssignmentStatus) -> Style {
    match status {
        AssignmentStatus::Pending => Style::new().cyan(),
        AssignmentStatus::Accepted => Style::new().green().bold(),
        AssignmentStatus::Rejected => Style::new().red(),
        AssignmentStatus::Expired => Style::new().yellow(),
        AssignmentStatus::Superseded => Style::new().dim(),
    }
}

/// Uma linha por oferta: rodada, contratado, status e contagem regressiva.
pub fn print_offer(assignment: &JobAssignment, now: DateTime<Utc>) {
    let style = status_style(assignment.status);
    let countdown = if assignment.is_live_at(now) {
        format!(" ⏱ {}", format_countdown(assignment.seconds_remaining(now)))
    } else {
        String::new()
    };
    println!(
        "  R{:<2} {:<12} {:<11} {:>5.1} mi  {}{}",
        assignment.dispatch_round,
        assignment.contractor_id,
        style.apply_to(assignment.status),
        assignment.distance_to_job,
        Style::new().dim().apply_to(&assignment.id),
        countdown
    );
}

/// Resumo do despacho de um job com o histórico de rodadas.
pub fn print_report(report: &JobReport, now: DateTime<Utc>) {
    let phase_style = match report.phase {
        DispatchPhase::Dispatching => Style::new().cyan().bold(),
        DispatchPhase::Assigned => Style::new().green().bold(),
        DispatchPhase::Exhausted => Style::new().red().bold(),
        DispatchPhase::Cancelled => Style::new().yellow().bold(),
    };
    println!();
    println!(
        "{} {} ({} job, {} rodada(s))",
        phase_style.apply_to(report.phase),
        report.state.job_id,
        report.state.request.job_type,
        report.state.current_round
    );
    for assignment in &report.assignments {
        print_offer(assignment, now);
    }
}

pub fn print_error(error: &ApiError) {
    eprintln!(
        "  {} {}: {}",
        Style::new().red().bold().apply_to("✗"),
        error.kind,
        error.message
    );
}

/// Spinner do modo `watch`, atualizado a cada varredura.
pub struct WatchProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    sweeps: u64,
}

impl WatchProgress {
    pub fn start(interval_secs: u64) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("Varrendo a cada {interval_secs}s (Ctrl-C para sair)"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { pb, sweeps: 0 }
    }

    /// Registra o resultado de uma varredura acima do spinner.
    pub fn sweep(&mut self, report: &SweepReport) {
        self.sweeps += 1;
        let yellow = Style::new().yellow();
        let green = Style::new().green();
        let red = Style::new().red().bold();
        for expired in &report.expired {
            self.pb.println(format!(
                "  {} {} expirou (job {}, rodada {})",
                yellow.apply_to("⌛"),
                expired.contractor_id,
                expired.job_id,
                expired.dispatch_round
            ));
        }
        for offer in &report.redispatched {
            self.pb.println(format!(
                "  {} job {} oferecido a {} (rodada {})",
                green.apply_to("→"),
                offer.job_id,
                offer.contractor_id,
                offer.dispatch_round
            ));
        }
        for job_id in &report.exhausted {
            self.pb.println(format!(
                "  {} job {job_id} sem contratados disponíveis",
                red.apply_to("✗")
            ));
        }
        self.pb.set_message(format!("{} varredura(s) executada(s)", self.sweeps));
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
        println!("  Watcher parado após {} varredura(s)", self.sweeps);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_formats_minutes_and_seconds() {
        assert_eq!(format_countdown(180), "3:00");
        assert_eq!(format_countdown(61), "1:01");
        assert_eq!(format_countdown(9), "0:09");
    }

    #[test]
    fn countdown_never_goes_negative() {
        assert_eq!(format_countdown(-5), "0:00");
    }
}
