//! Interface de terminal do promogate: spinners e saída colorida.
//!
//! Usa `indicatif` para spinners de progresso e `console` para estilização
//! com cores. O [`Progress`] acompanha visualmente uma operação longa e
//! [`print_job`] imprime o registro de um job.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use promogate::dispatcher::{DrainReport, HandleOutcome};
use promogate::job::{Job, JobStatus};

/// Indicador visual de progresso para uma operação no terminal.
pub struct Progress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl Progress {
    /// Inicia o spinner com a mensagem dada.
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Finaliza com sucesso (verde, checkmark).
    pub fn success(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.green.apply_to("✓"));
    }

    /// Finaliza com falha (vermelho, X).
    pub fn failure(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", self.red.apply_to("✗"));
    }
}

fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green().bold(),
        JobStatus::Failed | JobStatus::Rejected => Style::new().red().bold(),
        JobStatus::Processing => Style::new().cyan().bold(),
        JobStatus::PendingApproval => Style::new().yellow().bold(),
    }
}

/// Imprime o resumo do job seguido do registro completo em JSON.
pub fn print_job(job: &Job) {
    let dim = Style::new().dim();
    println!();
    println!(
        "{} {}",
        status_style(job.status).apply_to(format!("[{}]", job.status)),
        job.id
    );
    println!("  {} {}", dim.apply_to("owner:"), job.owner_id);
    println!("  {} {}", dim.apply_to("goal: "), job.task_plan.goal);
    for (capability, asset) in &job.assets {
        println!("  {} {capability}: {}", Style::new().green().apply_to("+"), asset.url);
    }
    for warning in &job.warnings {
        println!("  {} {warning}", Style::new().yellow().apply_to("!"));
    }
    println!();
    println!("{}", dim.apply_to("─── Job Record ───"));
    println!("{}", serde_json::to_string_pretty(job).unwrap_or_default());
}

/// Uma linha por entrega processada.
pub fn print_drain(report: &DrainReport) {
    let yellow = Style::new().yellow();
    for outcome in &report.outcomes {
        let line = match outcome {
            HandleOutcome::Completed { job_id, strategy } => {
                format!("{} {job_id} completed via {strategy}", Style::new().green().apply_to("✓"))
            }
            HandleOutcome::Failed { job_id, strategy } => {
                format!("{} {job_id} failed via {strategy}", Style::new().red().apply_to("✗"))
            }
            HandleOutcome::Duplicate { job_id, status } => {
                format!("{} {job_id} already {status}, skipped", yellow.apply_to("="))
            }
            HandleOutcome::LostRace { job_id, status } => {
                format!("{} {job_id} settled elsewhere as {status}", yellow.apply_to("="))
            }
            HandleOutcome::Inconsistent { job_id, status } => {
                format!("{} {job_id} is {status}, dispatch ignored", yellow.apply_to("!"))
            }
            HandleOutcome::NotFound { job_id } => format!("{} {job_id} not found", yellow.apply_to("!")),
            HandleOutcome::Malformed { reason } => format!("{} malformed message: {reason}", yellow.apply_to("!")),
            HandleOutcome::Untrusted => format!("{} unverified sender, dropped", yellow.apply_to("!")),
        };
        println!("  {line}");
    }
    if report.nacked > 0 {
        println!("  {} {} deliveries returned for retry", yellow.apply_to("↻"), report.nacked);
    }
}
