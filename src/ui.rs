//! Interface de terminal do watchpool: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores. O [`CompletionProgress`] acompanha visualmente
//! a completion de uma planilha no terminal.

use std::path::Path;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::command::CommandKind;
use crate::processor::{ItemReport, ProcessError};

/// Indicador visual de progresso para a completion de uma planilha.
///
/// Exibe um spinner animado durante o processamento e mensagens
/// coloridas para sucesso (verde), falha (vermelho) e erros parciais (amarelo).
pub struct CompletionProgress {
    // Spinner do indicatif.
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
}

impl CompletionProgress {
    /// Inicia o spinner com o nome do arquivo.
    pub fn start(path: &Path) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("Completing {}", path.display()));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza o spinner e exibe o resumo.
    ///
    /// Sucesso em verde com checkmark; cada erro de conversa em amarelo;
    /// falha do arquivo inteiro em vermelho com X.
    pub fn finish(&self, destination: &Path, result: &Result<ItemReport, ProcessError>) {
        self.pb.finish_and_clear();
        match result {
            Ok(report) if report.is_clean() => {
                println!(
                    "  {} Completed {} chat(s) into {}",
                    self.green.apply_to("✓"),
                    report.subtask_count,
                    destination.display()
                );
            }
            Ok(report) => {
                println!(
                    "  {} Completed {} chat(s) into {} with {} error(s)",
                    self.yellow.apply_to("!"),
                    report.subtask_count,
                    destination.display(),
                    report.errors.len()
                );
                for failure in &report.errors {
                    println!("    {} {failure}", self.yellow.apply_to("↳"));
                }
            }
            Err(e) => {
                println!("  {} Completion failed: {e}", self.red.apply_to("✗"));
            }
        }
    }
}

/// Imprime a tabela de comandos aceitos na coluna de comandos.
pub fn print_commands() {
    let bold = Style::new().bold();
    let dim = Style::new().dim();
    println!("{}", bold.apply_to("─── Commands ───"));
    for kind in CommandKind::ALL {
        let aliases = kind.names()[1..].join(", ");
        let remote = if kind.triggers_remote_call() { " (API call)" } else { "" };
        println!("  {:<12} {}{remote}", kind.name(), kind.summary());
        if !aliases.is_empty() {
            println!("  {:<12} {}", "", dim.apply_to(format!("aliases: {aliases}")));
        }
    }
}
