//! Interface de linha de comando do watchpool baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (watch, complete,
//! commands) e flags globais (--config, --model, --retries, --offline,
//! --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::PoolConfig;

/// watchpool: completa planilhas de chat deixadas em um diretório observado.
#[derive(Debug, Parser)]
#[command(name = "watchpool", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./watchpool.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Modelo a usar nesta sessão.
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Retentativas em rate limit ou timeout (-1 = sem limite).
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub retries: Option<i64>,

    /// Responde localmente com eco, sem chamar a API.
    #[arg(long, global = true, default_value_t = false)]
    pub offline: bool,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    /// Aplica as flags globais sobre a configuração carregada.
    pub fn apply_overrides(&self, config: &mut PoolConfig) {
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(retries) = self.retries {
            config.retries = retries;
        }
        if let Command::Watch { root: Some(root) } = &self.command {
            config.root_dir = root.clone();
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Observa o diretório de entrada e completa cada arquivo novo até Ctrl-C.
    Watch {
        /// Diretório raiz do pool (sobrepõe `root_dir`).
        root: Option<PathBuf>,
    },

    /// Completa uma única planilha.
    Complete {
        /// Planilha JSON a completar.
        file: PathBuf,

        /// Grava o resultado aqui em vez de sobrescrever o arquivo.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Lista os comandos aceitos na coluna de comandos.
    Commands,
}
