//! Configuração do watchpool carregada a partir de `watchpool.toml`.
//!
//! A struct [`PoolConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `ANTHROPIC_API_KEY` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conversation::ConversationDefaults;
use crate::error::PoolError;
use crate::processor::ProcessorSettings;
use crate::queue::{QueueDirs, WatcherSettings};
use crate::retry::BackoffPolicy;

/// Caminho padrão do arquivo de configuração.
pub const DEFAULT_CONFIG_PATH: &str = "watchpool.toml";

/// Configuração de nível superior carregada de `watchpool.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Diretório raiz do pool (contém `in`, `out` e `.cache`).
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Nome do diretório de entrada.
    #[serde(default = "default_in_dir_name")]
    pub in_dir_name: String,

    /// Nome do diretório de saída.
    #[serde(default = "default_out_dir_name")]
    pub out_dir_name: String,

    /// Modelo usado quando a planilha não define outro.
    #[serde(default = "default_model")]
    pub model: String,

    /// Limite de tokens por completion; `None` usa o default do cliente.
    #[serde(default)]
    pub max_tokens: Option<u32>,

    /// Chave da API Anthropic.
    #[serde(default)]
    pub api_key: String,

    /// Timeout por chamada em segundos; `None` usa o default do provedor.
    #[serde(default)]
    pub timeout_secs: Option<f64>,

    /// Retentativas em rate limit ou timeout (`-1` = sem limite).
    #[serde(default)]
    pub retries: i64,

    /// Máximo de arquivos processados ao mesmo tempo.
    #[serde(default)]
    pub max_concurrent_items: Option<usize>,

    /// Máximo de conversas simultâneas dentro de um arquivo.
    #[serde(default)]
    pub max_sub_concurrency: Option<usize>,

    /// Segundos sem relatório antes de registrar o status.
    #[serde(default = "default_status_delay_secs")]
    pub status_delay_secs: u64,

    /// Segundos entre duas varreduras do diretório de entrada.
    #[serde(default = "default_refresh_delay_secs")]
    pub refresh_delay_secs: u64,

    /// Recarrega arquivos deixados no cache por uma execução anterior.
    #[serde(default = "default_reload_cache")]
    pub reload_cache: bool,

    /// Processa apenas as abas com estes nomes.
    #[serde(default)]
    pub sheet_names: Option<Vec<String>>,

    /// Política de backoff entre retentativas.
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

// Valor padrão para o diretório raiz: "pool".
fn default_root_dir() -> PathBuf {
    PathBuf::from("pool")
}

fn default_in_dir_name() -> String {
    "in".to_string()
}

fn default_out_dir_name() -> String {
    "out".to_string()
}

// Valor padrão para o modelo: Sonnet.
fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

// Valor padrão para o status: a cada 60s.
fn default_status_delay_secs() -> u64 {
    60
}

// Valor padrão para a varredura: a cada 1s.
fn default_refresh_delay_secs() -> u64 {
    1
}

fn default_reload_cache() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            in_dir_name: default_in_dir_name(),
            out_dir_name: default_out_dir_name(),
            model: default_model(),
            max_tokens: None,
            api_key: String::new(),
            timeout_secs: None,
            retries: 0,
            max_concurrent_items: None,
            max_sub_concurrency: None,
            status_delay_secs: default_status_delay_secs(),
            refresh_delay_secs: default_refresh_delay_secs(),
            reload_cache: default_reload_cache(),
            sheet_names: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Carrega a configuração de `path` (ou `watchpool.toml` no diretório atual).
    /// Usa valores padrão se o arquivo padrão não existir; um caminho
    /// explícito ausente é um erro. Não valida: chame [`Self::validate`]
    /// depois de aplicar os overrides da CLI.
    pub fn load(path: Option<&Path>) -> Result<Self, PoolError> {
        let env_key = std::env::var("ANTHROPIC_API_KEY").ok();
        Self::load_with_env(path, env_key)
    }

    fn load_with_env(path: Option<&Path>, env_key: Option<String>) -> Result<Self, PoolError> {
        let mut config = match path {
            Some(path) => Self::read(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::read(Path::new(DEFAULT_CONFIG_PATH))?,
            None => Self::default(),
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração para a chave API.
        if let Some(key) = env_key.filter(|k| !k.is_empty()) {
            config.api_key = key;
        }

        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, PoolError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PoolError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str::<PoolConfig>(&contents)?)
    }

    /// Rejeita combinações de parâmetros sem sentido.
    pub fn validate(&self) -> Result<(), PoolError> {
        let invalid = |msg: String| Err(PoolError::Config(msg));

        if self.retries < -1 {
            return invalid(format!("retries must be -1 (unbounded) or more, got {}", self.retries));
        }
        if !(0.0..=1.0).contains(&self.backoff.spread_factor) {
            return invalid(format!(
                "backoff.spread_factor must be within [0, 1], got {}",
                self.backoff.spread_factor
            ));
        }
        if self.backoff.base < 1.0 {
            return invalid(format!("backoff.base must be at least 1, got {}", self.backoff.base));
        }
        if self.max_concurrent_items == Some(0) || self.max_sub_concurrency == Some(0) {
            return invalid("concurrency limits must be at least 1".to_string());
        }
        if let Some(secs) = self.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return invalid(format!("timeout_secs must be positive, got {secs}"));
            }
        }
        if self.refresh_delay_secs > self.status_delay_secs {
            return invalid(format!(
                "refresh_delay_secs ({}) must not exceed status_delay_secs ({})",
                self.refresh_delay_secs, self.status_delay_secs
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn dirs(&self) -> QueueDirs {
        QueueDirs::new(&self.root_dir, &self.in_dir_name, &self.out_dir_name)
    }

    pub fn conversation_defaults(&self) -> ConversationDefaults {
        ConversationDefaults {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            timeout: self.timeout(),
            retries: self.retries,
        }
    }

    pub fn processor_settings(&self) -> ProcessorSettings {
        ProcessorSettings {
            defaults: self.conversation_defaults(),
            backoff: self.backoff.clone(),
            max_sub_concurrency: self.max_sub_concurrency,
            sheet_names: self.sheet_names.clone(),
        }
    }

    pub fn watcher_settings(&self) -> WatcherSettings {
        WatcherSettings {
            status_delay: Duration::from_secs(self.status_delay_secs),
            refresh_delay: Duration::from_secs(self.refresh_delay_secs),
            reload_cache: self.reload_cache,
            max_concurrent_items: self.max_concurrent_items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = PoolConfig::default();
        assert_eq!(config.in_dir_name, "in");
        assert_eq!(config.out_dir_name, "out");
        assert_eq!(config.retries, 0);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.max_concurrent_items, None);
        assert_eq!(config.status_delay_secs, 60);
        assert_eq!(config.refresh_delay_secs, 1);
        assert!(config.reload_cache);
        assert!(config.api_key.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            root_dir = "/srv/pool"
            retries = -1
            timeout_secs = 2.5
            max_sub_concurrency = 4

            [backoff]
            base_delay_ms = 250
        "#;
        let config: PoolConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/srv/pool"));
        assert_eq!(config.retries, -1);
        assert_eq!(config.timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.max_sub_concurrency, Some(4));
        assert_eq!(config.backoff.base_delay_ms, 250);
        assert!(config.backoff.jitter);
        assert_eq!(config.model, "claude-sonnet-4-5-20250929");
        assert!(config.validate().is_ok());

        let dirs = config.dirs();
        assert_eq!(dirs.inbox, PathBuf::from("/srv/pool/in"));
        assert_eq!(dirs.cache, PathBuf::from("/srv/pool/.cache"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<PoolConfig>("retry = 3").is_err());
    }

    #[test]
    fn validate_rejects_nonsense() {
        let cases: Vec<Box<dyn Fn(&mut PoolConfig)>> = vec![
            Box::new(|c| c.retries = -2),
            Box::new(|c| c.backoff.spread_factor = 1.5),
            Box::new(|c| c.backoff.base = 0.5),
            Box::new(|c| c.max_concurrent_items = Some(0)),
            Box::new(|c| c.max_sub_concurrency = Some(0)),
            Box::new(|c| c.timeout_secs = Some(0.0)),
            Box::new(|c| c.refresh_delay_secs = 120),
        ];
        for mutate in cases {
            let mut config = PoolConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(PoolError::Config(_))));
        }
    }

    #[test]
    fn env_key_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchpool.toml");
        std::fs::write(&path, "api_key = \"from-file\"").unwrap();

        let config = PoolConfig::load_with_env(Some(&path), Some("from-env".into())).unwrap();
        assert_eq!(config.api_key, "from-env");

        let config = PoolConfig::load_with_env(Some(&path), Some(String::new())).unwrap();
        assert_eq!(config.api_key, "from-file");
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PoolConfig::load_with_env(Some(&dir.path().join("nope.toml")), None).unwrap_err();
        assert!(matches!(err, PoolError::ConfigRead { .. }));
    }

    #[test]
    fn invalid_file_values_are_checked_after_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watchpool.toml");
        std::fs::write(&path, "retries = -5").unwrap();

        let mut config = PoolConfig::load_with_env(Some(&path), None).unwrap();
        assert!(matches!(config.validate(), Err(PoolError::Config(_))));

        config.retries = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn derived_settings() {
        let config = PoolConfig {
            retries: 2,
            max_concurrent_items: Some(3),
            reload_cache: false,
            ..PoolConfig::default()
        };
        assert_eq!(config.conversation_defaults().retries, 2);
        let watcher = config.watcher_settings();
        assert_eq!(watcher.max_concurrent_items, Some(3));
        assert!(!watcher.reload_cache);
        assert_eq!(watcher.status_delay, Duration::from_secs(60));
    }
}
