//! Configuração do promogate carregada a partir de `promogate.toml`.
//!
//! A struct [`PipelineConfig`] contém todos os parâmetros configuráveis.
//! Valores ausentes no arquivo usam defaults sensíveis. As variáveis de
//! ambiente `ANTHROPIC_API_KEY` e `PROMOGATE_PUSH_TOKEN` têm precedência
//! sobre o arquivo.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::approval::ReapprovalPolicy;
use crate::generator::GeneratorSettings;
use crate::job::RetryConfig;
use crate::orchestrator::StrategySelector;

const DEFAULT_PATH: &str = "promogate.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Diretório raiz para jobs, spool de mensagens e assets locais.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Tópico onde as mensagens de dispatch são publicadas.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Chave da API Anthropic. Vazia = provedor de legendas local.
    #[serde(default)]
    pub api_key: String,

    /// Modelo usado para gerar legendas.
    #[serde(default = "default_copy_model")]
    pub copy_model: String,

    /// Segredo compartilhado que autentica entregas push.
    #[serde(default)]
    pub push_token: String,

    /// Aprovadores: id do ator → token.
    #[serde(default)]
    pub approvers: BTreeMap<String, String>,

    /// Retentativas de publicação após o commit da aprovação.
    #[serde(default)]
    pub publish: RetryConfig,

    #[serde(default)]
    pub approval: ApprovalSettings,

    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub generators: GeneratorsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalSettings {
    /// Política para aprovar/rejeitar de novo um job já decidido.
    #[serde(default)]
    pub reapproval: ReapprovalPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationSettings {
    /// Chave mestra da estratégia delegada.
    #[serde(default)]
    pub delegated_enabled: bool,

    /// Percentual (0-100) de jobs roteados para a estratégia delegada.
    #[serde(default)]
    pub rollout_percentage: u8,

    /// Endpoint do motor multiagente. Sem ele a estratégia delegada fica desligada.
    #[serde(default)]
    pub engine_url: Option<String>,

    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self {
            delegated_enabled: false,
            rollout_percentage: 0,
            engine_url: None,
            engine_timeout_secs: default_engine_timeout_secs(),
        }
    }
}

impl OrchestrationSettings {
    pub fn selector(&self) -> StrategySelector {
        StrategySelector::new(self.delegated_enabled, self.rollout_percentage)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageSettings {
    /// Prefixo público das URLs de assets. Vazio = `file://` sob `data_dir/assets`.
    #[serde(default)]
    pub public_base_url: String,
}

/// Uma seção `[generators.<capacidade>]` por capacidade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeneratorsConfig {
    #[serde(default)]
    pub captions: GeneratorSettings,
    #[serde(default)]
    pub image: GeneratorSettings,
    #[serde(default)]
    pub video: GeneratorSettings,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("promogate-data")
}

fn default_topic() -> String {
    "creative-tasks".to_string()
}

fn default_copy_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_engine_timeout_secs() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            topic: default_topic(),
            api_key: String::new(),
            copy_model: default_copy_model(),
            push_token: String::new(),
            approvers: BTreeMap::new(),
            publish: RetryConfig::default(),
            approval: ApprovalSettings::default(),
            orchestration: OrchestrationSettings::default(),
            storage: StorageSettings::default(),
            generators: GeneratorsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Carrega `path`, ou `promogate.toml` no diretório atual.
    ///
    /// Sem caminho explícito, a ausência do arquivo resulta nos defaults;
    /// um caminho explícito inexistente é erro.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::from_file(Path::new(DEFAULT_PATH))?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.check()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Variáveis de ambiente têm precedência sobre o arquivo.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            self.api_key = key;
        }
        if let Some(token) = var("PROMOGATE_PUSH_TOKEN")
            && !token.is_empty()
        {
            self.push_token = token;
        }
    }

    fn check(&self) -> Result<()> {
        if self.orchestration.rollout_percentage > 100 {
            bail!(
                "orchestration.rollout_percentage must be 0-100, got {}",
                self.orchestration.rollout_percentage
            );
        }
        if self.topic.trim().is_empty() {
            bail!("topic must not be empty");
        }
        Ok(())
    }

    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    pub fn spool_dir(&self) -> PathBuf {
        self.data_dir.join("spool")
    }

    pub fn assets_dir(&self) -> PathBuf {
        self.data_dir.join("assets")
    }

    /// Prefixo público efetivo dos assets.
    pub fn public_base_url(&self) -> String {
        if !self.storage.public_base_url.is_empty() {
            return self.storage.public_base_url.trim_end_matches('/').to_string();
        }
        let dir = std::path::absolute(self.assets_dir()).unwrap_or_else(|_| self.assets_dir());
        format!("file://{}", dir.display())
    }
}
