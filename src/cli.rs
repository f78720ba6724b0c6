//! Interface de linha de comando do promogate baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (submit, approve,
//! reject, consume, reconcile, status, demo) e flags globais (--config,
//! --rollout, --max-retries, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// promogate: pipeline de conteúdo com aprovação humana e geração paralela de assets.
#[derive(Debug, Parser)]
#[command(name = "promogate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: ./promogate.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Percentual de rollout da estratégia delegada (0-100); liga a chave mestra.
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub rollout: Option<u8>,

    /// Número máximo de retentativas de publicação.
    #[arg(long, global = true)]
    pub max_retries: Option<u32>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Cria um job em `pending_approval` a partir de um plano de tarefas.
    Submit(SubmitArgs),

    /// Aprova um job pendente e publica a mensagem de dispatch.
    Approve {
        job_id: String,
        /// Credencial do aprovador.
        #[arg(long)]
        token: String,
    },

    /// Rejeita um job pendente. Nenhuma mensagem é publicada.
    Reject {
        job_id: String,
        #[arg(long)]
        token: String,
    },

    /// Consome o spool de dispatch até esvaziá-lo.
    Consume,

    /// Republica o dispatch de um job parado em `processing`.
    Reconcile { job_id: String },

    /// Mostra o registro completo de um job.
    Status { job_id: String },

    /// Executa a demonstração embutida, toda em memória.
    Demo,
}

#[derive(Debug, Args)]
pub struct SubmitArgs {
    /// Dono do job (quem poderá aprová-lo).
    #[arg(long)]
    pub owner: String,

    /// Objetivo da campanha.
    #[arg(long, required_unless_present = "plan")]
    pub goal: Option<String>,

    /// Plano de tarefas completo em JSON; substitui as flags abaixo.
    #[arg(long, conflicts_with_all = ["goal", "captions", "image_prompt", "video_prompt", "tone", "brand_colors", "tagline"])]
    pub plan: Option<PathBuf>,

    /// Quantidade de legendas (1-10).
    #[arg(long)]
    pub captions: Option<u32>,

    #[arg(long, default_value = "engaging")]
    pub style: String,

    #[arg(long)]
    pub image_prompt: Option<String>,

    #[arg(long, default_value = "1024x1024")]
    pub image_size: String,

    #[arg(long)]
    pub video_prompt: Option<String>,

    /// Duração do vídeo em segundos (5-60).
    #[arg(long, default_value_t = 15)]
    pub duration: u32,

    /// Tom da marca (professional, casual, playful, luxury, technical).
    #[arg(long)]
    pub tone: Option<String>,

    /// Cor da marca como `HEX=Nome`; a primeira é a primária. Repetível.
    #[arg(long = "brand-color", value_name = "HEX=NAME")]
    pub brand_colors: Vec<String>,

    #[arg(long)]
    pub tagline: Option<String>,

    /// Foto do produto (PNG ou JPEG), removida quando o job termina.
    #[arg(long)]
    pub reference_image: Option<PathBuf>,
}
