mod cli;
mod ui;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command, SubmitArgs};
use promogate::approval::{ApprovalOutcome, RejectOutcome};
use promogate::channel::PublishReceipt;
use promogate::config::PipelineConfig;
use promogate::job::{BrandStyle, BrandTone, ColorUsage, Job, TaskPlan};
use promogate::pipeline::Pipeline;
use ui::Progress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(pct) = cli.rollout {
        config.orchestration.delegated_enabled = true;
        config.orchestration.rollout_percentage = pct;
    }
    if let Some(max) = cli.max_retries {
        config.publish.max_retries = max;
    }

    match cli.command {
        Command::Submit(args) => submit(&config, args).await,
        Command::Approve { job_id, token } => {
            let pipeline = Pipeline::open(&config)?;
            match pipeline.approval.approve(&job_id, &token).await? {
                ApprovalOutcome::Approved { message_id } => {
                    println!("Job {job_id} approved, dispatch {message_id} published");
                }
                ApprovalOutcome::AlreadyApproved { status } => {
                    println!("Job {job_id} was already approved ({status})");
                }
            }
            Ok(())
        }
        Command::Reject { job_id, token } => {
            let pipeline = Pipeline::open(&config)?;
            match pipeline.approval.reject(&job_id, &token).await? {
                RejectOutcome::Rejected => println!("Job {job_id} rejected"),
                RejectOutcome::AlreadyRejected => println!("Job {job_id} was already rejected"),
            }
            Ok(())
        }
        Command::Consume => {
            let pipeline = Pipeline::open(&config)?;
            let progress = Progress::start("Draining dispatch spool...");
            let report = pipeline.worker().drain(pipeline.subscription.as_ref()).await;
            match report {
                Ok(report) => {
                    progress.success(&format!("{} deliveries handled", report.outcomes.len()));
                    ui::print_drain(&report);
                    Ok(())
                }
                Err(e) => {
                    progress.failure("dispatch spool unavailable");
                    Err(e.into())
                }
            }
        }
        Command::Reconcile { job_id } => {
            let pipeline = Pipeline::open(&config)?;
            match pipeline.approval.republish(&job_id).await? {
                PublishReceipt::Published { message_id } => {
                    println!("Dispatch for {job_id} republished as {message_id}");
                }
                PublishReceipt::Deduplicated { message_id } => {
                    println!("Dispatch for {job_id} already accepted as {message_id}");
                }
            }
            Ok(())
        }
        Command::Status { job_id } => {
            let pipeline = Pipeline::open(&config)?;
            let job = pipeline.store.get(&job_id).await?;
            ui::print_job(&job);
            Ok(())
        }
        Command::Demo => run_demo(config).await,
    }
}

fn plan_from_args(args: &SubmitArgs) -> Result<TaskPlan> {
    if let Some(path) = &args.plan {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()));
    }
    let Some(goal) = &args.goal else {
        bail!("--goal or --plan is required");
    };
    let mut plan = TaskPlan::new(goal.as_str());
    if let Some(n) = args.captions {
        plan = plan.with_captions(n, args.style.as_str());
    }
    if let Some(prompt) = &args.image_prompt {
        plan = plan.with_image(prompt.as_str(), args.image_size.as_str());
    }
    if let Some(prompt) = &args.video_prompt {
        plan = plan.with_video(prompt.as_str(), args.duration);
    }
    if let Some(style) = brand_from_args(args)? {
        plan = plan.with_brand_style(style);
    }
    Ok(plan)
}

fn brand_from_args(args: &SubmitArgs) -> Result<Option<BrandStyle>> {
    if args.tone.is_none() && args.brand_colors.is_empty() && args.tagline.is_none() {
        return Ok(None);
    }
    let tone = match &args.tone {
        Some(tone) => serde_json::from_value::<BrandTone>(serde_json::Value::String(tone.to_lowercase()))
            .with_context(|| format!("unknown brand tone {tone:?}"))?,
        None => BrandTone::default(),
    };
    let mut style = BrandStyle::new(tone);
    for (i, color) in args.brand_colors.iter().enumerate() {
        let Some((hex, name)) = color.split_once('=') else {
            bail!("--brand-color must look like HEX=Name, got {color:?}");
        };
        let usage = if i == 0 { ColorUsage::Primary } else { ColorUsage::General };
        style = style.with_color(hex.trim().trim_start_matches('#'), name.trim(), usage);
    }
    if let Some(tagline) = &args.tagline {
        style = style.with_tagline(tagline.as_str());
    }
    Ok(Some(style))
}

fn reference_content_type(path: &std::path::Path) -> Result<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        _ => bail!("reference image must be a .png or .jpg file: {}", path.display()),
    }
}

async fn submit(config: &PipelineConfig, args: SubmitArgs) -> Result<()> {
    let plan = plan_from_args(&args)?;
    plan.validate()?;
    let pipeline = Pipeline::open(config)?;
    let mut job = Job::new(&args.owner, plan);
    let id = job.id.clone();
    if let Some(path) = &args.reference_image {
        let content_type = reference_content_type(path)?;
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let stored = pipeline
            .objects
            .put_reference_image(&id, bytes, content_type)
            .await
            .context("storing reference image")?;
        job.task_plan.reference_image_url = Some(stored.url);
    }
    pipeline.store.create(job).await?;
    println!("{id}");
    Ok(())
}

/// Two jobs through the in-memory pipeline: one approved and generated, one rejected.
async fn run_demo(mut config: PipelineConfig) -> Result<()> {
    const OWNER: &str = "demo-owner";
    const TOKEN: &str = "demo-token";
    config.approvers.insert(OWNER.into(), TOKEN.into());
    if config.storage.public_base_url.is_empty() {
        config.storage.public_base_url = "mem://promogate-demo".into();
    }
    let (pipeline, channel) = Pipeline::in_memory(&config)?;

    let plan = TaskPlan::new("Launch of the autumn collection")
        .with_captions(3, "warm")
        .with_image("Flat lay of knitwear on oak, soft morning light", "1024x1024")
        .with_video("Slow pan across the collection", 15)
        .with_brand_style(
            BrandStyle::new(BrandTone::Casual)
                .with_color("8B5E3C", "Walnut", ColorUsage::Primary)
                .with_color("F2E8DC", "Oat", ColorUsage::Background)
                .with_tagline("Made for slow mornings"),
        );
    plan.validate()?;

    let approved = Job::new(OWNER, plan.clone());
    let rejected = Job::new(OWNER, plan);
    let (approved_id, rejected_id) = (approved.id.clone(), rejected.id.clone());
    pipeline.store.create(approved).await?;
    pipeline.store.create(rejected).await?;

    let progress = Progress::start("Approving job...");
    pipeline.approval.approve(&approved_id, TOKEN).await?;
    pipeline.approval.reject(&rejected_id, TOKEN).await?;
    progress.success("one job approved, one rejected");

    let progress = Progress::start("Generating assets...");
    let worker = pipeline.worker();
    let report = worker.drain(channel.as_ref()).await?;
    progress.success(&format!("{} deliveries handled", report.outcomes.len()));

    // At-least-once delivery: the replay must be a no-op.
    channel.replay_all();
    let replay = worker.drain(channel.as_ref()).await?;
    ui::print_drain(&report);
    ui::print_drain(&replay);

    ui::print_job(&pipeline.store.get(&approved_id).await?);
    ui::print_job(&pipeline.store.get(&rejected_id).await?);

    Ok(())
}
