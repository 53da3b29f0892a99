//! Binary entrypoint for photo-render.
//!
//! Plays a scripted edit session against an image and writes the rendered
//! result. The main task owns the control loop; the scripted editor runs as a
//! separate task, the way an interactive editor would on its own schedule.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use photo_render::tasks::loader::{load_source, save_output};
use photo_render::{
    BackendPreference, ControlLoop, EditScript, EditSession, InvalidStateError, OutputSize,
    RenderConfig, Renderer,
};
use tokio::runtime::Handle;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::spawn_blocking;
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Parser)]
#[command(name = "photo-render", about = "Replay recorded photo edits onto an image")]
struct Cli {
    /// Path to YAML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Source image
    #[arg(short, long, value_name = "FILE")]
    input: PathBuf,

    /// YAML edit script to replay
    #[arg(short, long, value_name = "FILE")]
    edits: PathBuf,

    /// Where to write the rendered image
    #[arg(short, long, value_name = "FILE")]
    output: PathBuf,

    /// Exact output size
    #[arg(long, value_name = "WxH", conflicts_with = "max_size")]
    size: Option<OutputSize>,

    /// Scale the output down to fit within this box
    #[arg(long, value_name = "WxH")]
    max_size: Option<OutputSize>,

    /// Never use the GPU
    #[arg(long)]
    cpu: bool,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("photo_render={level}").parse()?)
        .add_directive("wgpu=warn".parse()?)
        .add_directive("naga=warn".parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let mut config = match &cli.config {
        Some(path) => RenderConfig::from_yaml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RenderConfig::default(),
    }
    .validated()
    .context("validating configuration")?;
    if cli.cpu {
        config.backend = BackendPreference::Cpu;
    }

    let script = EditScript::from_yaml_file(&cli.edits)?;
    let input = cli.input.clone();
    let image = spawn_blocking(move || load_source(&input))
        .await?
        .with_context(|| format!("loading {}", cli.input.display()))?;
    info!(
        width = image.width(),
        height = image.height(),
        actions = script.actions.len(),
        "loaded source"
    );

    let (mut control, handle) = ControlLoop::new();
    let runtime = Handle::current();
    let renderer = spawn_blocking(move || Renderer::from_config(&config, runtime, handle)).await?;

    let session = EditSession::new();
    let mut context = match cli.max_size {
        Some(max) => session.create_context_with_max_size(&renderer, image, max),
        None => session.create_context(&renderer, image, cli.size),
    };
    let (done_tx, mut done_rx) = oneshot::channel();
    context.render(move |result| {
        let _ = done_tx.send(result);
    });

    let editor = {
        let session = session.clone();
        tokio::spawn(async move {
            for action in script.actions {
                session.append_action(action)?;
                tokio::task::yield_now().await;
            }
            session.close()
        })
    };

    let result = loop {
        select! {
            result = &mut done_rx => break result.context("render completion dropped")?,
            _ = tokio::signal::ctrl_c(), if !context.is_canceled() => {
                warn!("interrupt received; canceling render");
                context.cancel_rendering();
            }
            alive = control.turn() => {
                if !alive {
                    bail!("control loop closed before the render completed");
                }
            }
        }
    };
    let edited: Result<(), InvalidStateError> = editor.await?;
    edited.context("replaying edit script")?;

    let stats = renderer.engine().stats();
    info!(
        backend = %context.backend(),
        renders = stats.renders,
        gpu_fallbacks = stats.gpu_fallbacks,
        "render complete"
    );
    match result {
        Some(image) => {
            let output = cli.output.clone();
            spawn_blocking(move || save_output(&image, &output))
                .await?
                .with_context(|| format!("writing {}", cli.output.display()))?;
            info!(path = %cli.output.display(), "wrote render");
        }
        None if context.is_canceled() => warn!("render canceled; nothing written"),
        None if !context.is_modified() => info!("no edits recorded; nothing written"),
        None => bail!("render failed"),
    }
    Ok(())
}
