//! The `lumen show` command: run one URL through the pipeline and save it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, ValueEnum};
use lumen_core::types::format_to_string;
use lumen_core::{
    Config, EffectKind, ImageBuffer, ImagePresenter, PipelineRequest, ScreenState, TaskOutcome,
    UiContext,
};
use serde::Serialize;

/// Arguments for the `show` command.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Image URL (http, https or file)
    #[arg(required = true)]
    pub url: String,

    /// Where to write the filtered image; the extension picks the format
    #[arg(short, long, default_value = "lumen-output.png")]
    pub output: String,

    /// Effect to apply (defaults to the configured one)
    #[arg(short, long, value_enum)]
    pub effect: Option<Effect>,

    /// Pixelate block edge in pixels
    #[arg(long)]
    pub block_size: Option<u32>,

    /// Sepia blend factor, 0.0 to 1.0
    #[arg(long)]
    pub intensity: Option<f32>,

    /// Print a JSON summary instead of a sentence
    #[arg(long)]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Effect {
    Pixelate,
    Grayscale,
    Sepia,
    Invert,
}

impl From<Effect> for EffectKind {
    fn from(effect: Effect) -> Self {
        match effect {
            Effect::Pixelate => EffectKind::Pixelate,
            Effect::Grayscale => EffectKind::Grayscale,
            Effect::Sepia => EffectKind::Sepia,
            Effect::Invert => EffectKind::Invert,
        }
    }
}

#[derive(Debug, Serialize)]
struct ShowSummary {
    url: String,
    width: u32,
    height: u32,
    effect: String,
    format: Option<String>,
    source_hash: Option<String>,
    elapsed_ms: u64,
    output: String,
}

pub async fn execute(mut config: Config, args: ShowArgs) -> anyhow::Result<()> {
    apply_overrides(&mut config, &args)?;
    let output = PathBuf::from(shellexpand::tilde(&args.output).as_ref());

    let (ui, _ui_loop) = UiContext::spawn();
    let view = Arc::new(ScreenState::new());
    let mut presenter = ImagePresenter::new(&config, view.clone(), ui.clone())?;
    let effect = presenter.pipeline().filter_stage().effect_name();

    let start = Instant::now();
    let run = presenter.show(PipelineRequest::new(args.url.as_str())).await;
    let outcome = tokio::select! {
        outcome = run.join() => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, cancelling {}", args.url);
            presenter.teardown().await;
            anyhow::bail!("Interrupted");
        }
    };
    ui.flush().await;
    presenter.teardown().await;
    let elapsed = start.elapsed();

    match outcome {
        TaskOutcome::Completed(()) => {}
        TaskOutcome::Failed(failure) => {
            tracing::debug!("{} failure: {}", failure.cause, failure.message);
            let message = view
                .snapshot()
                .error
                .unwrap_or_else(|| failure.message.clone());
            anyhow::bail!("{message}");
        }
        TaskOutcome::Cancelled => anyhow::bail!("Run for {} was cancelled", args.url),
    }

    let image = view
        .take_image()
        .context("Run completed without publishing an image")?;
    let summary = summarize(&args.url, &image, effect, elapsed.as_millis() as u64, &output);

    let path = output.clone();
    tokio::task::spawn_blocking(move || image.into_rgba().save(&path))
        .await?
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Applied {} to {}x{} image in {}ms -> {}",
            summary.effect, summary.width, summary.height, summary.elapsed_ms, summary.output
        );
    }

    Ok(())
}

/// Fold command-line flags into the loaded configuration.
fn apply_overrides(config: &mut Config, args: &ShowArgs) -> anyhow::Result<()> {
    if let Some(effect) = args.effect {
        config.filter.effect = effect.into();
    }
    if let Some(block_size) = args.block_size {
        config.filter.block_size = block_size;
    }
    if let Some(intensity) = args.intensity {
        config.filter.intensity = intensity;
    }
    config.validate()?;
    Ok(())
}

fn summarize(
    url: &str,
    image: &ImageBuffer,
    effect: &str,
    elapsed_ms: u64,
    output: &std::path::Path,
) -> ShowSummary {
    ShowSummary {
        url: url.to_string(),
        width: image.width(),
        height: image.height(),
        effect: effect.to_string(),
        format: image.format().map(format_to_string),
        source_hash: image.source_hash().map(str::to_string),
        elapsed_ms,
        output: output.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: ShowArgs,
    }

    fn parse(argv: &[&str]) -> ShowArgs {
        TestCli::parse_from(std::iter::once("lumen").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["https://example.com/a.png"]);
        assert_eq!(args.output, "lumen-output.png");
        assert!(args.effect.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_overrides_reach_filter_config() {
        let args = parse(&[
            "file:///tmp/a.png",
            "--effect",
            "sepia",
            "--intensity",
            "0.25",
            "--block-size",
            "3",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &args).unwrap();

        assert_eq!(config.filter.effect, EffectKind::Sepia);
        assert_eq!(config.filter.block_size, 3);
        assert!((config.filter.intensity - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_out_of_range_override_rejected() {
        let args = parse(&["file:///tmp/a.png", "--intensity", "4.0"]);
        let mut config = Config::default();
        assert!(apply_overrides(&mut config, &args).is_err());
    }
}
