use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Parser;
use harmony_beam::{DecodeInput, DecodeOutcome, DecoderConfig, HarmonyDecoder, HarmonyDecoderBuilder};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[path = "harmony_decode/labels_writer.rs"]
mod labels_writer;

use labels_writer::{write_labels, LabelsFile, LabelsMeta};

#[derive(Debug, Parser)]
#[command(name = "harmony_decode")]
#[command(about = "Segment pieces into chord and key spans by beam search")]
struct Args {
    /// Input JSON files (onsets, end_time, change_probs, chord/key posteriors).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Decoder config JSON; missing fields take defaults.
    #[arg(long, env = "HARMONY_DECODE_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "HARMONY_DECODE_OUT", default_value = "labels")]
    out: PathBuf,
    #[arg(long, env = "HARMONY_DECODE_BEAM_SIZE")]
    beam_size: Option<usize>,
    /// 0 disables signature deduplication.
    #[arg(long, env = "HARMONY_DECODE_SIGNATURE_LENGTH")]
    signature_length: Option<usize>,
    /// Decode chords only.
    #[arg(long, default_value_t = false)]
    no_keys: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        tracing::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    let mut builder = HarmonyDecoderBuilder::new(config.clone());
    if args.no_keys {
        builder = builder.without_keys();
    }
    let decoder = builder.build().map_err(|err| err.to_string())?;

    let progress = ProgressBar::new(args.inputs.len() as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );

    let out_paths = output_paths(&args.out, &args.inputs)?;
    let mut unsolved = 0usize;
    for (input_path, out_path) in args.inputs.iter().zip(&out_paths) {
        progress.set_message(input_path.display().to_string());
        let outcome = decode_file(&decoder, input_path)?;
        if !matches!(outcome, DecodeOutcome::Solved(_)) {
            unsolved += 1;
        }

        let labels = LabelsFile {
            meta: LabelsMeta {
                source: input_path.display().to_string(),
                generated_at: Utc::now().to_rfc3339(),
                config: &config,
            },
            outcome: &outcome,
        };
        write_labels(out_path, &labels)?;
        progress.inc(1);
    }
    progress.finish_with_message("done");

    tracing::info!(
        inputs = args.inputs.len(),
        unsolved,
        out = %args.out.display(),
        "harmony_decode: finished"
    );
    Ok(())
}

fn resolve_config(args: &Args) -> Result<DecoderConfig, String> {
    let mut config = match &args.config {
        Some(path) => DecoderConfig::load(path).map_err(|err| err.to_string())?,
        None => DecoderConfig::default(),
    };
    if let Some(beam_size) = args.beam_size {
        config.beam_size = beam_size;
    }
    match args.signature_length {
        Some(0) => config.signature_length = None,
        Some(length) => config.signature_length = Some(length),
        None => {}
    }
    Ok(config)
}

fn decode_file(decoder: &HarmonyDecoder, path: &Path) -> Result<DecodeOutcome, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read input '{}': {err}", path.display()))?;
    let input: DecodeInput = serde_json::from_str(&data)
        .map_err(|err| format!("Failed to parse input '{}': {err}", path.display()))?;
    decoder
        .decode(&input)
        .map_err(|err| format!("Failed to decode '{}': {err}", path.display()))
}

/// One `<stem>.labels.json` per input; inputs sharing a stem are rejected.
fn output_paths(out: &Path, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, String> {
    let mut claimed: HashMap<PathBuf, &Path> = HashMap::new();
    let mut paths = Vec::with_capacity(inputs.len());
    for input in inputs {
        let path = out.join(format!("{}.labels.json", file_stem(input)));
        if let Some(previous) = claimed.insert(path.clone(), input) {
            return Err(format!(
                "Inputs '{}' and '{}' would both write '{}'",
                previous.display(),
                input.display(),
                path.display()
            ));
        }
        paths.push(path);
    }
    Ok(paths)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}
