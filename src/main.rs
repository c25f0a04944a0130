use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use page_translator::pipeline::{
    decode_html_bytes, init_default_config, ConfigOverrides, PipelineConfig, TranslatorPipeline,
};
use page_translator::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "page-translator")]
#[command(about = "Translate HTML pages with LLM providers while preserving inline markup", long_about = None)]
struct Args {
    /// Generate default config + prompt files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/prompt files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/prompt files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Input .html file
    #[arg(value_name = "HTML")]
    input: Option<PathBuf>,

    /// Output .html (default: <input_stem>.translated.html)
    #[arg(short, long, value_name = "HTML")]
    output: Option<PathBuf>,

    /// Target language (e.g. German, ja, "Brazilian Portuguese")
    #[arg(long)]
    target_lang: Option<String>,

    /// Config file path (default: search for page-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page URL used to resolve relative links
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// API key (overrides config and PAGE_TRANSLATOR_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Model name (overrides config)
    #[arg(long)]
    model: Option<String>,

    /// Print extracted units and the batch plan as JSON; no provider calls
    #[arg(long)]
    dump_units: bool,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    let input = match args.input {
        Some(p) => p,
        None => {
            let mut cmd = Args::command();
            cmd.print_help().context("print help")?;
            eprintln!(
                "\n\nUSAGE:\n  page-translator <input.html> [-o output.html] [--target-lang German]\n\nTIPS:\n  - Default config search: page-translator.toml (upwards), or set PAGE_TRANSLATOR_CONFIG.\n  - Run with --init-config to write a starter config.\n"
            );
            return Ok(());
        }
    };
    let output = match args.output {
        Some(p) => p,
        None => {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("output")
                .to_string();
            input.with_file_name(format!("{stem}.translated.html"))
        }
    };

    let overrides = ConfigOverrides {
        config_path: args.config,
        target_language: args.target_lang,
        base_url: args.base_url,
        api_key: args.api_key,
        model_name: args.model,
    };
    let cfg = PipelineConfig::from_paths_and_args(&input, &overrides).context("build config")?;
    progress.info(format!(
        "Config: {} (provider={}, model={}, target={})",
        cfg.config_path.display(),
        cfg.provider.api_type,
        cfg.provider.model_name,
        cfg.target_language
    ));

    let pipeline = TranslatorPipeline::new(cfg, progress);

    if args.dump_units {
        let bytes = std::fs::read(&input).with_context(|| format!("read input: {}", input.display()))?;
        let plan = pipeline.dump_units(&decode_html_bytes(&bytes))?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let summary = pipeline.translate_file(&input, &output)?;
    if let Some(err) = summary.error {
        return Err(anyhow::anyhow!(err));
    }
    Ok(())
}
