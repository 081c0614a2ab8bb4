use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use gametext_translator::models::hosted::{HostedChatModel, HostedModelConfig};
use gametext_translator::pipeline::{
    init_default_config, ConfigOverrides, PipelineConfig, TranslatorPipeline,
};
use gametext_translator::progress::ConsoleProgress;
use gametext_translator::records::{load_game_intro, load_records, read_api_key, save_records};
use gametext_translator::tokenizer::{BpeTokenizer, ByteEstimateTokenizer, Tokenizer};

#[derive(Parser, Debug)]
#[command(name = "gametext-translator")]
#[command(about = "Chunked game-text translator (hosted chat model + optional alignment service)", long_about = None)]
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

    /// Input JSON array of records
    #[arg(value_name = "JSON")]
    input: Option<PathBuf>,

    /// Output JSON (default: <input_stem>_translated.json)
    #[arg(short, long, value_name = "JSON")]
    output: Option<PathBuf>,

    /// Plain-text game introduction included in every prompt
    #[arg(long, value_name = "FILE")]
    game_intro: Option<PathBuf>,

    /// File holding the API key (default: OPENAI_API_KEY)
    #[arg(long, value_name = "FILE")]
    api_key: Option<PathBuf>,

    /// Config file path (default: search for gametext-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Chat model name (e.g. gpt-4o-mini)
    #[arg(long)]
    model: Option<String>,

    /// Target language rendered into the prompts
    #[arg(long)]
    target_lang: Option<String>,

    /// Token budget per chunk
    #[arg(long)]
    max_input_tokens: Option<usize>,

    /// Alignment service address (host:port)
    #[arg(long, value_name = "ADDR")]
    align_addr: Option<String>,

    /// Skip the alignment service
    #[arg(long)]
    no_align: bool,

    /// Attempts per chunk in auto retry mode
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Ask before retrying a failed chunk
    #[arg(long, conflicts_with = "auto_retry")]
    interactive: bool,

    /// Retry failed chunks without asking
    #[arg(long)]
    auto_retry: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(true);

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
                "\n\nUSAGE:\n  gametext-translator <input.json> [-o output.json] [--game-intro intro.txt]\n\nTIPS:\n  - Default config search: gametext-translator.toml (upwards), or set GAMETEXT_TRANSLATOR_CONFIG.\n  - The API key comes from --api-key, [model].api_key_file, or OPENAI_API_KEY.\n"
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
            input.with_file_name(format!("{stem}_translated.json"))
        }
    };

    let interactive = match (args.interactive, args.auto_retry) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let cfg = PipelineConfig::from_paths_and_args(
        &input,
        &output,
        ConfigOverrides {
            config: args.config,
            api_key: args.api_key,
            model: args.model,
            target_lang: args.target_lang,
            max_input_tokens: args.max_input_tokens,
            align_addr: args.align_addr,
            no_align: args.no_align,
            max_attempts: args.max_attempts,
            interactive,
        },
    )
    .context("build config")?;
    match cfg.config_path.as_deref() {
        Some(p) => progress.info(format!("Config: {}", p.display())),
        None => progress.info("Config: built-in defaults"),
    }

    let api_key = read_api_key(cfg.model.api_key_file.as_deref())?;
    let model = HostedChatModel::new(HostedModelConfig {
        name: cfg.model.name.clone(),
        base_url: cfg.model.base_url.clone(),
        api_key,
        request_timeout: cfg.model.request_timeout,
    })?;

    let tokenizer: Box<dyn Tokenizer> = match BpeTokenizer::cl100k() {
        Ok(t) => Box::new(t),
        Err(err) => {
            progress.warn(format!("{err:#}; estimating tokens from byte length"));
            Box::new(ByteEstimateTokenizer)
        }
    };

    let game_intro = match args.game_intro.as_deref() {
        Some(p) => load_game_intro(p)?,
        None => None,
    };

    progress.info(format!("Read records: {}", input.display()));
    let records = load_records(&input)?;

    let mut pipeline =
        TranslatorPipeline::new(&cfg, Box::new(model), tokenizer, game_intro, progress)?;
    if let Err(err) = pipeline.run(records) {
        progress.warn(format!(
            "stopped after {} record(s); nothing written",
            pipeline.output().len()
        ));
        return Err(err.into());
    }

    let translated = pipeline.into_output();
    save_records(&output, &translated)?;
    progress.info(format!(
        "Wrote {} record(s): {}",
        translated.len(),
        output.display()
    ));
    Ok(())
}
