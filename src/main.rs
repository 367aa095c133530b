use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process;

use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use storefront_reconciler::core::{
    fix_document_from_data, format_output_path, print_error_message, print_info_message,
    FixOptions,
};
use storefront_reconciler::env::{self as reconciler_env, EnvVar};
use storefront_reconciler::reconcile::{EngineConfig, ReconcileResult, ScanResult, SettlementMode};

#[derive(Parser, Debug)]
#[command(name = "storefront-reconciler")]
#[command(
    about = "Rewrite review widget counters in a saved storefront page into their canonical form",
    version
)]
struct Cli {
    /// HTML file to process, or "-" for stdin
    #[arg(required_unless_present_any = ["init_config", "env_docs"])]
    input: Option<String>,

    /// Output path (supports %title% and %timestamp%); stdout when omitted
    #[arg(short, long)]
    output: Option<String>,

    /// Configuration file (TOML or JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Comma-separated locale tags to activate
    #[arg(short, long, value_delimiter = ',')]
    locale: Vec<String>,

    /// Output charset
    #[arg(short = 'E', long)]
    encoding: Option<String>,

    /// Input charset, overrides the charset declared by the document
    #[arg(long)]
    input_encoding: Option<String>,

    /// Hide the original text and append an overlay instead of replacing it
    #[arg(long)]
    overlay: bool,

    /// Maximum number of passes on the static document
    #[arg(long, default_value_t = 4)]
    max_passes: usize,

    /// Print the scan summary as JSON instead of writing the document
    #[arg(long)]
    report: bool,

    /// Suppress log output
    #[arg(short, long)]
    silent: bool,

    /// Write an example configuration file and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<String>,

    /// Print the supported environment variables and exit
    #[arg(long)]
    env_docs: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    input: &'a str,
    title: Option<&'a str>,
    encoding: &'a str,
    passes: usize,
    matched: usize,
    #[serde(flatten)]
    result: &'a ScanResult,
}

fn load_dotenv() {
    for env_file in [".env.local", ".env"] {
        if Path::new(env_file).exists() {
            match dotenv::from_filename(env_file) {
                Ok(_) => {
                    tracing::debug!("已加载环境变量文件: {}", env_file);
                    break;
                }
                Err(e) => {
                    tracing::warn!("无法加载环境变量文件 {}: {}", env_file, e);
                }
            }
        }
    }
}

fn init_tracing(silent: bool) {
    let level = reconciler_env::core::LogLevel::get().unwrap_or_else(|_| "info".to_string());
    let no_color = reconciler_env::core::NoColor::get().unwrap_or(false);

    let filter = if silent {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_new(format!("storefront_reconciler={level}"))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(!no_color)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn read_input(input: &str) -> ReconcileResult<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read(input)?)
    }
}

fn build_config(cli: &Cli) -> ReconcileResult<EngineConfig> {
    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if !cli.locale.is_empty() {
        config.locales.active = cli
            .locale
            .iter()
            .map(|tag| tag.trim().to_lowercase())
            .filter(|tag| !tag.is_empty())
            .collect();
    }
    if cli.overlay {
        config.settlement.mode = SettlementMode::Overlay;
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> ReconcileResult<()> {
    if let Some(path) = &cli.init_config {
        EngineConfig::generate_example_config(path)?;
        print_info_message(&format!("已生成示例配置: {}", path));
        return Ok(());
    }

    if cli.env_docs {
        print_info_message(&reconciler_env::generate_env_docs());
        return Ok(());
    }

    let Some(input) = cli.input.as_deref() else {
        return Ok(());
    };

    let config = build_config(&cli)?;
    let options = FixOptions {
        input_encoding: cli.input_encoding.clone(),
        output_encoding: cli.encoding.clone(),
        max_passes: cli.max_passes,
    };

    let data = read_input(input)?;
    let fixed = fix_document_from_data(&config, &data, &options)?;

    if cli.report {
        let report = Report {
            input,
            title: fixed.title.as_deref(),
            encoding: &fixed.encoding,
            passes: fixed.passes,
            matched: fixed.result.matched(),
            result: &fixed.result,
        };
        let json = serde_json::to_string_pretty(&report)?;
        print_info_message(&json);
        return Ok(());
    }

    match cli.output.as_deref() {
        Some(path) if path != "-" => {
            let destination = format_output_path(path, fixed.title.as_deref());
            fs::write(&destination, &fixed.data)?;
            tracing::info!("已写入 {} ({} 个节点落定)", destination, fixed.result.newly_settled);
        }
        _ => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&fixed.data)?;
            stdout.flush()?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    load_dotenv();
    init_tracing(cli.silent);

    if let Err(e) = run(cli) {
        print_error_message(&format!("Error: {}", e));
        process::exit(1);
    }
}
