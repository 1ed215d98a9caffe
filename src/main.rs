use anyhow::{bail, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scanarchiver::{
    config::Config,
    context_memory::{default_embedder, ContextMemory},
    ingestion::{BatchOptions, BatchProcessor},
    metadata_extraction::{GenerativeStage, MetadataExtractor},
    models::{MetadataField, OCR_NOT_PROCESSED},
    ocr::{self, health::OcrHealthChecker, language::AUTO_LANGUAGE, OcrWorkerPool, ProgressAggregator},
    services::counter_service::CounterStore,
};

fn cli() -> Command {
    Command::new("scanarchiver")
        .about("OCR, classify and archive scanned PDF documents")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("ocr")
                .about("Recognize text in PDF files and print it")
                .arg(
                    Arg::new("files")
                        .help("PDF files to recognize")
                        .required(true)
                        .num_args(1..)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("language")
                        .help("Tesseract language code, or 'auto'")
                        .long("language")
                        .short('l')
                        .value_name("LANG"),
                ),
        )
        .subcommand(
            Command::new("archive")
                .about("Run the full pipeline over a directory of PDF files")
                .arg(
                    Arg::new("input_dir")
                        .help("Directory containing the scans")
                        .required(true)
                        .index(1)
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .help("Archive directory (defaults to a subdirectory of the input)")
                        .long("output")
                        .short('o')
                        .value_name("DIR")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("mode")
                        .help("Work mode; each mode keeps its own counter")
                        .long("mode")
                        .short('m')
                        .default_value("KP"),
                )
                .arg(
                    Arg::new("signature")
                        .help("Case signature applied to every document")
                        .long("signature")
                        .short('s')
                        .default_value(""),
                )
                .arg(
                    Arg::new("llm")
                        .help("Use the local Ollama model as an extra extraction stage")
                        .long("llm")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(Command::new("doctor").about("Report OCR tool versions and installed languages"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,scanarchiver=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let matches = cli().get_matches();
    let config = Config::from_env()?;

    match matches.subcommand() {
        Some(("ocr", args)) => run_ocr(&config, args).await,
        Some(("archive", args)) => run_archive(&config, args).await,
        Some(("doctor", _)) => run_doctor(&config),
        _ => unreachable!("clap requires a subcommand"),
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing files already in progress");
            token.cancel();
        }
    });
    cancel
}

/// Prints page progress on stderr until the aggregator closes.
fn report_progress(aggregator: &ProgressAggregator) -> JoinHandle<()> {
    let mut updates = aggregator.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let snapshot = *updates.borrow();
            eprint!(
                "\rOCR: {}/{} pages ({:.0}%)",
                snapshot.pages_done,
                snapshot.total_pages,
                snapshot.fraction() * 100.0
            );
        }
        eprintln!();
    })
}

async fn run_ocr(config: &Config, args: &ArgMatches) -> Result<()> {
    let files: Vec<PathBuf> = args.get_many::<PathBuf>("files").into_iter().flatten().cloned().collect();

    let mut settings = config.ocr_settings();
    if let Some(language) = args.get_one::<String>("language") {
        settings.language = language.clone();
    }

    let pool = OcrWorkerPool::new(ocr::default_engine(config), settings);
    let cancel = cancel_on_ctrl_c();
    let (sink, aggregator) = ProgressAggregator::channel();
    let reporter = report_progress(&aggregator);

    let outcome = pool.extract(&files, &cancel, Some(sink)).await;
    let snapshot = aggregator.finish().await;
    let _ = reporter.await;

    for (path, result) in files.iter().zip(&outcome.results) {
        match result {
            Some(result) => {
                println!("== {} [{}]", path.display(), result.status);
                println!("{}", result.text);
            }
            None => println!("== {} [not processed]", path.display()),
        }
    }
    println!(
        "Total pages: {} ({} recognized)",
        outcome.total_pages, snapshot.pages_done
    );
    Ok(())
}

async fn build_generative_stage(config: &Config, memory: &ContextMemory) -> Option<GenerativeStage> {
    let stage = match GenerativeStage::from_config(config, memory.clone()).await {
        Ok(stage) => stage,
        Err(e) => {
            warn!("Generative stage disabled: {}", e);
            return None;
        }
    };
    if !stage.is_available().await {
        warn!("Ollama is not reachable at {}, continuing without it", config.llm_endpoint);
        return None;
    }
    info!("Generative stage enabled with model {}", config.llm_model);
    Some(stage)
}

async fn run_archive(config: &Config, args: &ArgMatches) -> Result<()> {
    let Some(input_dir) = args.get_one::<PathBuf>("input_dir") else {
        bail!("input directory is required");
    };
    if !input_dir.is_dir() {
        bail!("Directory {} does not exist", input_dir.display());
    }

    let options = BatchOptions {
        output_dir: args.get_one::<PathBuf>("output").cloned(),
        mode: args.get_one::<String>("mode").cloned().unwrap_or_default(),
        case_signature: args.get_one::<String>("signature").cloned().unwrap_or_default(),
    };

    let memory = ContextMemory::load(&config.context_memory_file)
        .await
        .with_embedder(default_embedder(config));
    let counters = CounterStore::load(&config.counters_file).await;
    let extractor = MetadataExtractor::from_config(config, memory.clone());
    if !extractor.has_entity_extractor() {
        warn!("ENTITY_MODEL_PATH is not set or failed to load; results will be marked degraded");
    }

    let generative = if args.get_flag("llm") || config.llm_enabled {
        build_generative_stage(config, &memory).await
    } else {
        None
    };

    let processor = BatchProcessor::new(ocr::default_engine(config), extractor, counters, config);
    let cancel = cancel_on_ctrl_c();
    let (sink, aggregator) = ProgressAggregator::channel();
    let reporter = report_progress(&aggregator);

    let rows = processor
        .process_batch(input_dir, &options, generative.as_ref(), &cancel, Some(sink))
        .await;
    aggregator.finish().await;
    let _ = reporter.await;
    let rows = rows?;

    processor.counters().save(&config.counters_file).await?;

    for row in &rows {
        let missing: Vec<&str> = row.metadata.colors.keys().map(MetadataField::as_str).collect();
        println!(
            "{:>4}  {} -> {}  [{}]{}",
            row.sequence_number,
            row.original_name,
            row.new_name,
            row.metadata.status,
            if missing.is_empty() {
                String::new()
            } else {
                format!(" missing: {}", missing.join(", "))
            }
        );
        if row.ocr_status == OCR_NOT_PROCESSED {
            println!("      not processed, batch was cancelled");
        } else if !row.archived {
            println!("      not copied, see log");
        }
    }
    print_summary(&rows, input_dir);
    Ok(())
}

fn print_summary(rows: &[scanarchiver::models::BatchRow], input_dir: &Path) {
    let review = rows.iter().filter(|row| row.metadata.needs_review()).count();
    println!(
        "{} documents from {}, {} need review",
        rows.len(),
        input_dir.display(),
        review
    );
}

fn run_doctor(config: &Config) -> Result<()> {
    let checker = OcrHealthChecker::new(config.tesseract_folder.clone(), config.poppler_folder.clone());
    println!("{}", checker.diagnostics());

    if config.ocr_language != AUTO_LANGUAGE {
        match checker.validate_language_combination(&config.ocr_language) {
            Ok(()) => println!("Configured language '{}' is installed", config.ocr_language),
            Err(e) => println!("Configured language problem: {} ({})", e, e.error_code()),
        }
    }
    Ok(())
}
