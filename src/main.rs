//! DupSweep - duplicate and near-duplicate media finder
//!
//! CLI driver for the scan engine: wires config into the orchestrator,
//! renders the progress stream, and exposes the validated delete flow.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dupsweep::cli::{CacheArgs, Cli, Commands, DeleteArgs, KeepArg, ReportFormat, ScanArgs};
use dupsweep::KeepStrategy;
use dupsweep::{
    cache, DeleteMode, DeleteService, SafeDeleteValidator, ScanConfig, ScanOrchestrator, ScanPhase,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::from_default_env().add_directive("dupsweep=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan(args) => run_scan(args).await,
        Commands::Delete(args) => run_delete(args).await,
        Commands::Cache(args) => run_cache(args),
    }
}

fn config_from_args(args: &ScanArgs) -> Result<ScanConfig> {
    let mut config = match &args.profile {
        Some(path) => ScanConfig::load_from(path)?,
        None => ScanConfig::default(),
    };

    config.roots = args.roots.clone();
    config.scan_all_files |= args.all_files;
    config.include_hidden |= args.include_hidden;
    config.recursive = !args.no_recurse;
    config.min_size = args.min_size;
    config.max_size = args.max_size;
    config.parallel_threads = args.workers;
    config.adaptive_throttling |= args.throttle;
    config.keep_strategy = match args.keep {
        KeepArg::Newest => KeepStrategy::Newest,
        KeepArg::Oldest => KeepStrategy::Oldest,
        KeepArg::Resolution => KeepStrategy::HighestResolution,
        KeepArg::Cleanest => KeepStrategy::CleanestName,
    };

    if args.images {
        config.use_image_similarity = true;
        config.image_similarity_threshold = args.threshold;
    }
    if args.videos {
        config.use_video_similarity = true;
        config.video_similarity_threshold = args.threshold;
    }
    if args.audio {
        config.use_audio_similarity = true;
        config.audio_similarity_threshold = args.threshold;
    }

    Ok(config)
}

async fn run_scan(args: ScanArgs) -> Result<()> {
    let config = config_from_args(&args)?;
    let json_output = matches!(args.report, ReportFormat::Json);

    let orchestrator = Arc::new(ScanOrchestrator::with_default_caches()?);
    let progress_rx = orchestrator.subscribe();

    let pb = if !json_output {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        Some(pb)
    } else {
        None
    };

    // Render progress off the SPSC stream while the scan runs.
    let render = {
        let pb = pb.clone();
        std::thread::spawn(move || {
            for progress in progress_rx {
                if let Some(ref pb) = pb {
                    pb.set_message(format!(
                        "{}: {}/{} files, {} groups, {} reclaimable",
                        progress.phase,
                        progress.processed_files,
                        progress.total_files,
                        progress.duplicate_groups,
                        humansize::format_size(progress.potential_savings, humansize::BINARY),
                    ));
                    pb.tick();
                }
                if progress.phase.is_terminal() {
                    break;
                }
            }
        })
    };

    // Ctrl-C cancels cooperatively; the engine lands in Cancelled.
    {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                orchestrator.cancel();
            }
        });
    }

    let result = dupsweep::scan_async(Arc::clone(&orchestrator), config).await?;
    let _ = render.join();
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    print!("{}", result.to_human_string());
    if result.phase == ScanPhase::Cancelled {
        println!("  {} scan cancelled; partial results above", "⚠".yellow());
    }
    if !result.groups.is_empty() {
        println!(
            "  {} run `dupsweep delete --dry-run <files>` to preview removal",
            "→".bright_cyan()
        );
    }
    Ok(())
}

async fn run_delete(args: DeleteArgs) -> Result<()> {
    let json_output = matches!(args.report, ReportFormat::Json);

    let mut options = dupsweep::SafeDeleteOptions::default();
    options.protected_folders.extend(args.protect.clone());
    let validator = Arc::new(SafeDeleteValidator::new(options)?);
    let service = DeleteService::new(Arc::clone(&validator));

    let mode = if args.dry_run {
        DeleteMode::DryRun
    } else if args.permanent {
        DeleteMode::Permanent
    } else {
        DeleteMode::Trash
    };

    // Surface the double-confirm gate before doing anything destructive.
    if mode != DeleteMode::DryRun && !args.yes {
        let report = validator.validate_batch(&args.files);
        if report.needs_confirmation {
            println!("{} this batch needs confirmation:", "⚠".yellow().bold());
            for reason in &report.confirmation_reasons {
                println!("  - {}", reason);
            }
            println!("re-run with --yes to proceed, or --dry-run to preview");
            return Ok(());
        }
    }

    let controls = dupsweep::ScanControls::new();
    let result = service.execute(&args.files, mode, &controls, |progress| {
        tracing::info!(
            "{}/{} {}",
            progress.processed,
            progress.total,
            progress.current_path
        );
    });

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("\n{}", "═".repeat(50).bright_cyan());
    println!(
        "  {} {} deleted, {} failed, {} skipped",
        "✓".bright_green().bold(),
        result.success_count,
        result.failed_count,
        result.skipped_count,
    );
    println!(
        "  freed: {}",
        humansize::format_size(result.freed_bytes, humansize::BINARY)
    );
    for skipped in &result.skipped {
        println!(
            "  {} skipped {} ({:?})",
            "•".yellow(),
            skipped.path.display(),
            skipped.reason
        );
    }
    for failed in &result.failed {
        println!(
            "  {} failed {} ({})",
            "✗".red(),
            failed.path.display(),
            failed.error
        );
    }
    println!("{}", "═".repeat(50).bright_cyan());
    if result.needed_confirmation {
        println!("  (batch exceeded a double-confirm threshold)");
    }
    Ok(())
}

fn run_cache(args: CacheArgs) -> Result<()> {
    let hashes = cache::HashCache::open_default()?;
    let thumbs = cache::ThumbnailCache::open_default()?;

    if args.clear {
        hashes.clear();
        thumbs.clear();
        println!("caches cleared");
        return Ok(());
    }

    let stats = hashes.stats();
    println!("cache dir: {}", cache::default_cache_dir().display());
    println!("  quick hashes: {}", stats.quick_records);
    println!("  full hashes:  {}", stats.full_records);
    println!("  thumbnails:   {}", thumbs.len());
    Ok(())
}
