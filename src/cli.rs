//! CLI glue: command parsing, argument exposure and orchestration.
//!
//! All business logic lives in the pipeline modules ([`crate::sync`],
//! [`crate::cartridge`], [`crate::import_course`]); this module routes
//! subcommands to them and reports outcomes. The async [`run`] entrypoint
//! is extracted from `main` so integration tests can invoke it with a
//! constructed [`Cli`].

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use crate::cartridge::export::{export_cartridge, ExportOptions};
use crate::cartridge::import::import_cartridge;
use crate::config::load_config;
use crate::import_course::import_remote_course;
use crate::remote::CanvasClient;
use crate::source;
use crate::suggest;
use crate::sync::synchronise;

/// CLI for cartwright: sync authored course content with an LMS and move
/// it in and out of cartridge archives.
#[derive(Parser)]
#[clap(
    name = "cartwright",
    version,
    about = "Sync markdown course sources with an LMS and exchange cartridge archives"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Push the authored course tree to the remote LMS
    Sync {
        /// Course root directory (contains course.yaml)
        #[clap(long, default_value = ".")]
        config: PathBuf,
    },
    /// Export the authored course tree as a cartridge archive
    Export {
        /// Course root directory (contains course.yaml)
        #[clap(long, default_value = ".")]
        config: PathBuf,
        /// Output archive path; defaults to <course-code>.imscc
        #[clap(long)]
        output: Option<PathBuf>,
        /// Override the course title recorded in the archive
        #[clap(long)]
        title: Option<String>,
    },
    /// Report repeated prose blocks that could become shared includes
    Suggest {
        /// Course root directory (contains course.yaml)
        #[clap(long, default_value = ".")]
        config: PathBuf,
    },
    /// Import a course into an author source tree
    Import {
        /// A cartridge archive path, or `remote` to pull from the LMS
        source: String,
        /// Directory to write the author tree into
        #[clap(long, default_value = "imported-course")]
        output: PathBuf,
        /// Course root whose config and asset registry to use for
        /// `remote` imports
        #[clap(long, default_value = ".")]
        config: PathBuf,
    },
}

/// Extracted async CLI entrypoint for integration tests and main().
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync { config } => {
            let config = load_config(&config)?;
            tracing::info!(command = "sync", course_id = config.course_id, "Starting sync");
            let client = CanvasClient::new_from_env().map_err(|e| anyhow!(e))?;
            let report = synchronise(&config, &client)
                .await
                .context("synchronisation failed")?;
            tracing::info!(command = "sync", ?report, "Sync complete");
            report_skipped(&report.skipped);
            for warning in &report.warnings {
                eprintln!("warning: {warning}");
            }
            Ok(())
        }
        Commands::Export {
            config,
            output,
            title,
        } => {
            let course_root = config;
            let config = load_config(&course_root)?;
            let (course, skipped) = source::load_course(&course_root)?;
            for e in &skipped {
                eprintln!("warning: skipped invalid item: {e}");
            }
            let output = output.unwrap_or_else(|| {
                let stem = config
                    .course_code
                    .clone()
                    .unwrap_or_else(|| "course".to_string());
                PathBuf::from(format!("{stem}.imscc"))
            });
            let summary = export_cartridge(
                &course,
                &course_root,
                &ExportOptions {
                    output: output.clone(),
                    title,
                },
            )
            .context("export failed")?;
            tracing::info!(command = "export", ?summary, "Export complete");
            println!("wrote {}", output.display());
            Ok(())
        }
        Commands::Suggest { config } => {
            let candidates = suggest::suggest_shared_includes(&config)
                .context("repeated-prose scan failed")?;
            tracing::info!(command = "suggest", candidates = candidates.len(), "Scan complete");
            print!("{}", suggest::render_report(&candidates));
            Ok(())
        }
        Commands::Import {
            source,
            output,
            config,
        } => {
            if source == "remote" {
                let loaded = load_config(&config)?;
                let client = CanvasClient::new_from_env().map_err(|e| anyhow!(e))?;
                let summary =
                    import_remote_course(&client, loaded.course_id, &loaded.course_root, &output)
                        .await
                        .context("remote import failed")?;
                tracing::info!(command = "import", ?summary, "Remote import complete");
                report_skipped(&summary.skipped);
            } else {
                let archive = PathBuf::from(&source);
                let (_, report) = import_cartridge(&archive, &output)
                    .with_context(|| format!("failed to import {}", archive.display()))?;
                tracing::info!(command = "import", ?report, "Cartridge import complete");
                let skipped: Vec<String> =
                    report.skipped.iter().map(|e| e.to_string()).collect();
                report_skipped(&skipped);
            }
            println!("wrote author tree to {}", output.display());
            Ok(())
        }
    }
}

fn report_skipped(skipped: &[String]) {
    for message in skipped {
        eprintln!("warning: skipped: {message}");
    }
}
