//! Command-line interface for mediadex.
//!
//! Provides commands for running an index build and inspecting the
//! persisted build metadata.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::{self, BuildContext};
use crate::core::Orchestrator;

/// mediadex - media usage index builder
#[derive(Parser, Debug)]
#[command(name = "mediadex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or refresh the media usage index
    Build {
        /// Site organization
        #[arg(long, env = "MEDIADEX_ORG")]
        org: String,

        /// Site repository
        #[arg(long, env = "MEDIADEX_REPO")]
        repo: String,

        /// Content ref (branch)
        #[arg(long = "ref", env = "MEDIADEX_REF", default_value = "main")]
        ref_name: String,

        /// Force a full rebuild even when an incremental run is possible
        #[arg(long)]
        full: bool,

        /// Admin API token
        #[arg(long, env = "MEDIADEX_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Show the persisted build metadata
    Status {
        #[arg(long, env = "MEDIADEX_ORG")]
        org: String,

        #[arg(long, env = "MEDIADEX_REPO")]
        repo: String,

        #[arg(long = "ref", env = "MEDIADEX_REF", default_value = "main")]
        ref_name: String,

        #[arg(long, env = "MEDIADEX_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Build {
                org,
                repo,
                ref_name,
                full,
                token,
            } => {
                let ctx = BuildContext {
                    org,
                    repo,
                    ref_name,
                    token,
                };
                let orchestrator = Orchestrator::new(config::config()?);
                let report = orchestrator.build(&ctx, full).await?;

                println!("Build {} ({:?})", report.build_id, report.mode);
                println!("  entries: {}", report.entries_count);
                println!("  pages:   {}", report.pages_seen);
                println!("  took:    {}ms", report.duration_ms);
                if !report.errors.is_empty() {
                    println!("  {} page(s) skipped:", report.errors.len());
                    for error in &report.errors {
                        println!("    {error}");
                    }
                }
                Ok(())
            }

            Commands::Status {
                org,
                repo,
                ref_name,
                token,
            } => {
                let ctx = BuildContext {
                    org,
                    repo,
                    ref_name,
                    token,
                };
                let orchestrator = Orchestrator::new(config::config()?);
                match orchestrator.read_meta(&ctx).await? {
                    Some(meta) => {
                        match meta.last_fetch_time {
                            Some(t) => println!("last fetch: {t}"),
                            None => println!("last fetch: never"),
                        }
                        println!("entries:    {}", meta.entries_count);
                        match meta.last_build_mode {
                            Some(mode) => println!("last mode:  {mode:?}"),
                            None => println!("last mode:  unknown"),
                        }
                    }
                    None => println!("no build metadata found"),
                }
                Ok(())
            }
        }
    }
}
