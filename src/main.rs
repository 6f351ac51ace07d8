mod cache;
mod config;
mod coordinator;
mod error;
mod guard;
mod identity;
mod logging;
mod models;
mod server;
mod session;
mod store;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use models::{CompanyDraft, CompanyPatch, EntityId, JobDraft, JobPatch, Stage, UpdateFrequency};
use session::Session;
use std::sync::Arc;
use store::{HttpStore, SqliteStore};

#[derive(Parser)]
#[command(name = "jobboard")]
#[command(about = "Track job applications and target companies")]
struct Cli {
    /// Use the local SQLite database instead of the remote API
    #[arg(long, global = true)]
    local: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the local database
    Init,

    /// Serve the HTTP API from the local database
    Serve {
        /// Listen address (defaults to config or 127.0.0.1:3001)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show jobs grouped by pipeline stage
    Board,

    /// Manage tracked jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Manage target companies
    Companies {
        #[command(subcommand)]
        command: CompanyCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// List jobs
    List {
        /// Filter by stage (wishlist, applied, interview, offer, rejected)
        #[arg(short, long)]
        status: Option<Stage>,
    },

    /// Show job details
    Show {
        /// Job ID
        id: String,
    },

    /// Add a job
    Add {
        /// Job title
        title: String,

        /// Company name
        company: String,

        /// Initial stage
        #[arg(short, long, default_value = "wishlist")]
        status: Stage,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Move a job to another stage
    Move {
        /// Job ID
        id: String,

        /// Target stage
        status: Stage,
    },

    /// Edit job fields
    Edit {
        /// Job ID
        id: String,

        #[arg(short, long)]
        title: Option<String>,

        #[arg(short, long)]
        company: Option<String>,

        #[arg(short, long)]
        notes: Option<String>,
    },

    /// Remove a job
    Rm {
        /// Job ID
        id: String,
    },
}

#[derive(Subcommand)]
enum CompanyCommands {
    /// List companies, starred first
    List,

    /// Add a company
    Add {
        /// Company name
        name: String,

        /// Star it right away
        #[arg(short, long)]
        starred: bool,
    },

    /// Set the display name of a company
    Rename {
        /// Company ID
        id: String,

        /// Custom display name
        name: String,
    },

    /// Star or unstar a company
    Star {
        /// Company ID
        id: String,
    },

    /// Record that a company's openings were checked
    Touch {
        /// Company ID
        id: String,

        /// Check date (YYYY-MM-DD, defaults to today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },

    /// Remove a company
    Rm {
        /// Company ID
        id: String,
    },

    /// List companies due for a check
    Stale {
        /// Check frequency (daily, weekly)
        #[arg(short, long, default_value = "weekly")]
        frequency: UpdateFrequency,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;
    let config = Config::load()?;

    match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&config.db_path())?;
            store.init()?;
            let path = store.path().map(|p| p.display().to_string()).unwrap_or_default();
            println!("Database initialized at {}", path);
        }

        Commands::Serve { bind } => {
            let store = SqliteStore::open(&config.db_path())?;
            store.init()?;
            let bind = bind.unwrap_or_else(|| config.bind().to_string());
            server::serve(Arc::new(store), config.token_registry(), &bind).await?;
        }

        Commands::Board => {
            let session = open_session(&config, cli.local).await?;
            let columns = session.jobs.cache().by_stage();
            for (stage, jobs) in columns {
                println!("{} ({})", stage.title(), jobs.len());
                println!("{}", "-".repeat(40));
                for job in jobs {
                    println!(
                        "  {:<38} {:<25} {}",
                        job.id,
                        truncate(&job.title, 23),
                        job.company
                    );
                }
                println!();
            }
        }

        Commands::Jobs { command } => {
            let session = open_session(&config, cli.local).await?;
            run_job_command(&session, command).await?;
        }

        Commands::Companies { command } => {
            let session = open_session(&config, cli.local).await?;
            run_company_command(&session, command).await?;
        }
    }

    Ok(())
}

/// Signs in against the chosen store and loads both caches.
async fn open_session(config: &Config, local: bool) -> Result<Session> {
    let (session, identity) = if local {
        let store = SqliteStore::open(&config.db_path())?;
        store.ensure_initialized()?;
        (Session::new(Arc::new(store)), config.local_identity())
    } else {
        let store = HttpStore::new(config.api_url()?);
        (Session::new(Arc::new(store)), config.identity()?)
    };
    session
        .on_identity(identity)
        .await
        .context("Failed to load your jobs and companies")?;
    Ok(session)
}

async fn run_job_command(session: &Session, command: JobCommands) -> Result<()> {
    match command {
        JobCommands::List { status } => {
            let view = session.jobs.cache().subscribe();
            let jobs: Vec<_> = view
                .borrow()
                .iter()
                .filter(|job| status.is_none_or(|s| job.status == s))
                .cloned()
                .collect();
            if jobs.is_empty() {
                println!("No jobs found.");
            } else {
                println!("{:<38} {:<10} {:<30} {:<20}", "ID", "STATUS", "TITLE", "COMPANY");
                println!("{}", "-".repeat(100));
                for job in jobs {
                    println!(
                        "{:<38} {:<10} {:<30} {:<20}",
                        job.id,
                        job.status,
                        truncate(&job.title, 28),
                        truncate(&job.company, 18)
                    );
                }
            }
        }

        JobCommands::Show { id } => {
            let job = session.jobs.get(&EntityId::new(id))?;
            println!("Job {}", job.id);
            println!("Title: {}", job.title);
            println!("Company: {}", job.company);
            println!("Status: {}", job.status.title());
            println!("Created: {}", job.created_at);
            println!("Updated: {}", job.updated_at);
            if !job.notes.is_empty() {
                println!("\n--- Notes ---\n{}", job.notes);
            }
        }

        JobCommands::Add {
            title,
            company,
            status,
            notes,
        } => {
            let job = session
                .jobs
                .create(JobDraft {
                    title,
                    company,
                    status,
                    notes: notes.unwrap_or_default(),
                    ..Default::default()
                })
                .await?;
            println!("Added '{}' at {} ({})", job.title, job.company, job.id);
        }

        JobCommands::Move { id, status } => {
            let job = session.jobs.move_to(&EntityId::new(id), status).await?;
            println!("Moved '{}' to {}", job.title, job.status.title());
        }

        JobCommands::Edit {
            id,
            title,
            company,
            notes,
        } => {
            let patch = JobPatch {
                title,
                company,
                notes,
                ..Default::default()
            };
            if patch.is_empty() {
                return Err(anyhow!("Nothing to change. Pass --title, --company or --notes."));
            }
            let job = session.jobs.update(&EntityId::new(id), patch).await?;
            println!("Updated '{}'", job.title);
        }

        JobCommands::Rm { id } => {
            let job = session.jobs.delete(&EntityId::new(id)).await?;
            println!("Removed '{}' at {}", job.title, job.company);
        }
    }

    Ok(())
}

async fn run_company_command(session: &Session, command: CompanyCommands) -> Result<()> {
    match command {
        CompanyCommands::List => {
            let companies = session.companies.cache().starred_first();
            if companies.is_empty() {
                println!("No companies found.");
            } else {
                println!("{:<38} {:<2} {:<30} {:<12}", "ID", "", "NAME", "CHECKED");
                println!("{}", "-".repeat(84));
                for company in companies {
                    println!(
                        "{:<38} {:<2} {:<30} {:<12}",
                        company.id,
                        if company.starred { "*" } else { "" },
                        truncate(company.display_name(), 28),
                        company
                            .last_updated
                            .map(|d| d.to_string())
                            .unwrap_or_else(|| "never".to_string())
                    );
                }
            }
        }

        CompanyCommands::Add { name, starred } => {
            let company = session
                .companies
                .create(CompanyDraft {
                    name,
                    starred,
                    ..Default::default()
                })
                .await?;
            println!("Added '{}' ({})", company.display_name(), company.id);
        }

        CompanyCommands::Rename { id, name } => {
            let company = session
                .companies
                .update(
                    &EntityId::new(id),
                    CompanyPatch {
                        custom_name: Some(name),
                        ..Default::default()
                    },
                )
                .await?;
            println!("Renamed '{}' to '{}'", company.name, company.display_name());
        }

        CompanyCommands::Star { id } => {
            let company = session.companies.toggle_star(&EntityId::new(id)).await?;
            if company.starred {
                println!("Starred '{}'", company.display_name());
            } else {
                println!("Unstarred '{}'", company.display_name());
            }
        }

        CompanyCommands::Touch { id, date } => {
            let day = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let company = session.companies.touch(&EntityId::new(id), day).await?;
            println!("Marked '{}' as checked on {}", company.display_name(), day);
        }

        CompanyCommands::Rm { id } => {
            let company = session.companies.delete(&EntityId::new(id)).await?;
            println!("Removed '{}'", company.display_name());
        }

        CompanyCommands::Stale { frequency } => {
            let today = chrono::Local::now().date_naive();
            let stale: Vec<_> = session
                .companies
                .cache()
                .starred_first()
                .into_iter()
                .filter(|c| c.is_stale(frequency, today))
                .collect();
            if stale.is_empty() {
                println!("Every company is up to date.");
            } else {
                println!("{} companies due for a check:", stale.len());
                for company in stale {
                    let last = company
                        .last_updated
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "never".to_string());
                    println!("  {} - {} (last checked {})", company.id, company.display_name(), last);
                }
            }
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
        assert_eq!(truncate("Zürich Versicherung", 9), "Zürich...");
    }

    #[test]
    fn test_cli_parses_stage_and_globals() {
        let cli = Cli::try_parse_from(["jobboard", "--local", "jobs", "move", "abc", "interview"])
            .unwrap();
        assert!(cli.local);
        match cli.command {
            Commands::Jobs {
                command: JobCommands::Move { id, status },
            } => {
                assert_eq!(id, "abc");
                assert_eq!(status, Stage::Interview);
            }
            _ => panic!("expected jobs move"),
        }
        assert!(Cli::try_parse_from(["jobboard", "jobs", "move", "abc", "hired"]).is_err());
    }

    #[test]
    fn test_cli_parses_stale_frequency() {
        let cli = Cli::try_parse_from(["jobboard", "companies", "stale", "-f", "daily"]).unwrap();
        match cli.command {
            Commands::Companies {
                command: CompanyCommands::Stale { frequency },
            } => assert_eq!(frequency, UpdateFrequency::Daily),
            _ => panic!("expected companies stale"),
        }
    }
}
