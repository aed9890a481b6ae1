use anyhow::{bail, Result};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use kintercut::config::{Config, DatabaseBackend};
use kintercut::storage::{PostgresStorage, SqliteStorage, Storage};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "kintercut-admin")]
#[command(about = "KinterCut admin management CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List short links (admin links by default)
    Links {
        /// Show expiring links created by anonymous visitors instead
        #[arg(long)]
        anonymous: bool,
    },
    /// Show click statistics for a link
    Stats {
        /// Link ID
        id: i64,
    },
    /// Delete a link and its click history
    Delete {
        /// Link ID
        id: i64,
    },
    /// Show recent login attempts
    Logins {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

fn format_ts(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        DatabaseBackend::Sqlite => Arc::new(
            SqliteStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
        DatabaseBackend::Postgres => Arc::new(
            PostgresStorage::new(&config.database.url, config.database.max_connections).await?,
        ),
    };

    // Ensure database is initialized
    storage.init().await?;

    match cli.command {
        Commands::Links { anonymous } => {
            let links = storage.list_links(!anonymous).await?;
            if links.is_empty() {
                println!("No links found.");
                return Ok(());
            }

            println!(
                "{:<6} {:<32} {:<8} {:<20} {:<20} {}",
                "ID", "Slug", "Clicks", "Created", "Expires", "URL"
            );
            println!("{}", "-".repeat(110));
            for entry in links {
                let link = entry.link;
                let expires = link
                    .expires_at
                    .map(format_ts)
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{:<6} {:<32} {:<8} {:<20} {:<20} {}",
                    link.id,
                    link.slug,
                    entry.click_count,
                    format_ts(link.created_at),
                    expires,
                    link.original_url
                );
            }
        }
        Commands::Stats { id } => {
            let Some(link) = storage.get_link(id).await? else {
                bail!("Link {id} not found");
            };
            let stats = storage.click_stats(id, 10, 10).await?;

            println!("{} -> {}", link.slug, link.original_url);
            println!("Total clicks: {}", stats.total_clicks);
            println!("Unique IPs:   {}", stats.unique_ips);

            if !stats.top_countries.is_empty() {
                println!();
                println!("Top countries:");
                for country in &stats.top_countries {
                    println!("  {:<30} {}", country.country, country.count);
                }
            }

            if !stats.recent_clicks.is_empty() {
                println!();
                println!("Recent clicks:");
                for click in &stats.recent_clicks {
                    println!(
                        "  {:<20} {:<40} {}, {}",
                        format_ts(click.clicked_at),
                        click.ip_address,
                        click.city,
                        click.country
                    );
                }
            }
        }
        Commands::Delete { id } => {
            if storage.delete_link(id).await? {
                println!("✓ Deleted link {}", id);
            } else {
                println!("⚠ Link {} does not exist", id);
            }
        }
        Commands::Logins { limit } => {
            let attempts = storage.list_login_attempts(limit).await?;
            if attempts.is_empty() {
                println!("No login attempts recorded.");
                return Ok(());
            }

            println!(
                "{:<20} {:<20} {:<40} {}",
                "Time", "Username", "IP", "Result"
            );
            println!("{}", "-".repeat(90));
            for attempt in attempts {
                println!(
                    "{:<20} {:<20} {:<40} {}",
                    format_ts(attempt.created_at),
                    attempt.username,
                    attempt.ip_address,
                    if attempt.success { "success" } else { "failed" }
                );
            }
        }
    }

    Ok(())
}
