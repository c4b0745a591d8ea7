use std::env;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use transactional_outbox::{OutboxStore, SqlxOutboxRepository};

fn usage() {
    eprintln!("Usage:");
    eprintln!("  outbox-cli stats [DATABASE_URL]");
    eprintln!("  outbox-cli requeue-failed <rfc3339_ts> [DATABASE_URL]");
    eprintln!("  outbox-cli requeue <event_id> <origin> [DATABASE_URL]");
    eprintln!();
    eprintln!("DATABASE_URL defaults to the environment variable of the same name.");
}

async fn connect(url: Option<&String>) -> anyhow::Result<SqlxOutboxRepository> {
    let url = match url {
        Some(url) => url.clone(),
        None => env::var("DATABASE_URL").context("DATABASE_URL not set")?,
    };
    let pool = PgPool::connect(&url)
        .await
        .context("Failed to connect to database")?;
    Ok(SqlxOutboxRepository::new(pool))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "stats" if args.len() <= 3 => {
            let repo = connect(args.get(2)).await?;
            for (status, total) in repo.status_counts().await? {
                println!("{:<9} {}", status, total);
            }
            let (pending, age) = repo.pending_stats().await?;
            println!("oldest pending event: {}s ({} pending)", age, pending);
        }
        "requeue-failed" if (3..=4).contains(&args.len()) => {
            let ts: DateTime<Utc> = DateTime::parse_from_rfc3339(&args[2])
                .context("Invalid timestamp, expected RFC3339")?
                .with_timezone(&Utc);
            let repo = connect(args.get(3)).await?;
            let count = repo.requeue_failed(ts).await?;
            println!("Requeued {} failed events since {}", count, ts);
        }
        "requeue" if (4..=5).contains(&args.len()) => {
            let repo = connect(args.get(4)).await?;
            repo.requeue(&args[2], &args[3]).await?;
            println!("Requeued event {} from {}", args[2], args[3]);
        }
        _ => {
            usage();
            bail!("Invalid arguments");
        }
    }

    Ok(())
}
