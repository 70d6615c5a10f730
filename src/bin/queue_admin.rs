use anyhow::{bail, Context};
use blood_search::adapters::{AmqpConfig, AmqpQueue};
use blood_search::domain::model::BloodRequest;
use blood_search::domain::ports::MessageQueue;
use blood_search::utils::logger;
use blood_search::ServiceConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "queue-admin")]
#[command(about = "Inspect and maintain the blood request queue")]
struct Args {
    /// Path to the service TOML configuration file
    #[arg(short, long, default_value = "blood-search.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the number of ready messages
    Depth,
    /// Drop every ready message
    Purge {
        /// Required, purging cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Publish a blood request, given inline or as a path to a JSON file
    Enqueue { request: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose);

    let config = ServiceConfig::from_file(&args.config)
        .with_context(|| format!("Failed to load config file '{}'", args.config))?;
    let queue = AmqpQueue::connect(AmqpConfig::new(&config.queue.url, &config.queue.name))
        .await
        .context("Failed to connect to the message broker")?;

    let result = execute(&queue, args.command).await;
    queue.close().await;
    result
}

async fn execute(queue: &AmqpQueue, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Depth => {
            let depth = queue.depth().await?;
            println!("📬 {} messages waiting", depth);
        }
        Command::Purge { yes } => {
            if !yes {
                bail!("Refusing to purge without --yes");
            }
            let purged = queue.purge().await?;
            println!("🧹 Purged {} messages", purged);
        }
        Command::Enqueue { request } => {
            let payload = read_request(&request)?;
            let parsed = BloodRequest::from_json(&payload).context("Not a valid blood request")?;
            queue.publish(&parsed.to_json()?).await?;
            println!(
                "✅ Queued request for {} unit(s) of {} near {}, {}",
                parsed.units, parsed.blood_type, parsed.selected_town, parsed.selected_city
            );
        }
    }
    Ok(())
}

/// Inline JSON when the argument looks like an object, otherwise a file path.
fn read_request(argument: &str) -> anyhow::Result<Vec<u8>> {
    if argument.trim_start().starts_with('{') {
        return Ok(argument.as_bytes().to_vec());
    }
    std::fs::read(argument).with_context(|| format!("Failed to read request file '{}'", argument))
}
