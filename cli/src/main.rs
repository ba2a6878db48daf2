use clap::{Parser, Subcommand};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "ordersight",
    version,
    about = "Ordersight CLI: ask order questions and inspect the query guard"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "ORDERSIGHT_API_URL", default_value = "http://localhost:3978")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Ask a question about orders
    Ask {
        /// The question in plain language
        question: String,
        /// Directory object id of the user asking
        #[arg(long, env = "ORDERSIGHT_DIRECTORY_OBJECT_ID")]
        user: Option<String>,
        /// Conversation id used for log correlation
        #[arg(long)]
        conversation_id: Option<String>,
        /// Run the turn in-process instead of calling the API
        #[arg(long)]
        local: bool,
    },
    /// Check a query against the read-only and partition-filter guard
    Guard {
        /// Candidate SQL query
        #[arg(long)]
        query: String,
        /// Comma-separated partition ids (e.g. 101,205)
        #[arg(long)]
        partitions: String,
    },
    /// Print the schema description given to the model
    Schema {
        /// Comma-separated partition ids used to render the required filter
        #[arg(long)]
        partitions: String,
    },
    /// Look up the partitions an email address may read
    Authorize {
        /// Email address to look up
        email: String,
        /// Authorization endpoint prefix the email is appended to
        #[arg(long, env = "SERVICEID_TOKEN_REQUEST_URL")]
        base_url: String,
        /// Value sent in the Token header
        #[arg(long, env = "SERVICEID_TOKEN", hide_env_values = true)]
        token: String,
        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 5)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ordersight_runtime=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Ask {
            question,
            user,
            conversation_id,
            local,
        } => {
            if local {
                commands::ask::local(&question, user.as_deref(), conversation_id.as_deref()).await
            } else {
                commands::ask::remote(
                    &cli.api_url,
                    &question,
                    user.as_deref(),
                    conversation_id.as_deref(),
                )
                .await
            }
        }
        Commands::Guard { query, partitions } => commands::guard::run(&query, &partitions),
        Commands::Schema { partitions } => commands::schema::run(&partitions),
        Commands::Authorize {
            email,
            base_url,
            token,
            timeout_secs,
        } => commands::authorize::run(&email, &base_url, &token, timeout_secs).await,
    };

    std::process::exit(code);
}
