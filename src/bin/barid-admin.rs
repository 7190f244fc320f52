//! `barid-admin`: operator CLI over the Barid admin and management API.

use anyhow::{Context, Result, anyhow};
use barid::{api_client::ApiClient, config::ConfigLoader};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "barid-admin", version, about = "Barid operator tooling")]
struct Cli {
    /// Base URL of the Barid API (defaults to BARID_API_BASE_URL)
    #[arg(long, env = "BARID_ADMIN_BASE_URL")]
    base_url: Option<String>,

    /// Operator bearer token (defaults to the first configured operator token)
    #[arg(long, env = "BARID_ADMIN_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List a user's integrations
    ListIntegrations {
        #[arg(long)]
        user: Uuid,
    },
    /// Refresh one integration's access token
    Refresh {
        #[arg(long)]
        user: Uuid,
        integration: Uuid,
    },
    /// Run one token refresh pass over every integration
    RefreshAll,
    /// Trim and re-encrypt stored access tokens
    SanitizeTokens,
    /// Post a synthetic text DM to the webhook endpoint
    SimulateWebhook {
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        text: String,
        /// Signs the payload; defaults to BARID_WEBHOOK_APP_SECRET
        #[arg(long)]
        app_secret: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::new()
        .load_unvalidated()
        .context("loading configuration")?;

    let base_url = cli.base_url.unwrap_or_else(|| config.api_base_url.clone());
    let token = cli
        .token
        .or_else(|| config.operator_tokens.first().cloned())
        .ok_or_else(|| anyhow!("no operator token: pass --token or set BARID_OPERATOR_TOKEN"))?;
    let client = ApiClient::new(base_url, token);

    match cli.command {
        Command::ListIntegrations { user } => {
            print_json(&client.list_integrations(&user).await?)?;
        }
        Command::Refresh { user, integration } => {
            print_json(&client.refresh(&user, &integration).await?)?;
        }
        Command::RefreshAll => print_json(&client.refresh_all().await?)?,
        Command::SanitizeTokens => print_json(&client.sanitize_tokens().await?)?,
        Command::SimulateWebhook {
            recipient,
            sender,
            text,
            app_secret,
        } => {
            let secret = app_secret.or_else(|| config.webhook_app_secret.clone());
            let ack = client
                .simulate_webhook(&recipient, &sender, &text, secret.as_deref())
                .await?;
            print_json(&ack)?;
        }
    }

    Ok(())
}
