mod api;
mod error;
mod handlers;
mod mailer;
mod models;
mod sheets;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::Mutex;
use tracing::info;

use crate::handlers::{AnalyticsCounter, IntakeHandler, ReconciliationJob};
use crate::mailer::{SmtpConfig, SmtpMailer};
use crate::sheets::{SheetsClient, SheetsConfig};

/// The analytics counter keys its rows on the local calendar day at the
/// event's venue.
const ANALYTICS_TIMEZONE: chrono_tz::Tz = chrono_tz::America::Los_Angeles;

#[derive(Parser)]
#[command(name = "preorder-service")]
struct Args {
    #[arg(long, env = "SHEET_ID")]
    sheet_id: String,

    #[arg(long, env = "GOOGLE_SERVICE_ACCOUNT_EMAIL")]
    service_account_email: String,

    /// Service-account private key PEM; literal \n sequences are accepted.
    #[arg(long, env = "GOOGLE_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,

    #[arg(long, env = "MAIL_HOST")]
    mail_host: String,

    #[arg(long, env = "MAIL_PORT", default_value = "465")]
    mail_port: u16,

    #[arg(long, env = "MAIL_USER")]
    mail_user: String,

    #[arg(long, env = "MAIL_PASS", hide_env_values = true)]
    mail_pass: String,

    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:3001")]
    public_base_url: String,

    #[arg(long, env = "PORT", default_value = "3001")]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let sheets = Arc::new(SheetsClient::new(SheetsConfig {
        spreadsheet_id: args.sheet_id,
        service_account_email: args.service_account_email,
        private_key_pem: args.private_key.replace("\\n", "\n"),
    })?);

    let mailer = Arc::new(SmtpMailer::new(&SmtpConfig {
        host: args.mail_host,
        port: args.mail_port,
        username: args.mail_user,
        password: args.mail_pass,
    })?);

    let state = api::AppState {
        intake: Arc::new(IntakeHandler::new(sheets.clone())),
        reconciliation: Arc::new(ReconciliationJob::new(sheets.clone(), mailer)),
        analytics: Arc::new(AnalyticsCounter::new(sheets, ANALYTICS_TIMEZONE)),
        write_lock: Arc::new(Mutex::new(())),
        public_base_url: args.public_base_url,
    };

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Pre-order service listening on port {}", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
