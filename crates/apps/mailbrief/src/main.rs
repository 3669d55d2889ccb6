//! mailbrief - unread Gmail digest with AI summaries
//!
//! This is the command-line entry point for the mailbrief library stack.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use mail::{
    ConsentFlow, FileTokenStore, GmailAuth, GmailClient, GmailCredentials, HttpTransport,
    InboxController, LoopbackConsent, OpenAiCredentials, OpenAiSummarizer, RetryPolicy, Settings,
    SummaryQueue, ThreadSleeper, TokenStore, UreqTransport,
};
use std::process::ExitCode;
use std::sync::Arc;

mod render;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in if needed, then list unread messages with summaries (default)
    Inbox(InboxArgs),
    /// Check whether the stored Gmail session is still accepted
    Status,
    /// Forget the stored access token
    Logout,
}

#[derive(Args, Debug, Default)]
struct InboxArgs {
    /// Maximum number of unread messages to fetch
    #[arg(short, long)]
    limit: Option<usize>,

    /// Skip AI summaries
    #[arg(long)]
    no_summaries: bool,
}

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // Bootstrap config directory
    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load().context("Failed to load settings")?;
    let http: Arc<dyn HttpTransport> = Arc::new(UreqTransport::new(settings.request_timeout()));
    let store: Arc<dyn TokenStore> =
        Arc::new(FileTokenStore::default_location().context("Could not locate token file")?);
    let auth = Arc::new(GmailAuth::new(store, consent_flow(&settings), http.clone()));

    match cli.command.unwrap_or(Command::Inbox(InboxArgs::default())) {
        Command::Inbox(args) => inbox(auth, http, &settings, &args),
        Command::Status => {
            status(&auth);
            Ok(())
        }
        Command::Logout => {
            auth.logout();
            println!("Signed out.");
            Ok(())
        }
    }
}

/// Interactive sign-in, when OAuth client credentials are configured
fn consent_flow(settings: &Settings) -> Option<Arc<dyn ConsentFlow>> {
    match GmailCredentials::load() {
        Ok(creds) => {
            let consent =
                LoopbackConsent::new(creds).with_request_timeout(settings.request_timeout());
            Some(Arc::new(consent) as Arc<dyn ConsentFlow>)
        }
        Err(e) => {
            warn!("Gmail credentials not found: {}", e);
            if let Some(path) = GmailCredentials::default_credentials_path() {
                warn!(
                    "To configure Gmail access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: GMAIL_CLIENT_ID and GMAIL_CLIENT_SECRET",
                    path.display()
                );
            }
            None
        }
    }
}

fn summary_queue(
    http: Arc<dyn HttpTransport>,
    settings: &Settings,
    args: &InboxArgs,
) -> Option<Arc<SummaryQueue>> {
    if args.no_summaries {
        return None;
    }

    let creds = match OpenAiCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            warn!("Summaries disabled: {:#}", e);
            return None;
        }
    };

    let summarizer = OpenAiSummarizer::new(http, creds, settings);
    match SummaryQueue::new(
        Arc::new(summarizer),
        Arc::new(ThreadSleeper),
        RetryPolicy::from_settings(settings),
    ) {
        Ok(queue) => Some(Arc::new(queue)),
        Err(e) => {
            warn!("Summaries disabled: {:#}", e);
            None
        }
    }
}

fn inbox(
    auth: Arc<GmailAuth>,
    http: Arc<dyn HttpTransport>,
    settings: &Settings,
    args: &InboxArgs,
) -> Result<()> {
    let gmail = Arc::new(GmailClient::new(auth, http.clone()));
    let queue = summary_queue(http, settings, args);

    let mut controller = InboxController::new(gmail, queue).with_settings(settings);
    if let Some(limit) = args.limit {
        controller = controller.with_max_results(limit);
    }
    let controller = controller.with_listener(render::progress);

    let outcome = match controller.resume() {
        Ok(true) => Ok(()),
        Ok(false) => {
            info!("No stored session; starting Google sign-in");
            controller.sign_in()
        }
        Err(e) => Err(e),
    };

    let state = controller.snapshot();
    if let Err(e) = outcome {
        let message = state.error.unwrap_or_else(|| e.to_string());
        return Err(e).context(message);
    }

    render::inbox(&state);
    Ok(())
}

fn status(auth: &GmailAuth) {
    match auth.session_profile() {
        Some(profile) => {
            println!("Signed in as {}", profile.email_address);
            if let Some(total) = profile.messages_total {
                println!("{} messages in mailbox", total);
            }
        }
        None => println!("Not signed in."),
    }
}
