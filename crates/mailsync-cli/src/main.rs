use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailsync_core::SqliteEmailStore;
use mailsync_mail::{ADDRESS_HEADS, Flag, FlagOp, MailClient, SyncEngine, Uid};

mod config;

use config::load_config;

const LOG_ENV: &str = "MAILSYNC_LOG";
const DEFAULT_LOG_FILTER: &str = "mailsync=info,mailsync_mail=info,mailsync_core=info";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "mailsync", version, about = "Incremental IMAP to SQL mail import")]
struct Cli {
    /// Config file; defaults to ./mailsync.toml, then $XDG_CONFIG_HOME/mailsync/mailsync.toml.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import everything newer than what is already stored, for every mailbox.
    Sync,
    /// List the account's mailboxes.
    Mailboxes,
    /// Show unread messages.
    Unread(UnreadCmd),
    /// Set or clear the seen flag on one message.
    MarkRead(MarkReadCmd),
    /// Delete and expunge one message.
    Delete(MessageRef),
}

#[derive(Args, Debug)]
struct UnreadCmd {
    #[arg(short, long, default_value = "INBOX")]
    mailbox: String,
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
}

#[derive(Args, Debug)]
struct MessageRef {
    #[arg(short, long, default_value = "INBOX")]
    mailbox: String,
    uid: u32,
}

#[derive(Args, Debug)]
struct MarkReadCmd {
    #[command(flatten)]
    message: MessageRef,
    /// Clear the flag instead of setting it.
    #[arg(long)]
    unread: bool,
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();
    let config = load_config(cli.config.as_deref())?;
    let rt = tokio::runtime::Runtime::new()?;
    block_on_bounded(rt, run(cli.command, config), SHUTDOWN_GRACE)
}

/// Runs `fut` to completion, then waits at most `grace` for blocking
/// workers still stuck in a timed-out IMAP call.
fn block_on_bounded<F: Future>(rt: tokio::runtime::Runtime, fut: F, grace: Duration) -> F::Output {
    let output = rt.block_on(fut);
    rt.shutdown_timeout(grace);
    output
}

async fn run(command: Command, config: config::AppConfig) -> Result<()> {
    let client = MailClient::connect(config.imap)
        .await
        .context("connecting to the mail server")?;
    match command {
        Command::Sync => {
            let store = SqliteEmailStore::connect(&config.store).await?;
            store.init().await?;
            let engine = SyncEngine::new(client, store);
            let report = engine.sync().await?;
            let failed = report.failures().count();
            info!(
                mailboxes = report.outcomes.len(),
                imported = report.imported(),
                failed,
                "sync finished"
            );
            for (mailbox, err) in report.failures() {
                error!(mailbox, error = %err, "mailbox not imported");
            }
            if failed > 0 {
                bail!("{} mailbox(es) failed to sync", failed);
            }
        }
        Command::Mailboxes => {
            for mailbox in client.mailboxes().await? {
                if mailbox.selectable {
                    println!("{}", mailbox.name);
                } else {
                    println!("{} (container)", mailbox.name);
                }
            }
        }
        Command::Unread(cmd) => {
            let mut mails = client.unread_mails(&cmd.mailbox, cmd.limit).await?;
            for mail in &mut mails {
                mail.load_header(&ADDRESS_HEADS).await?;
                let date = mail
                    .date
                    .map(|date| date.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{}\t{}\t{}\t{}",
                    mail.uid,
                    date,
                    mail.heads_address_as_string("From"),
                    mail.subject
                );
            }
        }
        Command::MarkRead(cmd) => {
            let op = if cmd.unread { FlagOp::Remove } else { FlagOp::Add };
            client
                .store(&cmd.message.mailbox, Uid(cmd.message.uid), op, &[Flag::Seen])
                .await?;
        }
        Command::Delete(cmd) => {
            client
                .delete_mail(&cmd.mailbox, Uid(cmd.uid))
                .await?;
            info!(mailbox = %cmd.mailbox, uid = cmd.uid, "deleted");
        }
    }
    Ok(())
}
