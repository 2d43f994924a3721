use chrono::Local;
use clap::{Parser, Subcommand};
use feedsync::types::events::Event;
use feedsync::types::{FeedFilter, NotificationId, NotificationItem};
use feedsync::{FeedClient, FeedConfig, FeedError, FeedSnapshot, LoadMoreOutcome};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Terminal front end for a learner's notification feed.
//
// Usage:
//   feedsync -u 42                                  # print the feed and follow live updates
//   feedsync -u 42 list --unread-only --pages 3     # print up to three pages of unread items
//   feedsync -u 42 mark-read 1187                   # mark one notification read
//   feedsync -u 42 mark-all-read
//   feedsync -u 42 delete 1187

#[derive(Parser, Debug)]
#[command(name = "feedsync", version, about = "Follow a learner's notification feed")]
struct Cli {
    /// Root of the LMS REST API
    #[arg(long, env = "FEEDSYNC_BASE_URL")]
    base_url: Option<String>,
    /// Id of the signed-in user
    #[arg(long, short = 'u', env = "FEEDSYNC_USER_ID")]
    user_id: Option<String>,
    /// Bearer token sent with every request
    #[arg(long, env = "FEEDSYNC_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// JSON config file; flags override its values
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the feed, then follow live updates until Ctrl-C
    Watch {
        #[arg(long)]
        unread_only: bool,
    },
    /// Print the feed and exit
    List {
        #[arg(long)]
        unread_only: bool,
        #[arg(long, default_value_t = 1)]
        pages: u32,
    },
    /// Mark one notification as read
    MarkRead { id: String },
    /// Mark every notification as read
    MarkAllRead,
    /// Delete one notification
    Delete { id: String },
}

fn load_config(cli: &Cli) -> anyhow::Result<FeedConfig> {
    let mut config = match &cli.config {
        Some(path) => FeedConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => FeedConfig::default(),
    };
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(user_id) = &cli.user_id {
        config.user_id = user_id.clone();
    }
    if cli.token.is_some() {
        config.auth_token = cli.token.clone();
    }
    Ok(config)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let cli = Cli::parse();
    let mut config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(2);
        }
    };

    let command = cli.command.unwrap_or(Command::Watch { unread_only: false });
    if !matches!(command, Command::Watch { .. }) {
        // One-shot commands page through the feed without the scroll guard.
        config.load_more_delay = Duration::ZERO;
    }

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = rt.block_on(async move {
        match run(config, command).await {
            Ok(()) => 0,
            Err(e) => {
                error!("{e}");
                1
            }
        }
    });
    std::process::exit(code);
}

async fn run(config: FeedConfig, command: Command) -> anyhow::Result<()> {
    let client = FeedClient::builder()
        .with_config(config)
        .on_event(|event, _client| async move { log_event(&event) })
        .build()?;

    let result = execute(&client, command).await;
    client.shutdown().await;
    result
}

async fn execute(client: &Arc<FeedClient>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Watch { unread_only } => watch(client, unread_only).await,
        Command::List { unread_only, pages } => list(client, unread_only, pages).await,
        Command::MarkRead { id } => {
            let id = NotificationId::from(id);
            find(client, &id).await?;
            client.mark_as_read(&id).await.map_err(surface)?;
            println!("Marked {id} as read. {} unread left.", client.snapshot().unread_count);
            Ok(())
        }
        Command::MarkAllRead => {
            client.mark_all_as_read().await.map_err(surface)?;
            println!("All notifications marked as read.");
            Ok(())
        }
        Command::Delete { id } => {
            let id = NotificationId::from(id);
            let outcome = client.delete_notification(&id).await.map_err(surface)?;
            println!(
                "{}",
                outcome
                    .message
                    .unwrap_or_else(|| format!("Deleted notification {id}."))
            );
            Ok(())
        }
    }
}

fn surface(e: FeedError) -> anyhow::Error {
    anyhow::anyhow!(e.user_message())
}

fn filter_for(unread_only: bool) -> FeedFilter {
    if unread_only {
        FeedFilter::UnreadOnly
    } else {
        FeedFilter::All
    }
}

async fn watch(client: &Arc<FeedClient>, unread_only: bool) -> anyhow::Result<()> {
    client.initialize().await;
    if unread_only {
        client.switch_filter(FeedFilter::UnreadOnly).await.map_err(surface)?;
    }
    print_feed(&client.snapshot());

    info!("Following live updates, press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Stopping.");
    Ok(())
}

async fn list(client: &Arc<FeedClient>, unread_only: bool, pages: u32) -> anyhow::Result<()> {
    client.switch_filter(filter_for(unread_only)).await.map_err(surface)?;
    for _ in 1..pages {
        match client.load_more().await.map_err(surface)? {
            LoadMoreOutcome::Loaded { has_more: true, .. } => {}
            _ => break,
        }
    }
    print_feed(&client.snapshot());
    Ok(())
}

/// Pages through the feed until `id` is cached or the feed runs out.
async fn find(client: &Arc<FeedClient>, id: &NotificationId) -> anyhow::Result<()> {
    client.switch_filter(FeedFilter::All).await.map_err(surface)?;
    while !client.snapshot().items.iter().any(|item| &item.id == id) {
        match client.load_more().await.map_err(surface)? {
            LoadMoreOutcome::Loaded { .. } => {}
            _ => return Err(surface(FeedError::UnknownNotification(id.clone()))),
        }
    }
    Ok(())
}

fn print_feed(snapshot: &FeedSnapshot) {
    let groups = snapshot.group_for_display(&Local::now());
    println!(
        "{} notifications, {} unread{}",
        groups.len(),
        snapshot.unread_count,
        if snapshot.has_more { " (more available)" } else { "" }
    );
    for (label, items) in [("Today", &groups.today), ("Earlier", &groups.earlier)] {
        if items.is_empty() {
            continue;
        }
        println!("\n{label}");
        for item in items.iter() {
            print_item(item);
        }
    }
}

fn print_item(item: &NotificationItem) {
    let marker = if item.is_read { ' ' } else { '*' };
    let when = item.created_at.with_timezone(&Local).format("%b %d %H:%M");
    println!("  {marker} [{}] {when}  {}", item.id, item.title);
    let message = item.safe_message();
    if !message.is_empty() {
        println!("      {message}");
    }
    if let Some(target) = item.safe_target() {
        println!("      -> {target}");
    }
}

fn log_event(event: &Event) {
    match event {
        Event::NotificationReceived(item) => {
            info!("New notification [{}] {}", item.id, item.title);
        }
        Event::UnreadCountChanged(count) => info!("Unread: {count}"),
        Event::ConnectionStateChanged(state) => info!("Push channel {state}"),
        Event::MutationFailed { message, .. } => warn!("{message}"),
        Event::NotificationDeleted { id, .. } => info!("Notification {id} deleted"),
        Event::FeedReplaced { .. } | Event::ItemsAppended { .. } => {}
    }
}
