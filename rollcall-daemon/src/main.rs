use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rollcall_auth::{Janitor, Sweep};
use rollcall_core::{ChannelId, GroupId, GroupRegistrationConfig, RoleId, UserId};
use rollcall_daemon::config::{DaemonConfig, MailMode, StoreKind};
use rollcall_daemon::dispatch::Dispatcher;
use rollcall_daemon::mail::LogMailer;
use rollcall_daemon::platform::{Messenger, Offline, Platform};
use rollcall_daemon::services::{
    AdminError, AdminService, ConfirmationScheduler, PinAttemptLimiter, RegistrationService,
};
use rollcall_daemon::shutdown::ShutdownCoordinator;
use rollcall_daemon::stdio::{self, JsonLinesPlatform};
use rollcall_daemon::store::{DurableStore, MemoryStore, RegistrationStore, SqliteStore, Store};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Time allowed for the output writer to flush after shutdown.
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// CLI Definition
// ============================================================================

/// Rollcall - self-service community membership registration
#[derive(Parser)]
#[command(name = "rollcall", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read interactions as JSON lines from stdin (default if no command given)
    Serve,

    /// Registration settings of a guild
    Group {
        #[command(subcommand)]
        action: GroupAction,
    },

    /// Registered members
    Member {
        #[command(subcommand)]
        action: MemberAction,
    },
}

#[derive(Subcommand)]
enum GroupAction {
    /// Enable registration for a guild
    Init {
        #[arg(long)]
        group: GroupId,

        /// Channel holding the register button
        #[arg(long)]
        channel: ChannelId,

        /// Role granted to registered members
        #[arg(long)]
        role: RoleId,

        /// User recorded as having enabled registration
        #[arg(long)]
        init_user: UserId,

        /// Message shown after a successful registration
        #[arg(long)]
        message: Option<String>,

        /// Channel receiving admin notices
        #[arg(long)]
        admin_channel: Option<ChannelId>,
    },

    /// Disable registration and delete all member records
    Clear {
        #[arg(long)]
        group: GroupId,
    },

    /// Print the registration settings
    Show {
        #[arg(long)]
        group: GroupId,
    },
}

#[derive(Subcommand)]
enum MemberAction {
    /// Print a member record
    Show {
        #[arg(long)]
        group: GroupId,
        #[arg(long)]
        user: UserId,
    },

    /// Delete a member record
    Unregister {
        #[arg(long)]
        group: GroupId,
        #[arg(long)]
        user: UserId,
    },

    /// Print the nickname derived from a member record
    ResetName {
        #[arg(long)]
        group: GroupId,
        #[arg(long)]
        user: UserId,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // stdout carries serve output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = DaemonConfig::from_env()?;

    match cli.command {
        Some(Commands::Group { action }) => cmd_group(&config, action).await?,
        Some(Commands::Member { action }) => cmd_member(&config, action).await?,
        Some(Commands::Serve) | None => cmd_serve(config).await?,
    }
    Ok(())
}

// ============================================================================
// Wiring
// ============================================================================

/// Durable backend plus the handle needed to close it.
struct Durable {
    store: Arc<dyn DurableStore>,
    sqlite: Option<SqliteStore>,
}

impl Durable {
    async fn open(config: &DaemonConfig) -> anyhow::Result<Self> {
        match config.store {
            StoreKind::Memory => {
                tracing::warn!("Using in-memory store; member records are lost on exit");
                Ok(Self {
                    store: Arc::new(MemoryStore::new()),
                    sqlite: None,
                })
            }
            StoreKind::Sqlite => {
                let path = config.database_path();
                let sqlite = SqliteStore::open(&path)
                    .await
                    .with_context(|| format!("cannot open database {}", path.display()))?;
                tracing::info!(path = %path.display(), "Database opened");
                Ok(Self {
                    store: Arc::new(sqlite.clone()),
                    sqlite: Some(sqlite),
                })
            }
        }
    }

    async fn close(self) {
        if let Some(sqlite) = self.sqlite {
            sqlite.close().await;
        }
    }
}

/// Admin service for offline CLI use.
async fn offline_admin(config: &DaemonConfig) -> anyhow::Result<(AdminService, Durable, Janitor)> {
    let durable = Durable::open(config).await?;
    let janitor = Janitor::start(config.janitor_interval);
    let store = RegistrationStore::new(
        Arc::clone(&durable.store),
        &janitor,
        config.ephemeral_settings(),
    );
    let admin = AdminService::new(Arc::new(store), Arc::new(Offline));
    Ok((admin, durable, janitor))
}

// ============================================================================
// Commands
// ============================================================================

/// Serve interactions over stdin/stdout until EOF or Ctrl-C.
async fn cmd_serve(config: DaemonConfig) -> anyhow::Result<()> {
    let durable = Durable::open(&config).await?;
    let janitor = Janitor::start(config.janitor_interval);
    let registration_store = RegistrationStore::new(
        Arc::clone(&durable.store),
        &janitor,
        config.ephemeral_settings(),
    );
    let store: Arc<dyn Store> = Arc::new(registration_store.clone());

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(stdio::write_outbound(outbound_rx, tokio::io::stdout()));
    let json_platform = JsonLinesPlatform::new(outbound_tx);
    let platform: Arc<dyn Platform> = Arc::new(json_platform.clone());
    let messenger: Arc<dyn Messenger> = Arc::new(json_platform.clone());

    let limiter = PinAttemptLimiter::new(config.pin_attempts_per_minute);
    let limiter_sweep: Arc<dyn Sweep> = Arc::new(limiter.clone());
    let limiter_registration = janitor.register(Arc::downgrade(&limiter_sweep));

    let mut registration = RegistrationService::new(Arc::clone(&store), Arc::clone(&platform))
        .with_email_hosts(config.email_hosts.clone())
        .with_pin_limiter(limiter);

    let scheduler = match config.mail {
        MailMode::Off => None,
        MailMode::Log => Some(ConfirmationScheduler::new(
            Arc::clone(&store),
            Arc::new(LogMailer),
            messenger,
            config.scheduler_settings(),
        )),
    };
    if let Some(scheduler) = &scheduler {
        registration = registration.with_scheduler(scheduler.clone());
    }

    let admin = AdminService::new(Arc::clone(&store), Arc::clone(&platform));
    let dispatcher = Dispatcher::new(registration, admin, platform)
        .with_response_deadline(config.response_deadline);

    tracing::info!(
        store = ?config.store,
        mail = ?config.mail,
        email_hosts = %config.email_hosts,
        "Rollcall serving interactions on stdin"
    );

    let coordinator = ShutdownCoordinator::new();
    coordinator.trigger_on_ctrl_c();

    let accepted = stdio::serve(
        BufReader::new(tokio::io::stdin()),
        dispatcher,
        json_platform,
        coordinator.signal().token(),
    )
    .await
    .context("cannot read interactions")?;
    tracing::info!(accepted, "Stopped accepting interactions");

    if let Some(scheduler) = scheduler {
        scheduler.close(config.shutdown_grace).await;
    }
    limiter_registration.deregister().await;
    drop(limiter_sweep);
    registration_store.close().await;
    janitor.shutdown().await;
    durable.close().await;

    match tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, writer).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Cannot write output"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Output writer ended abnormally"),
        Err(_) => tracing::debug!("Output still referenced after shutdown"),
    }

    tracing::info!("Rollcall stopped");
    Ok(())
}

/// Handle group subcommands.
async fn cmd_group(config: &DaemonConfig, action: GroupAction) -> anyhow::Result<()> {
    let (admin, durable, janitor) = offline_admin(config).await?;

    match action {
        GroupAction::Init {
            group,
            channel,
            role,
            init_user,
            message,
            admin_channel,
        } => {
            admin
                .init_group(&GroupRegistrationConfig {
                    group_id: group,
                    channel_id: channel,
                    role_id: role,
                    init_user_id: init_user,
                    registered_message: message,
                    admin_channel_id: admin_channel,
                })
                .await?;
            println!("Registration enabled for guild {group}.");
            println!("Post the register button in <#{channel}> from a connected session.");
        }
        GroupAction::Clear { group } => {
            admin.clear_group(group).await?;
            println!("Done. All members have been removed from the database, but their roles stay.");
        }
        GroupAction::Show { group } => {
            let config = admin.group_config(group).await?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    janitor.shutdown().await;
    durable.close().await;
    Ok(())
}

/// Handle member subcommands.
async fn cmd_member(config: &DaemonConfig, action: MemberAction) -> anyhow::Result<()> {
    let (admin, durable, janitor) = offline_admin(config).await?;

    match action {
        MemberAction::Show { group, user } => {
            let profile = admin.query_member(group, user).await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        MemberAction::Unregister { group, user } => match admin.unregister_member(group, user).await {
            Ok(()) => println!("User {user} has been unregistered."),
            Err(AdminError::RoleNotRevoked(_)) => {
                let role = admin.group_config(group).await?.role_id;
                println!("User {user} has been unregistered.");
                println!("Remove role {role} from them manually; the platform is not reachable offline.");
            }
            Err(e) => return Err(e.into()),
        },
        MemberAction::ResetName { group, user } => {
            let profile = admin.query_member(group, user).await?;
            println!("{}", profile.metadata.nickname());
        }
    }

    janitor.shutdown().await;
    durable.close().await;
    Ok(())
}
