//! chat-graph administrative CLI
//!
//! Local front end over the services, printing JSON results.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database and a default config
//! chat-graph init
//!
//! # Register users
//! chat-graph user register --nickname Alice --subject alice
//! chat-graph user register --nickname Bob --subject bob
//!
//! # Befriend: the second request reconciles the first
//! chat-graph friend request alice bob
//! chat-graph friend request bob alice
//!
//! # Groups
//! chat-graph group create --name hikers --created-by alice
//! chat-graph group publish 1
//! chat-graph group join bob 1
//!
//! # Messages are gated by the graph
//! chat-graph message private alice bob "hello"
//! chat-graph message broadcast alice "maintenance at noon"
//!
//! # Use a different database
//! chat-graph --database /tmp/graph.db stats
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_graph::services::events::spawn_logging_listener;
use chat_graph::{
    Config, Context, CreateGroupInput, Database, EmptyListPolicy, GraphError, GroupType, Services,
};

#[derive(Parser, Debug)]
#[command(name = "chat-graph")]
#[command(about = "Social-graph store for chat backends")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CHAT_GRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long, env = "CHAT_GRAPH_DATABASE")]
    database: Option<PathBuf>,

    /// Write lock wait in milliseconds
    #[arg(long)]
    busy_timeout_ms: Option<u64>,

    /// Return empty lists instead of not-found errors
    #[arg(long)]
    allow_empty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and write a default config if none exists
    Init,
    /// Row counts per table
    Stats,
    #[command(subcommand)]
    User(UserCommand),
    #[command(subcommand)]
    Friend(FriendCommand),
    #[command(subcommand)]
    Group(GroupCommand),
    #[command(subcommand)]
    Message(MessageCommand),
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Register {
        #[arg(long)]
        nickname: String,
        /// Subject from an identity provider; generated when absent
        #[arg(long)]
        subject: Option<String>,
    },
    Get {
        subject: String,
    },
    Delete {
        subject: String,
    },
}

#[derive(Subcommand, Debug)]
enum FriendCommand {
    /// Send a friend request
    Request { sender: String, receiver: String },
    Agree { id: i64, approver: String },
    Refuse { id: i64, approver: String },
    /// Requests sent by a user
    Sent { subject: String },
    /// Requests received by a user
    Received { subject: String },
    List { subject: String },
    Remove { a: String, b: String },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "default")]
        group_type: String,
        #[arg(long)]
        created_by: String,
    },
    Get {
        id: i64,
    },
    Delete {
        id: i64,
    },
    Publish {
        id: i64,
    },
    Unpublish {
        id: i64,
    },
    Members {
        id: i64,
    },
    /// Invite a user into a group
    Invite {
        sender: String,
        receiver: String,
        group_id: i64,
    },
    AcceptInvite {
        id: i64,
    },
    DeclineInvite {
        id: i64,
    },
    /// Ask to join a public group
    Join {
        sender: String,
        group_id: i64,
    },
    Approve {
        id: i64,
        approver: String,
    },
    Reject {
        id: i64,
        approver: String,
    },
    Requests {
        group_id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum MessageCommand {
    /// Message a friend
    Private {
        sender: String,
        receiver: String,
        content: String,
    },
    /// Message a group the sender belongs to
    Group {
        sender: String,
        group_id: i64,
        content: String,
    },
    /// Conversation between two users
    History { a: String, b: String },
    /// Messages posted to a group
    GroupHistory { group_id: i64 },
    /// Message every user
    Broadcast { sender: String, content: String },
    /// Broadcasts, optionally from one sender
    Broadcasts {
        #[arg(long)]
        sender: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let mut config = if config_path.exists() {
        Config::load(&config_path)
            .with_context(|| format!("loading config from {}", config_path.display()))?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(path) = args.database.clone() {
        config.database_path = path;
    }
    if let Some(ms) = args.busy_timeout_ms {
        config.busy_timeout_ms = ms;
    }
    if args.allow_empty {
        config.empty_list_policy = EmptyListPolicy::Empty;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.log_filter.parse()?))
        .init();

    info!(
        database = %config.database_path.display(),
        busy_timeout_ms = config.busy_timeout_ms,
        "Starting chat-graph"
    );

    if matches!(args.command, Command::Init) && !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(Database::from_config(&config)?);
    let services = Services::from_config(db, &config);

    // Logs committed graph events until the services, and with them the bus, are dropped
    let listener = spawn_logging_listener(Arc::clone(&services.events));

    let outcome = tokio::task::spawn_blocking(move || run(services, args.command)).await?;
    listener.await?;

    if let Err(err) = outcome {
        print_error(&err)?;
        std::process::exit(1);
    }
    Ok(())
}

fn run(services: Services, command: Command) -> Result<(), GraphError> {
    let ctx = Context::new();
    match command {
        Command::Init | Command::Stats => print_json(&services.db.stats(&ctx)?),
        Command::User(cmd) => run_user(&services, &ctx, cmd),
        Command::Friend(cmd) => run_friend(&services, &ctx, cmd),
        Command::Group(cmd) => run_group(&services, &ctx, cmd),
        Command::Message(cmd) => run_message(&services, &ctx, cmd),
    }
}

fn run_user(services: &Services, ctx: &Context, cmd: UserCommand) -> Result<(), GraphError> {
    match cmd {
        UserCommand::Register { nickname, subject } => {
            let user = match subject {
                Some(subject) => services
                    .users
                    .register_user_with_subject(ctx, &subject, &nickname)?,
                None => services.users.register_user(ctx, &nickname)?,
            };
            print_json(&user)
        }
        UserCommand::Get { subject } => print_json(&services.users.get_user(ctx, &subject)?),
        UserCommand::Delete { subject } => {
            services.users.delete_user(ctx, &subject)?;
            print_json(&serde_json::json!({ "deleted": subject }))
        }
    }
}

fn run_friend(services: &Services, ctx: &Context, cmd: FriendCommand) -> Result<(), GraphError> {
    let friends = &services.friends;
    match cmd {
        FriendCommand::Request { sender, receiver } => {
            print_json(&friends.create_friend_request(ctx, &sender, &receiver)?)
        }
        FriendCommand::Agree { id, approver } => {
            print_json(&friends.agree_friend_request(ctx, id, &approver)?)
        }
        FriendCommand::Refuse { id, approver } => {
            print_json(&friends.refuse_friend_request(ctx, id, &approver)?)
        }
        FriendCommand::Sent { subject } => print_json(&friends.friend_requests_from(ctx, &subject)?),
        FriendCommand::Received { subject } => {
            print_json(&friends.friend_requests_to(ctx, &subject)?)
        }
        FriendCommand::List { subject } => print_json(&friends.list_friends(ctx, &subject)?),
        FriendCommand::Remove { a, b } => {
            friends.remove_friend(ctx, &a, &b)?;
            print_json(&serde_json::json!({ "removed": [a, b] }))
        }
    }
}

fn run_group(services: &Services, ctx: &Context, cmd: GroupCommand) -> Result<(), GraphError> {
    let groups = &services.groups;
    let membership = &services.membership;
    match cmd {
        GroupCommand::Create {
            name,
            group_type,
            created_by,
        } => {
            let group_type: GroupType = group_type.parse()?;
            print_json(&groups.create_group(
                ctx,
                CreateGroupInput {
                    name,
                    group_type,
                    created_by,
                },
            )?)
        }
        GroupCommand::Get { id } => print_json(&groups.get_group(ctx, id)?),
        GroupCommand::Delete { id } => {
            groups.delete_group(ctx, id)?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
        GroupCommand::Publish { id } => {
            groups.make_public(ctx, id)?;
            print_json(&groups.get_group(ctx, id)?)
        }
        GroupCommand::Unpublish { id } => {
            groups.make_private(ctx, id)?;
            print_json(&groups.get_group(ctx, id)?)
        }
        GroupCommand::Members { id } => print_json(&groups.list_members(ctx, id)?),
        GroupCommand::Invite {
            sender,
            receiver,
            group_id,
        } => print_json(&membership.create_group_invitation(ctx, &sender, &receiver, group_id)?),
        GroupCommand::AcceptInvite { id } => print_json(&membership.agree_group_invitation(ctx, id)?),
        GroupCommand::DeclineInvite { id } => {
            print_json(&membership.refuse_group_invitation(ctx, id)?)
        }
        GroupCommand::Join { sender, group_id } => {
            print_json(&membership.create_group_request(ctx, &sender, group_id)?)
        }
        GroupCommand::Approve { id, approver } => {
            print_json(&membership.agree_group_request(ctx, id, &approver)?)
        }
        GroupCommand::Reject { id, approver } => {
            print_json(&membership.refuse_group_request(ctx, id, &approver)?)
        }
        GroupCommand::Requests { group_id } => {
            print_json(&membership.group_requests_to(ctx, group_id)?)
        }
    }
}

fn run_message(services: &Services, ctx: &Context, cmd: MessageCommand) -> Result<(), GraphError> {
    let records = &services.records;
    match cmd {
        MessageCommand::Private {
            sender,
            receiver,
            content,
        } => print_json(&records.send_private(ctx, &sender, &receiver, &content)?),
        MessageCommand::Group {
            sender,
            group_id,
            content,
        } => print_json(&records.send_group(ctx, &sender, group_id, &content)?),
        MessageCommand::History { a, b } => print_json(&records.private_records(ctx, &a, &b)?),
        MessageCommand::GroupHistory { group_id } => {
            print_json(&records.group_records(ctx, group_id)?)
        }
        MessageCommand::Broadcast { sender, content } => {
            print_json(&records.send_broadcast(ctx, &sender, &content)?)
        }
        MessageCommand::Broadcasts { sender } => {
            print_json(&records.broadcast_records(ctx, sender.as_deref())?)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), GraphError> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| GraphError::Internal(format!("Failed to serialize output: {}", e)))?;
    println!("{}", out);
    Ok(())
}

fn print_error(err: &GraphError) -> anyhow::Result<()> {
    eprintln!("{}", serde_json::to_string_pretty(&err.to_response())?);
    Ok(())
}
