use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::{ElectionMethod, ElectionPollId, KeypadId, UserId};
use storage::Storage;

/// Provisioning for the keypad vote collector: participants, keypads, polls
/// and agenda items.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/votes.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateUser {
        username: String,
        full_name: String,
    },
    AddKeypad {
        keypad_id: String,
        #[arg(long)]
        user_id: Option<i64>,
        #[arg(long)]
        seat: Option<String>,
    },
    /// Hands a keypad to a participant, or makes it anonymous without `--user-id`.
    AssignKeypad {
        keypad_id: String,
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// Removes a keypad; its votes stay with the keypad reference cleared.
    DeleteKeypad {
        keypad_id: String,
    },
    ListKeypads,
    CreateMotionPoll {
        title: String,
    },
    CreateElection {
        title: String,
        /// One of `yes_no_abstain`, `yes_no`, `votes`.
        #[arg(long, default_value = "votes")]
        method: String,
    },
    AddCandidate {
        poll_id: i64,
        name: String,
        #[arg(long)]
        user_id: Option<i64>,
    },
    CreateAgendaItem {
        title: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let storage = Storage::new(&cli.database_url)
        .await
        .with_context(|| format!("failed to open {}", cli.database_url))?;

    match cli.command {
        Command::CreateUser {
            username,
            full_name,
        } => {
            let user_id = storage.create_user(&username, &full_name).await?;
            println!("created user_id={}", user_id.0);
        }
        Command::AddKeypad {
            keypad_id,
            user_id,
            seat,
        } => {
            let keypad = storage
                .create_keypad(&KeypadId::new(keypad_id), user_id.map(UserId), seat.as_deref())
                .await?;
            println!("created keypad {}", keypad.keypad_id);
        }
        Command::AssignKeypad { keypad_id, user_id } => {
            let keypad_id = KeypadId::new(keypad_id);
            if !storage.assign_keypad(&keypad_id, user_id.map(UserId)).await? {
                bail!("keypad {keypad_id} does not exist");
            }
            println!("assigned keypad {keypad_id}");
        }
        Command::DeleteKeypad { keypad_id } => {
            let keypad_id = KeypadId::new(keypad_id);
            if !storage.delete_keypad(&keypad_id).await? {
                bail!("keypad {keypad_id} does not exist");
            }
            println!("deleted keypad {keypad_id}");
        }
        Command::ListKeypads => {
            for keypad in storage.list_keypads().await? {
                println!(
                    "{}\tuser={}\tseat={}\tin_range={}\tbattery={}",
                    keypad.keypad_id,
                    keypad.user_id.map(|id| id.0.to_string()).unwrap_or_else(|| "-".into()),
                    keypad.seat_number.as_deref().unwrap_or("-"),
                    keypad.in_range,
                    keypad.battery_level
                );
            }
        }
        Command::CreateMotionPoll { title } => {
            let poll_id = storage.create_motion_poll(&title).await?;
            println!("created motion poll_id={}", poll_id.0);
        }
        Command::CreateElection { title, method } => {
            let Some(method) = ElectionMethod::parse(&method) else {
                bail!("unknown election method '{method}'");
            };
            let poll_id = storage.create_election_poll(&title, method).await?;
            println!("created election poll_id={}", poll_id.0);
        }
        Command::AddCandidate {
            poll_id,
            name,
            user_id,
        } => {
            let poll_id = ElectionPollId(poll_id);
            if storage.load_election_poll(poll_id).await?.is_none() {
                bail!("election {} does not exist", poll_id.0);
            }
            let candidate_id = storage
                .add_candidate(poll_id, user_id.map(UserId), &name)
                .await?;
            println!("created candidate_id={}", candidate_id.0);
        }
        Command::CreateAgendaItem { title } => {
            let item_id = storage.create_agenda_item(&title).await?;
            println!("created agenda item_id={}", item_id.0);
        }
    }

    Ok(())
}
