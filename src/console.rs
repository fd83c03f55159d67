//! Local operator console.
//!
//! Reads commands from stdin on behalf of a single admin operator, renders
//! replies to stdout and writes screenshot attachments to disk. There is no
//! audience to vote, so reset votes on the console always fail.

use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::error::{DeskError, Result};
use crate::frontend::{
    Attachment, AuthLevel, DeskCommand, LiveToggle, LocationId, LocationPermissions, MessageId,
    MessageRef, Messenger, Request, Requester, RequesterId,
};
use crate::session::SessionController;

/// Location the operator's commands are issued from.
pub const CONSOLE_LOCATION: LocationId = LocationId(0);

const COMMAND_HELP: &str = r#"Commands:
  reset                  Restore the snapshot now
  vote-reset             Open a reset vote
  screenshot             Capture the screen
  live on|off            Start or stop the live stream
  keys                   List named keys
  key <spec>             Press a key, e.g. a, A, enter, ctrl+alt+del
"#;

const POINTER_HELP: &str = r#"  mouse <x> <y> [sx sy]  Move the pointer (-100..100) and scroll
  click <button>         Click left/right/middle
  press <button>         Hold a button down
  release                Release all buttons
"#;

/// Command summary; pointer commands are listed only when the desktop
/// accepts them.
pub fn help_text(pointer: bool) -> String {
    let mut help = COMMAND_HELP.to_string();
    if pointer {
        help.push_str(POINTER_HELP);
    }
    help.push_str("  help                   Show this help\n");
    help
}

/// The operator at `level`, issuing from the console location.
pub fn operator(level: AuthLevel) -> Requester {
    Requester {
        id: RequesterId(0),
        level,
        location: CONSOLE_LOCATION,
    }
}

/// Parse one console line into a command.
pub fn parse_command(line: &str) -> Result<DeskCommand> {
    let mut words = line.split_whitespace();
    let name = words.next().unwrap_or_default();
    let args: Vec<&str> = words.collect();

    let usage = |text: &str| DeskError::Validation(format!("Usage: {}", text));
    let number = |arg: &str| {
        arg.parse::<i32>()
            .map_err(|_| DeskError::Validation(format!("Not a number: `{}`", arg)))
    };

    match (name, args.as_slice()) {
        ("reset", []) => Ok(DeskCommand::Reset),
        ("vote-reset", []) | ("vote", ["reset"]) => Ok(DeskCommand::VoteReset),
        ("screenshot", []) => Ok(DeskCommand::Screenshot),
        ("live", ["on"]) => Ok(DeskCommand::Live(LiveToggle::On)),
        ("live", ["off"]) => Ok(DeskCommand::Live(LiveToggle::Off)),
        ("live", _) => Err(usage("live on|off")),
        ("keys", []) | ("list-keys", []) => Ok(DeskCommand::ListKeys),
        ("mouse", [x, y]) => Ok(DeskCommand::Mouse {
            dx: number(x)?,
            dy: number(y)?,
            dz: 0,
            dw: 0,
        }),
        ("mouse", [x, y, sx, sy]) => Ok(DeskCommand::Mouse {
            dx: number(x)?,
            dy: number(y)?,
            dz: number(sx)?,
            dw: number(sy)?,
        }),
        ("mouse", _) => Err(usage("mouse <x> <y> [sx sy]")),
        ("click", [button]) => Ok(DeskCommand::Click {
            button: button.to_string(),
        }),
        ("press", [button]) => Ok(DeskCommand::Press {
            button: button.to_string(),
        }),
        ("release", []) => Ok(DeskCommand::Release),
        ("key", [spec]) => Ok(DeskCommand::Key {
            spec: spec.to_string(),
        }),
        ("key", _) => Err(usage("key <spec>")),
        _ => Err(DeskError::Validation(format!(
            "Unknown command `{}`, try `help`",
            line.trim()
        ))),
    }
}

/// Renders messages to stdout and attachments into `out_dir`.
#[derive(Debug)]
pub struct ConsoleMessenger {
    out_dir: PathBuf,
    next_id: AtomicU64,
}

impl ConsoleMessenger {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl Messenger for ConsoleMessenger {
    async fn send(
        &self,
        location: LocationId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<MessageRef> {
        let id = MessageId(self.next_id.fetch_add(1, Ordering::SeqCst));
        if !content.is_empty() {
            println!("[#{}] {}", id.0, content);
        }
        if let Some(attachment) = attachment {
            let path = self.out_dir.join(format!("{}-{}", id.0, attachment.filename));
            tokio::fs::write(&path, &attachment.bytes).await?;
            println!("[#{}] saved {}", id.0, path.display());
        }
        Ok(MessageRef { location, id })
    }

    async fn edit(&self, message: &MessageRef, content: &str) -> Result<()> {
        println!("[#{}] {}", message.id.0, content);
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        debug!(message = message.id.0, "Superseded");
        Ok(())
    }

    async fn add_reaction(&self, _message: &MessageRef, _emoji: &str) -> Result<()> {
        Ok(())
    }

    async fn reaction_count(&self, _message: &MessageRef, _emoji: &str) -> Result<u32> {
        Ok(0)
    }
}

/// The operator is an admin and never cooled down, so there is nothing to
/// install.
#[derive(Debug, Default)]
pub struct ConsolePermissions;

#[async_trait]
impl LocationPermissions for ConsolePermissions {
    async fn deny(&self, requester: RequesterId, location: LocationId) -> Result<()> {
        debug!(requester = %requester, location = %location, "Deny ignored on console");
        Ok(())
    }

    async fn revoke(&self, requester: RequesterId, location: LocationId) -> Result<()> {
        debug!(requester = %requester, location = %location, "Revoke ignored on console");
        Ok(())
    }
}

/// Read commands from stdin until EOF or `shutdown` resolves.
///
/// Each command runs in its own task so a reset or vote does not block the
/// prompt.
pub async fn run<F>(
    controller: Arc<SessionController>,
    operator: Requester,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    tokio::pin!(shutdown);
    let help = help_text(controller.supports_pointer());
    println!("{}", help);

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            info!("Console closed");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "help" {
            println!("{}", help);
            continue;
        }

        match parse_command(line) {
            Ok(command) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    if controller
                        .dispatch(Request::new(operator, command))
                        .await
                        .is_ok()
                    {
                        println!("ok");
                    }
                });
            }
            Err(e) => println!("{}", e),
        }
    }
    Ok(())
}
