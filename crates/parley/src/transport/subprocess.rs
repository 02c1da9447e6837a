//! Subprocess transport.
//!
//! Runs an external transport program per session generation and talks to it
//! with JSON Lines over stdio: [`TransportCommand`]s go to its stdin,
//! [`TransportEvent`]s come back on its stdout. Stderr is inherited so the
//! program's own logs end up next to ours.
//!
//! Commands that carry a `request_id` (send, logout) are acknowledged by a
//! `command_result` event. Those acknowledgements are routed to the waiting
//! caller and never forwarded to the event stream.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_transport_protocol::{CommandResultData, TransportCommand};

use super::{Presence, Transport, TransportError, TransportEvent};
use crate::store::Credentials;

/// Capacity of the per-session event channel.
const EVENT_BUFFER: usize = 256;

/// How long a closed child gets to exit before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

type PendingAcks = Arc<DashMap<String, oneshot::Sender<CommandResultData>>>;

struct ChildSession {
    child: Child,
    stdin: ChildStdin,
    pending: PendingAcks,
    reader: JoinHandle<()>,
}

/// Transport backed by an external program speaking JSON Lines.
pub struct SubprocessTransport {
    command: String,
    args: Vec<String>,
    ack_timeout: Duration,
    session: Mutex<Option<ChildSession>>,
}

impl SubprocessTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>, ack_timeout: Duration) -> Self {
        Self {
            command: command.into(),
            args,
            ack_timeout,
            session: Mutex::new(None),
        }
    }

    /// Send a command that expects a `command_result` and wait for it.
    async fn request(
        &self,
        build: impl FnOnce(String) -> TransportCommand,
    ) -> Result<(), TransportError> {
        let request_id = ulid::Ulid::new().to_string();
        let (ack_tx, ack_rx) = oneshot::channel();

        let pending = {
            let mut guard = self.session.lock().await;
            let session = guard.as_mut().ok_or(TransportError::NotOpen)?;
            session.pending.insert(request_id.clone(), ack_tx);
            if let Err(e) = write_command(&mut session.stdin, &build(request_id.clone())).await {
                session.pending.remove(&request_id);
                return Err(e);
            }
            session.pending.clone()
        };

        match tokio::time::timeout(self.ack_timeout, ack_rx).await {
            Ok(Ok(result)) if result.ok => Ok(()),
            Ok(Ok(result)) => Err(TransportError::Rejected {
                status_code: result.status_code,
                message: result
                    .error
                    .unwrap_or_else(|| "request failed".to_string()),
            }),
            // Reader dropped the ack: the child went away.
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                pending.remove(&request_id);
                Err(TransportError::Timeout)
            }
        }
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn open(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.close().await;

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(TransportError::Spawn)?;
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(TransportError::Spawn(std::io::Error::other(
                "transport stdio was not captured",
            )));
        };
        info!(command = %self.command, pid = ?child.id(), "Transport process started");

        let pending: PendingAcks = Arc::new(DashMap::new());
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_events(stdout, events_tx, pending.clone()));

        let open = TransportCommand::Open {
            credentials: credentials.map(|c| c.0),
        };
        if let Err(e) = write_command(&mut stdin, &open).await {
            reader.abort();
            return Err(e);
        }

        *self.session.lock().await = Some(ChildSession {
            child,
            stdin,
            pending,
            reader,
        });
        Ok(events_rx)
    }

    async fn send(&self, address: &str, text: &str) -> Result<(), TransportError> {
        self.request(|request_id| TransportCommand::Send {
            request_id,
            address: address.to_string(),
            text: text.to_string(),
        })
        .await
    }

    async fn set_presence(
        &self,
        presence: Presence,
        address: Option<&str>,
    ) -> Result<(), TransportError> {
        let mut guard = self.session.lock().await;
        let session = guard.as_mut().ok_or(TransportError::NotOpen)?;
        let command = TransportCommand::Presence {
            presence,
            address: address.map(str::to_string),
        };
        write_command(&mut session.stdin, &command).await
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.request(|request_id| TransportCommand::Logout { request_id })
            .await
    }

    async fn close(&self) {
        let Some(session) = self.session.lock().await.take() else {
            return;
        };
        let ChildSession {
            mut child,
            mut stdin,
            pending,
            reader,
        } = session;

        if let Err(e) = write_command(&mut stdin, &TransportCommand::Close).await {
            debug!(error = %e, "Close command not delivered");
        }
        drop(stdin);

        match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!(%status, "Transport process exited"),
            Ok(Err(e)) => warn!(error = %e, "Failed to wait for transport process"),
            Err(_) => {
                warn!("Transport process did not exit, killing");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill transport process");
                }
            }
        }

        reader.abort();
        pending.clear();
    }
}

/// Serialize a command as one JSON line and flush it.
async fn write_command(
    stdin: &mut ChildStdin,
    command: &TransportCommand,
) -> Result<(), TransportError> {
    let mut line = serde_json::to_vec(command)?;
    line.push(b'\n');
    stdin.write_all(&line).await?;
    stdin.flush().await?;
    Ok(())
}

/// Forward events from the child's stdout until it closes.
async fn read_events(
    stdout: ChildStdout,
    events: mpsc::Sender<TransportEvent>,
    pending: PendingAcks,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Transport stdout closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read transport stdout");
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<TransportEvent>(line) {
            Ok(TransportEvent::CommandResult(result)) => {
                match pending.remove(&result.request_id) {
                    Some((_, ack)) => {
                        let _ = ack.send(result);
                    }
                    None => debug!(request_id = %result.request_id, "Unmatched command result"),
                }
            }
            Ok(event) => {
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring malformed transport line"),
        }
    }

    // Waiting callers get ConnectionClosed.
    pending.clear();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use parley_transport_protocol::{ConnectionPhase, ConnectionUpdate};

    /// A tiny transport: reports open, acknowledges sends (rejecting one
    /// address), and exits on close.
    const SCRIPT: &str = r#"
printf '%s\n' '{"type":"connection_update","data":{"phase":"open"}}'
while IFS= read -r line; do
  case "$line" in
    *'"type":"send"'*)
      id=$(printf '%s' "$line" | sed 's/.*"request_id":"\([^"]*\)".*/\1/')
      case "$line" in
        *'"address":"bad'*)
          printf '{"type":"command_result","data":{"request_id":"%s","ok":false,"error":"Connection Closed","status_code":428}}\n' "$id" ;;
        *)
          printf '{"type":"command_result","data":{"request_id":"%s","ok":true}}\n' "$id" ;;
      esac ;;
    *'"type":"close"'*) exit 0 ;;
  esac
done
"#;

    fn script_transport() -> SubprocessTransport {
        SubprocessTransport::new(
            "sh",
            vec!["-c".to_string(), SCRIPT.to_string()],
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn send_without_session_is_not_open() {
        let transport = script_transport();
        let err = transport.send("x@s.whatsapp.net", "hi").await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn exchanges_json_lines_with_child() {
        let transport = script_transport();
        let mut events = transport.open(None).await.unwrap();

        let first = events.recv().await.unwrap();
        assert_eq!(
            first,
            TransportEvent::ConnectionUpdate(ConnectionUpdate {
                phase: Some(ConnectionPhase::Open),
                ..Default::default()
            })
        );

        transport
            .send("51987654321@s.whatsapp.net", "hello")
            .await
            .unwrap();

        let err = transport
            .send("bad@s.whatsapp.net", "hello")
            .await
            .unwrap_err();
        assert!(err.is_connection_error());

        transport.close().await;
        assert!(events.recv().await.is_none());
        assert!(matches!(
            transport.send("x@s.whatsapp.net", "hi").await,
            Err(TransportError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let transport =
            SubprocessTransport::new("/nonexistent/parley-transport", vec![], Duration::from_secs(1));
        let err = transport.open(None).await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_)));
    }
}
