//! Test doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use parley_transport_protocol::{MessageContent, RawMessage};

use crate::responder::{Responder, ResponderError};
use crate::store::{CredentialResult, CredentialStore, Credentials};
use crate::transport::{Presence, Transport, TransportError, TransportEvent};

// ============================================================================
// MockTransport
// ============================================================================

#[derive(Default)]
struct TransportState {
    open: bool,
    events: Option<mpsc::Sender<TransportEvent>>,
    opens: u32,
    closes: u32,
    logouts: u32,
    last_open_credentials: Option<Credentials>,
    fail_next_open: bool,
    close_delay: Duration,
    send_failures: VecDeque<TransportError>,
    sent: Vec<(String, String)>,
    presences: Vec<(Presence, Option<String>)>,
}

/// In-memory transport. Events are injected with [`MockTransport::emit`].
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<TransportState>,
    opened: Notify,
    released: Notify,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport with a session already open, for tests that only send.
    pub fn connected() -> Arc<Self> {
        let transport = Self::new();
        transport.state.lock().unwrap().open = true;
        transport
    }

    /// Push an event into the current session. Returns `false` when no
    /// session is open.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let events = self.state.lock().unwrap().events.clone();
        match events {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Wait until `open` has been called at least `count` times.
    pub async fn wait_for_opens(&self, count: u32) {
        loop {
            let notified = self.opened.notified();
            if self.opens() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until `close` has completed at least `count` times.
    pub async fn wait_for_closes(&self, count: u32) {
        loop {
            let notified = self.released.notified();
            if self.closes() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Wait until `logout` has been called at least `count` times.
    pub async fn wait_for_logouts(&self, count: u32) {
        loop {
            let notified = self.released.notified();
            if self.logouts() >= count {
                return;
            }
            notified.await;
        }
    }

    /// Make every `close` take `delay` before the session is gone.
    pub fn slow_close(&self, delay: Duration) {
        self.state.lock().unwrap().close_delay = delay;
    }

    pub fn fail_next_open(&self) {
        self.state.lock().unwrap().fail_next_open = true;
    }

    pub fn fail_next_send(&self, error: TransportError) {
        self.state.lock().unwrap().send_failures.push_back(error);
    }

    pub fn opens(&self) -> u32 {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> u32 {
        self.state.lock().unwrap().closes
    }

    pub fn logouts(&self) -> u32 {
        self.state.lock().unwrap().logouts
    }

    pub fn last_open_credentials(&self) -> Option<Credentials> {
        self.state.lock().unwrap().last_open_credentials.clone()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn presences(&self) -> Vec<(Presence, Option<String>)> {
        self.state.lock().unwrap().presences.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        credentials: Option<Credentials>,
    ) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state.last_open_credentials = credentials;
            if std::mem::take(&mut state.fail_next_open) {
                state.open = false;
                state.events = None;
                Err(TransportError::Spawn(std::io::Error::other(
                    "mock transport refused to open",
                )))
            } else {
                let (tx, rx) = mpsc::channel(64);
                state.open = true;
                state.events = Some(tx);
                Ok(rx)
            }
        };
        self.opened.notify_waiters();
        result
    }

    async fn send(&self, address: &str, text: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.send_failures.pop_front() {
            return Err(error);
        }
        if !state.open {
            return Err(TransportError::NotOpen);
        }
        state.sent.push((address.to_string(), text.to_string()));
        Ok(())
    }

    async fn set_presence(
        &self,
        presence: Presence,
        address: Option<&str>,
    ) -> Result<(), TransportError> {
        self.state
            .lock()
            .unwrap()
            .presences
            .push((presence, address.map(str::to_string)));
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.state.lock().unwrap().logouts += 1;
        self.released.notify_waiters();
        Ok(())
    }

    async fn close(&self) {
        let delay = self.state.lock().unwrap().close_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.state.lock().unwrap();
            state.closes += 1;
            state.open = false;
            state.events = None;
        }
        self.released.notify_waiters();
    }
}

// ============================================================================
// MemoryCredentialStore
// ============================================================================

#[derive(Default)]
pub struct MemoryCredentialStore {
    current: Mutex<Option<Credentials>>,
    clears: Mutex<u32>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Option<Credentials>) -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(credentials),
            clears: Mutex::new(0),
        })
    }

    pub fn current(&self) -> Option<Credentials> {
        self.current.lock().unwrap().clone()
    }

    pub fn clears(&self) -> u32 {
        *self.clears.lock().unwrap()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> CredentialResult<Option<Credentials>> {
        Ok(self.current())
    }

    async fn save(&self, credentials: &Credentials) -> CredentialResult<()> {
        *self.current.lock().unwrap() = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> CredentialResult<()> {
        *self.current.lock().unwrap() = None;
        *self.clears.lock().unwrap() += 1;
        Ok(())
    }
}

// ============================================================================
// ScriptedResponder
// ============================================================================

enum Script {
    /// Reply with the given prefix followed by the input.
    Echo(String),
    Fail,
}

/// Responder that records every call and answers from a script.
pub struct ScriptedResponder {
    script: Script,
    calls: Mutex<Vec<(String, String)>>,
    origins: Mutex<Vec<String>>,
    forgets: Mutex<Vec<Option<String>>>,
}

impl ScriptedResponder {
    pub fn echo(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::Echo(prefix.to_string()),
            calls: Mutex::new(Vec::new()),
            origins: Mutex::new(Vec::new()),
            forgets: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: Script::Fail,
            calls: Mutex::new(Vec::new()),
            origins: Mutex::new(Vec::new()),
            forgets: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    /// Ids of the messages that opened each answered batch.
    pub fn origins(&self) -> Vec<String> {
        self.origins.lock().unwrap().clone()
    }

    pub fn forgets(&self) -> Vec<Option<String>> {
        self.forgets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Responder for ScriptedResponder {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn respond(&self, conversation_id: &str, text: &str) -> Result<String, ResponderError> {
        self.calls
            .lock()
            .unwrap()
            .push((conversation_id.to_string(), text.to_string()));
        match &self.script {
            Script::Echo(prefix) => Ok(format!("{prefix}{text}")),
            Script::Fail => Err(ResponderError::Api {
                status: 500,
                message: "scripted failure".to_string(),
            }),
        }
    }

    async fn respond_to(&self, origin: &RawMessage, text: &str) -> Result<String, ResponderError> {
        self.origins.lock().unwrap().push(origin.id.clone());
        self.respond(&origin.conversation_id, text).await
    }

    fn forget(&self, conversation_id: Option<&str>) -> usize {
        self.forgets
            .lock()
            .unwrap()
            .push(conversation_id.map(str::to_string));
        1
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Plain text message from someone else.
pub fn text_message(id: &str, conversation_id: &str, text: &str) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        conversation_id: conversation_id.to_string(),
        from_me: false,
        push_name: None,
        timestamp: None,
        content: Some(MessageContent::Conversation {
            text: text.to_string(),
        }),
    }
}

/// Serve `app` on an ephemeral local port and return its base URL.
#[cfg(feature = "server")]
pub async fn serve_router(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
