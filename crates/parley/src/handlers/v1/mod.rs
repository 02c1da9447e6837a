mod messages;
mod session;
mod status;

pub use messages::{reset_responder, send_message};
pub use session::{clear_session, initialize, reset_challenge_window, set_auto_reply};
pub use status::{conversations, stats, status};
