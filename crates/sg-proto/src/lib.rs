pub mod reply;
pub mod request;

pub use reply::{
    ReplyData, SymbolLine, render_error, render_json, render_message, render_ping, render_reply,
};
pub use request::{Command, Envelope, Protocol, ScanRequest};
