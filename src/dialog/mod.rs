pub mod controller;
pub mod event;
pub mod session;

pub use controller::{handle_event, DialogDeps, Disposition, HandleResult, LogNote};
pub use event::{
    ButtonAction, Command, EventPayload, IncomingEvent, OutgoingReply, ReplyButton,
};
pub use session::{normalize_site_id, DialogState, Session};
