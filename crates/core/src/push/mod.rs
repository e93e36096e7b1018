//! Push session: authentication, stream ownership, reconnection

pub mod ports;
pub mod push_manager;
pub mod stream_handler;

pub use ports::{AuthApi, EventSourceClient};
pub use push_manager::{PushManager, PushState};
pub use stream_handler::{build_url, StreamHandler};
