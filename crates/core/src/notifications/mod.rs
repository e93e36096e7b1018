//! Stream notification handling: parsing, routing, control bookkeeping

pub mod keeper;
pub mod parser;
pub mod processor;

pub use keeper::NotificationManagerKeeper;
pub use parser::NotificationParser;
pub use processor::NotificationProcessor;
