pub mod buffer;
pub mod messages;
pub mod node;
pub mod raw_message;

pub use messages::*;
pub use node::{Network, NodeService, NodeServiceSet};
pub use raw_message::{Command, Header, RawMessage, HEADER_SIZE};
