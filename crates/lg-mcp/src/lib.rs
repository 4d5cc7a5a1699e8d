pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{load_descriptors_from_yaml, McpManager, McpServerDescriptor, TransportDescriptor};
pub use transport::Transport;
