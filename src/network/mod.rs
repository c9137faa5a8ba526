pub mod bridge;
pub mod ipam;
pub mod manager;

pub use manager::{Endpoint, Network, NetworkManager};
