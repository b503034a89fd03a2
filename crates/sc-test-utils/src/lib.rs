//! Test doubles shared across the workspace's integration suites.

pub mod mock_delivery_server;
pub mod mock_ws_client;

pub use mock_delivery_server::{DeliveryBehavior, MockDeliveryServer};
pub use mock_ws_client::MockWsClient;
