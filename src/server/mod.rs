pub mod commands;
pub mod connection_session;
pub mod dashboard_api;
pub mod network;
pub mod payload_cursor;
pub mod protocol;
pub mod routing;
pub mod socket_network;
