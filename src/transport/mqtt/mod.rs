//! MQTT implementation of [`crate::transport::Transport`]
//!
//! Split the same way as the rest of the transport code: pure configuration
//! in [`connection`], pure event routing in [`message_handler`], and the
//! I/O-performing supervisor in [`client`].

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, ConnectionState};
pub use message_handler::{EventRoute, MessageHandler};
