//! Mantaray IRC SDK
//!
//! The protocol and session core of the mantaray IRC client, with no UI
//! dependencies. A front end connects with [`client::connect`] (or several
//! servers through [`manager::Client`]), feeds typed lines through
//! [`input::parse_input`], and renders [`event::Event`]s with [`view`].
//!
//! # Modules
//!
//! - [`client`] - One server connection: transport, registration, keepalive, reconnect
//! - [`manager`] - Multi-server registry with a merged event stream
//! - [`irc`] - IRC message parsing/formatting
//! - [`dispatch`] - Parsed lines to typed variants, session updates and events
//! - [`casemap`] - RFC 1459 case-insensitive names
//! - [`session`] - Channels, members, topics and private threads
//! - [`style`] - mIRC color and underline codes
//! - [`url`] - URL detection in message text
//! - [`view`] - Tagged text spans for rendering
//! - [`input`] - User input and slash commands
//! - [`config`] - Server settings and the TOML config file

pub mod casemap;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod input;
pub mod irc;
pub mod manager;
pub mod session;
pub mod style;
pub mod url;
pub mod view;

pub use error::{Error, Result};
