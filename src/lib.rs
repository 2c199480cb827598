//! Embeddable HTTP/1.1 and HTTP/2 (h2c) transport based on `tokio` tools
//!
//! A `ConnectorFactory` owns the event loop. It creates `ServerConnector`s
//! that dispatch requests to a `Handler` running on a thread pool and
//! `HttpClientConnector`s that send requests. Message bodies flow through
//! `StreamingMessageBuffer`s and every connection enforces an idle
//! timeout.
#![recursion_limit="100"]

#[macro_use(quick_error)] extern crate quick_error;
#[macro_use] extern crate log;

pub mod buffer;
pub mod client;
pub mod config;
pub mod connection;
pub mod exchange;
pub mod http1;
pub mod http2;
pub mod server;
pub mod watchdog;
mod chunk;
mod enums;
mod error;
mod factory;
mod headers;
mod message;
mod simple_error_page;
mod timer;

pub use buffer::{Pull, StreamingMessageBuffer};
pub use chunk::{Chunk, ChunkSource};
pub use client::{HttpClientConnector, Request, Response, ResponseFuture};
pub use config::{FactoryConfig, ListenerConfig, Scheme, SenderConfig};
pub use connection::{ConnectionManager, Protocol, Role};
pub use enums::{Status, Version};
pub use error::{Error, ErrorKind};
pub use exchange::{Exchange, ExchangeStatus, StreamId};
pub use factory::ConnectorFactory;
pub use headers::Headers;
pub use message::{Message, RequestHead, ResponseHead};
pub use server::{BodyWriter, Handler, Responder, ServerConnector,
                 ServerConnectorFuture};
pub use simple_error_page::SimpleErrorPage;
pub use watchdog::{IdleTimeoutWatchdog, WatchdogState};
