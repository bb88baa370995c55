// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control plane: remote access to a [`VirtualMachine`](crate::VirtualMachine).

pub mod client;
pub mod protocol;
pub mod stream;

use crate::service::protocol::ProtocolError;
use std::path::Path;

pub use client::StreamClient;
pub use stream::StreamServer;

/// Default path of the stream server socket.
pub const STREAM_SERVER_PATH: &str = "/tmp/nullvm_stream_server";

/// Identifies one accepted connection of a transport.
pub type ConnectionId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Datagram,
}

#[derive(Debug, thiserror::Error, displaydoc::Display)]
pub enum TransportError {
    /// Transport kind {0:?} is not supported
    Unsupported(TransportKind),
    /// Transport is not initialized
    NotInitialized,
    /// Unknown connection {0}
    UnknownConnection(ConnectionId),
    /// Socket error: {0}
    Socket(#[source] std::io::Error),
    /// Protocol error: {0}
    Protocol(#[source] ProtocolError),
}

/// A server side control-plane endpoint.
pub trait Transport {
    /// Acquire the endpoint so that peers can connect.
    fn init(&mut self) -> Result<(), TransportError>;
    /// Send one message to `connection`.
    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError>;
    /// Receive one message from `connection`.
    fn recv(&mut self, connection: ConnectionId) -> Result<Vec<u8>, TransportError>;
    /// Serve peers until asked to stop.
    fn run(&mut self) -> Result<(), TransportError>;
}

/// Create the transport of `kind` listening at `path`, serving a VM whose serial console
/// writes to stdout.
pub fn create_transport(
    kind: TransportKind,
    path: &Path,
) -> Result<Box<dyn Transport + Send>, TransportError> {
    match kind {
        TransportKind::Stream => Ok(Box::new(StreamServer::new(
            path,
            crate::VirtualMachine::new(),
        ))),
        TransportKind::Datagram => Err(TransportError::Unsupported(kind)),
    }
}
