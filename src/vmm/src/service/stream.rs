// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::service::protocol::{self, Request, Response};
use crate::service::{ConnectionId, Transport, TransportError};
use crate::VirtualMachine;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};

/// Unix-domain stream socket server driving one VM.
///
/// Connections are served one at a time, each until the peer disconnects. A `Shutdown`
/// request ends `run()`.
pub struct StreamServer {
    path: PathBuf,
    listener: Option<UnixListener>,
    connections: HashMap<ConnectionId, UnixStream>,
    next_connection: ConnectionId,
    machine: VirtualMachine,
}

impl StreamServer {
    pub fn new<P: AsRef<Path>>(path: P, machine: VirtualMachine) -> Self {
        StreamServer {
            path: path.as_ref().to_path_buf(),
            listener: None,
            connections: HashMap::new(),
            next_connection: 0,
            machine,
        }
    }

    fn connection(&mut self, connection: ConnectionId) -> Result<&mut UnixStream, TransportError> {
        self.connections
            .get_mut(&connection)
            .ok_or(TransportError::UnknownConnection(connection))
    }

    /// Apply `request` to the VM. The flag is set when the server must stop.
    fn handle(&mut self, request: Request) -> (Response, bool) {
        debug!("Control request: {:?}", request);
        let result = match request {
            Request::Init => self.machine.init(),
            Request::SetMemRegion { guest_addr, size } => {
                self.machine.set_mem_region(guest_addr, size)
            }
            Request::LoadRaw { code } => self.machine.load_raw(&code),
            Request::Run => self.machine.run(),
            Request::Shutdown => return (Response::Ok, true),
        };
        match result {
            Ok(()) => (Response::Ok, false),
            Err(e) => {
                warn!("Control request failed: {}", e);
                (
                    Response::Error {
                        message: e.to_string(),
                    },
                    false,
                )
            }
        }
    }

    /// Serve `connection` until the peer leaves or asks for a shutdown.
    fn serve(&mut self, connection: ConnectionId) -> Result<bool, TransportError> {
        loop {
            let body = match self.recv(connection) {
                Ok(body) => body,
                Err(TransportError::Protocol(e)) if e.is_disconnect() => return Ok(false),
                Err(e) => return Err(e),
            };
            let (response, shutdown) = match protocol::decode::<Request>(&body) {
                Ok(request) => self.handle(request),
                Err(e) => (
                    Response::Error {
                        message: e.to_string(),
                    },
                    false,
                ),
            };
            let body = protocol::encode(&response).map_err(TransportError::Protocol)?;
            self.send(connection, &body)?;
            if shutdown {
                return Ok(true);
            }
        }
    }
}

impl Transport for StreamServer {
    fn init(&mut self) -> Result<(), TransportError> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                return Err(TransportError::Socket(e))
            }
            _ => {}
        }
        let listener = UnixListener::bind(&self.path).map_err(TransportError::Socket)?;
        self.listener = Some(listener);
        info!("Listening on {}", self.path.display());
        Ok(())
    }

    fn send(&mut self, connection: ConnectionId, data: &[u8]) -> Result<(), TransportError> {
        let stream = self.connection(connection)?;
        protocol::write_frame(stream, data).map_err(TransportError::Protocol)
    }

    fn recv(&mut self, connection: ConnectionId) -> Result<Vec<u8>, TransportError> {
        let stream = self.connection(connection)?;
        protocol::read_frame(stream).map_err(TransportError::Protocol)
    }

    fn run(&mut self) -> Result<(), TransportError> {
        loop {
            let listener = self.listener.as_ref().ok_or(TransportError::NotInitialized)?;
            let (stream, _) = listener.accept().map_err(TransportError::Socket)?;
            let connection = self.next_connection;
            self.next_connection += 1;
            self.connections.insert(connection, stream);
            debug!("Accepted connection {}", connection);

            let served = self.serve(connection);
            self.connections.remove(&connection);
            match served {
                Ok(true) => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                Ok(false) => debug!("Connection {} closed", connection),
                Err(e) => warn!("Connection {} dropped: {}", connection, e),
            }
        }
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if self.listener.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!("Cannot remove {}: {}", self.path.display(), e);
            }
        }
    }
}
