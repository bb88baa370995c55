// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::service::protocol::{self, Request, Response};
use crate::service::TransportError;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

/// Client side of [`StreamServer`](crate::service::StreamServer).
pub struct StreamClient {
    path: PathBuf,
    stream: Option<UnixStream>,
}

impl StreamClient {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        StreamClient {
            path: path.as_ref().to_path_buf(),
            stream: None,
        }
    }

    /// Connect to the server.
    pub fn init(&mut self) -> Result<(), TransportError> {
        let stream = UnixStream::connect(&self.path).map_err(TransportError::Socket)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut UnixStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotInitialized)
    }

    pub fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        protocol::write_frame(self.stream()?, data).map_err(TransportError::Protocol)
    }

    pub fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        protocol::read_frame(self.stream()?).map_err(TransportError::Protocol)
    }

    /// Send `request` and wait for its response.
    pub fn request(&mut self, request: &Request) -> Result<Response, TransportError> {
        let body = protocol::encode(request).map_err(TransportError::Protocol)?;
        self.send(&body)?;
        let body = self.recv()?;
        protocol::decode(&body).map_err(TransportError::Protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utils::tempdir::TempDir;

    #[test]
    fn test_not_connected() {
        let mut client = StreamClient::new("/nonexistent/nullvm.sock");
        assert!(matches!(
            client.send(b"{}"),
            Err(TransportError::NotInitialized)
        ));
        assert!(matches!(client.init(), Err(TransportError::Socket(_))));
    }

    #[test]
    fn test_server_hangs_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.as_path().join("nullvm.sock");
        let listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let server = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
        });

        let mut client = StreamClient::new(&path);
        client.init().unwrap();
        server.join().unwrap();
        // Either the write or the read sees the closed peer.
        assert!(matches!(
            client.request(&Request::Run),
            Err(TransportError::Protocol(protocol::ProtocolError::Io(_)))
        ));
    }
}
