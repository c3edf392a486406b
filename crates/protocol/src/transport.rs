// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Pipe transport, resolved per platform from a configured pipe id.
//!
//! On Windows the id names an actual named pipe (`\\.\pipe\{id}`), which is
//! what the game DLL creates. On Unix the same id maps to a domain socket
//! under the temp dir so the whole stack, mock DLL included, runs in tests
//! and development off-Windows.

use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeEndpoint {
    id: String,
}

impl PipeEndpoint {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    #[cfg(unix)]
    pub fn path(&self) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}.sock", self.id))
    }

    #[cfg(windows)]
    pub fn path(&self) -> String {
        format!(r"\\.\pipe\{}", self.id)
    }

    /// Open the client side of the pipe.
    pub async fn connect(&self) -> io::Result<PipeStream> {
        #[cfg(unix)]
        {
            tokio::net::UnixStream::connect(self.path()).await
        }
        #[cfg(windows)]
        {
            tokio::net::windows::named_pipe::ClientOptions::new().open(self.path())
        }
    }
}

#[cfg(unix)]
pub type PipeStream = tokio::net::UnixStream;
#[cfg(windows)]
pub type PipeStream = tokio::net::windows::named_pipe::NamedPipeClient;

#[cfg(unix)]
pub type ServerPipeStream = tokio::net::UnixStream;
#[cfg(windows)]
pub type ServerPipeStream = tokio::net::windows::named_pipe::NamedPipeServer;

/// Server side of the pipe. In production the DLL owns this end; here it
/// backs the mock DLL used by tests and local development.
pub struct PipeListener {
    #[cfg(unix)]
    inner: tokio::net::UnixListener,
    #[cfg(unix)]
    path: std::path::PathBuf,
    #[cfg(windows)]
    path: String,
    #[cfg(windows)]
    next: Option<tokio::net::windows::named_pipe::NamedPipeServer>,
}

impl PipeListener {
    pub fn bind(endpoint: &PipeEndpoint) -> io::Result<Self> {
        #[cfg(unix)]
        {
            let path = endpoint.path();
            // A stale socket file from a crashed run would fail the bind.
            let _ = std::fs::remove_file(&path);
            let inner = tokio::net::UnixListener::bind(&path)?;
            Ok(Self { inner, path })
        }
        #[cfg(windows)]
        {
            let path = endpoint.path();
            let first = tokio::net::windows::named_pipe::ServerOptions::new()
                .first_pipe_instance(true)
                .create(&path)?;
            Ok(Self {
                path,
                next: Some(first),
            })
        }
    }

    pub async fn accept(&mut self) -> io::Result<ServerPipeStream> {
        #[cfg(unix)]
        {
            let (stream, _addr) = self.inner.accept().await?;
            Ok(stream)
        }
        #[cfg(windows)]
        {
            let server = match self.next.take() {
                Some(server) => server,
                None => tokio::net::windows::named_pipe::ServerOptions::new().create(&self.path)?,
            };
            server.connect().await?;
            self.next = Some(
                tokio::net::windows::named_pipe::ServerOptions::new().create(&self.path)?,
            );
            Ok(server)
        }
    }
}

#[cfg(unix)]
impl Drop for PipeListener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn connect_and_echo_over_pipe() {
        let endpoint = PipeEndpoint::new(format!("vox-transport-test-{}", std::process::id()));
        let mut listener = PipeListener::bind(&endpoint).unwrap();

        let server = tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let mut client = endpoint.connect().await.unwrap();
        client.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");
        server.await.unwrap();
    }
}
