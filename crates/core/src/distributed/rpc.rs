// Trawler is an open source web crawling engine.
// Copyright (C) 2024 Trawler ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Minimal framed request/response transport between dispatcher, queue and
//! workers: a little-endian length header followed by a JSON payload, one
//! response per request. Task payloads carry free-form metadata maps, which
//! need a self-describing format.

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("failed to connect to peer: connection timeout")]
    ConnectionTimeout,

    #[error("failed to get response for request: request timeout")]
    RequestTimeout,

    #[error("frame of {got} bytes exceeds the limit of {limit}")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("codec error: {0}")]
    Codec(String),
}

async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|err| Error::Codec(err.to_string()))?;

    stream.write_all(&(bytes.len() as u64).to_le_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;

    Ok(())
}

async fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).await?;

    let body_size = u64::from_le_bytes(header) as usize;
    if body_size > MAX_FRAME_BYTES {
        return Err(Error::FrameTooLarge {
            got: body_size,
            limit: MAX_FRAME_BYTES,
        });
    }

    let mut buf = vec![0u8; body_size];
    stream.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|err| Error::Codec(err.to_string()))
}

pub struct Connection<Req, Res> {
    stream: TcpStream,
    marker: PhantomData<(Req, Res)>,
}

impl<Req, Res> Connection<Req, Res>
where
    Req: Serialize,
    Res: DeserializeOwned,
{
    pub async fn connect(server: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with_timeout(server, Duration::from_secs(30)).await
    }

    pub async fn connect_with_timeout(
        server: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Self> {
        match tokio::time::timeout(timeout, TcpStream::connect(server)).await {
            Ok(stream) => {
                let stream = stream?;
                stream.set_nodelay(true)?;

                Ok(Connection {
                    stream,
                    marker: PhantomData,
                })
            }
            Err(_) => Err(Error::ConnectionTimeout),
        }
    }

    pub async fn connect_with_retry(
        server: impl ToSocketAddrs + Clone,
        timeout: Duration,
        mut retry: impl Iterator<Item = Duration>,
    ) -> Result<Self> {
        loop {
            match Self::connect_with_timeout(server.clone(), timeout).await {
                Ok(conn) => return Ok(conn),
                Err(_) => match retry.next() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => return Err(Error::ConnectionTimeout),
                },
            }
        }
    }

    async fn send_without_timeout(&mut self, request: &Req) -> Result<Res> {
        write_frame(&mut self.stream, request).await?;
        read_frame(&mut self.stream).await
    }

    pub async fn send(&mut self, request: &Req) -> Result<Res> {
        self.send_with_timeout(request, DEFAULT_REQUEST_TIMEOUT).await
    }

    pub async fn send_with_timeout(&mut self, request: &Req, timeout: Duration) -> Result<Res> {
        match tokio::time::timeout(timeout, self.send_without_timeout(request)).await {
            Ok(res) => res,
            Err(_) => {
                self.stream.shutdown().await?;
                Err(Error::RequestTimeout)
            }
        }
    }
}

pub struct Server<Req, Res> {
    listener: TcpListener,
    marker: PhantomData<(Req, Res)>,
}

impl<Req, Res> Server<Req, Res>
where
    Req: DeserializeOwned,
    Res: Serialize,
{
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Server {
            listener,
            marker: PhantomData,
        })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn accept(&self) -> Result<ServerConnection<Req, Res>> {
        let (stream, client) = self.listener.accept().await?;
        tracing::debug!(?client, "accepted connection");

        Ok(ServerConnection {
            stream,
            marker: PhantomData,
        })
    }
}

pub struct ServerConnection<Req, Res> {
    stream: TcpStream,
    marker: PhantomData<(Req, Res)>,
}

impl<Req, Res> ServerConnection<Req, Res>
where
    Req: DeserializeOwned,
    Res: Serialize,
{
    /// Read the next request off the connection. Returns `None` when the
    /// peer hung up.
    pub async fn request(&mut self) -> Result<Option<Req>> {
        match read_frame(&mut self.stream).await {
            Ok(req) => Ok(Some(req)),
            Err(Error::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn respond(&mut self, response: &Res) -> Result<()> {
        match tokio::time::timeout(
            DEFAULT_REQUEST_TIMEOUT,
            write_frame(&mut self.stream, response),
        )
        .await
        {
            Ok(res) => res,
            Err(_) => Err(Error::RequestTimeout),
        }
    }
}
