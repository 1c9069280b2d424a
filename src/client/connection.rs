//! Connection handling
//!
//! A client connection to one store, with pipelined request/reply over
//! any async byte stream.

use super::{expect_ok, Command, Store, StoreError};
use crate::config::ConnectionConfig;
use crate::protocol::{RespEncoder, RespParser, RespValue};
use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client connection to a store
pub struct Connection<T = TcpStream> {
    /// Underlying stream
    stream: T,

    /// Peer description, for logs
    peer: String,

    /// Read buffer
    read_buffer: BytesMut,

    /// Write buffer
    write_buffer: BytesMut,
}

impl Connection<TcpStream> {
    /// Dial the store, authenticate and select the database
    ///
    /// AUTH is only sent when a password is configured, SELECT only for a
    /// database other than 0.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self, StoreError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).await?;
        stream.set_nodelay(true)?;

        let mut connection = Connection::new(stream, config.to_string());
        connection.handshake(config).await?;

        info!("Connection to {} was successful", config);
        Ok(connection)
    }
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already open stream
    pub fn new(stream: T, peer: impl Into<String>) -> Self {
        Connection {
            stream,
            peer: peer.into(),
            read_buffer: BytesMut::with_capacity(16 * 1024),
            write_buffer: BytesMut::with_capacity(16 * 1024),
        }
    }

    /// Run AUTH and SELECT as configured
    pub async fn handshake(&mut self, config: &ConnectionConfig) -> Result<(), StoreError> {
        if let Some(password) = &config.password {
            info!("Attempting AUTH for {}", self.peer);
            expect_ok(self.query(Command::auth(password)).await?)?;
        }

        if config.database != 0 {
            debug!("Selecting database {} on {}", config.database, self.peer);
            expect_ok(self.query(Command::select(config.database)).await?)?;
        }

        Ok(())
    }

    /// Read the next complete reply
    async fn read_reply(&mut self) -> Result<RespValue, StoreError> {
        loop {
            if let Some(value) = RespParser::parse(&mut self.read_buffer)? {
                return Ok(value);
            }

            let n = self.stream.read_buf(&mut self.read_buffer).await?;
            if n == 0 {
                return Err(StoreError::Closed);
            }
        }
    }
}

#[async_trait]
impl<T> Store for Connection<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn pipeline(&mut self, commands: &[Command]) -> Result<Vec<RespValue>, StoreError> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        self.write_buffer.clear();
        for command in commands {
            RespEncoder::encode_command(&mut self.write_buffer, command.parts());
        }

        debug!(
            "Sending {} pipelined commands ({} bytes) to {}",
            commands.len(),
            self.write_buffer.len(),
            self.peer
        );
        self.stream.write_all(&self.write_buffer).await?;
        self.stream.flush().await?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.read_reply().await?);
        }

        Ok(replies)
    }

    async fn shutdown(&mut self) -> Result<(), StoreError> {
        debug!("Closing connection to {}", self.peer);
        self.stream.shutdown().await?;
        Ok(())
    }
}
