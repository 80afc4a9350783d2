//! Store client
//!
//! One blocking connection, one command, one streamed reply. Connection
//! failures are fatal to the run; there is no pooling or retry.

use crate::resp::{encode_command, RespReader};
use crate::source::ScalarVisitor;
use crate::{Result, TallyError};
use log::{debug, info};
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Default connect timeout (1.5 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Default store port
pub const DEFAULT_PORT: u16 = 6379;

/// A connected store client
pub struct StoreClient {
    addr: String,
    stream: TcpStream,
}

impl StoreClient {
    /// Connect to `host:port`, trying each resolved address until one answers
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|source| TallyError::Connection {
                addr: addr.clone(),
                source,
            })?;

        let mut last_err = None;
        for candidate in candidates {
            debug!("connecting to {}", candidate);
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    info!("connected to {}", addr);
                    return Ok(Self { addr, stream });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(TallyError::Connection {
            addr,
            source: last_err.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
            }),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Send `command` and stream its reply into `visitor`
    pub fn execute<V>(&mut self, command: &str, visitor: &mut V) -> Result<()>
    where
        V: ScalarVisitor + ?Sized,
    {
        let encoded = encode_command(command)?;
        self.stream.write_all(&encoded)?;
        self.stream.flush()?;
        debug!("sent {} bytes to {}", encoded.len(), self.addr);

        let mut reader = RespReader::new(BufReader::with_capacity(64 * 1024, &self.stream));
        reader.read_reply(visitor)
    }
}

/// Whether the command's reply interleaves scores with members
pub fn requests_scores(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|arg| arg.eq_ignore_ascii_case("WITHSCORES"))
}
