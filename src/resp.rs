//! Streaming RESP2 reader
//!
//! Decodes one reply from a byte stream and hands every bulk or simple string
//! to a [`ScalarVisitor`] as soon as it is read. The reply tree is never
//! built; nested arrays are tracked with a stack of remaining element counts.
//!
//! ```text
//! *4\r\n                     array of 4
//! $5\r\nrec|1\r\n            -> visit_scalar(b"rec|1")
//! $1\r\n5\r\n                -> visit_scalar(b"5")
//! ...
//! ```

use crate::source::ScalarVisitor;
use crate::{Result, TallyError};
use std::io::{self, BufRead, Read};

/// Largest bulk string accepted (the store's own default ceiling)
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Incremental reply reader over any buffered byte source
pub struct RespReader<R> {
    reader: R,
    line: Vec<u8>,
    bulk: Vec<u8>,
}

impl<R: BufRead> RespReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::with_capacity(64),
            bulk: Vec::new(),
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Consume exactly one complete reply, visiting its scalars in order
    pub fn read_reply<V: ScalarVisitor + ?Sized>(&mut self, visitor: &mut V) -> Result<()> {
        // Remaining elements of each open array, innermost last
        let mut open: Vec<u64> = Vec::new();

        loop {
            self.read_line()?;
            let (kind, body) = match self.line.split_first() {
                Some((&kind, body)) => (kind, body),
                None => return Err(TallyError::Protocol("empty reply header".to_string())),
            };

            match kind {
                b'+' => visitor.visit_scalar(body)?,
                b'-' => {
                    return Err(TallyError::Server(
                        String::from_utf8_lossy(body).into_owned(),
                    ))
                }
                b':' => {
                    parse_length(body)?;
                }
                b'$' => {
                    let len = parse_length(body)?;
                    if len >= 0 {
                        self.read_bulk(len as usize)?;
                        visitor.visit_scalar(&self.bulk)?;
                    }
                }
                b'*' => {
                    let len = parse_length(body)?;
                    if len > 0 {
                        open.push(len as u64);
                        continue;
                    }
                }
                other => {
                    return Err(TallyError::Protocol(format!(
                        "unknown reply type byte 0x{:02x}",
                        other
                    )))
                }
            }

            // One element finished; close every array it completes
            loop {
                match open.last_mut() {
                    None => return Ok(()),
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        open.pop();
                    }
                }
            }
        }
    }

    /// Read one CRLF-terminated header line into `self.line`, without CRLF
    fn read_line(&mut self) -> Result<()> {
        self.line.clear();
        let n = self.reader.read_until(b'\n', &mut self.line)?;
        if n == 0 {
            return Err(TallyError::Protocol("unexpected end of reply".to_string()));
        }
        if !self.line.ends_with(b"\r\n") {
            return Err(TallyError::Protocol("reply line not terminated by CRLF".to_string()));
        }
        self.line.truncate(self.line.len() - 2);
        Ok(())
    }

    /// Read a bulk payload of `len` bytes plus its CRLF into `self.bulk`
    fn read_bulk(&mut self, len: usize) -> Result<()> {
        if len > MAX_BULK_LEN {
            return Err(TallyError::Protocol(format!("bulk length {} too large", len)));
        }
        self.bulk.clear();
        self.bulk
            .try_reserve_exact(len + 2)
            .map_err(|_| TallyError::OutOfMemory("bulk string"))?;
        self.bulk.resize(len + 2, 0);
        self.reader.read_exact(&mut self.bulk).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                TallyError::Protocol("unexpected end of bulk string".to_string())
            } else {
                TallyError::Io(e)
            }
        })?;
        if !self.bulk.ends_with(b"\r\n") {
            return Err(TallyError::Protocol("bulk string not terminated by CRLF".to_string()));
        }
        self.bulk.truncate(len);
        Ok(())
    }
}

fn parse_length(body: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(body)
        .map_err(|_| TallyError::Protocol("non-ASCII length header".to_string()))?;
    let n: i64 = text
        .parse()
        .map_err(|_| TallyError::Protocol(format!("invalid length header '{}'", text)))?;
    if n < -1 {
        return Err(TallyError::Protocol(format!("negative length {}", n)));
    }
    Ok(n)
}

/// Encode a whitespace-separated command line as an array of bulk strings
pub fn encode_command(command: &str) -> Result<Vec<u8>> {
    let args: Vec<&str> = command.split_whitespace().collect();
    if args.is_empty() {
        return Err(TallyError::Config("empty store command".to_string()));
    }
    let mut out = Vec::with_capacity(command.len() + 16 * args.len());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    Ok(out)
}
