use std::{
    io::{self, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 7890;

/// OPC command: set 8-bit RGB values for every pixel on a channel.
pub const SET_PIXEL_COLORS: u8 = 0x00;

pub const HEADER_LEN: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("payload of {0} bytes does not fit the 16-bit OPC length field")]
    PayloadTooLarge(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("invalid port in {0}")]
    InvalidPort(String),

    #[error("cannot resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no address found for {0}")]
    NoAddress(String),

    #[error("no server address has been resolved")]
    NotResolved,

    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("write to {addr} failed: {source}")]
    Write {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Something that can deliver a complete frame to a lighting controller.
pub trait Transport {
    fn resolve(&mut self, hostport: &str) -> Result<(), TransportError>;
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// One OPC message: a 4 byte header followed by the payload.
///
/// The header is `channel | command | length (big-endian u16)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    buffer: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct FrameBuilder {
    channel: u8,
    command: u8,
    payload_len: usize,
}

impl FrameBuilder {
    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn command(mut self, command: u8) -> Self {
        self.command = command;
        self
    }

    pub fn payload_len(mut self, payload_len: usize) -> Self {
        self.payload_len = payload_len;
        self
    }

    pub fn build(self) -> Result<Frame, FrameError> {
        let length = match u16::try_from(self.payload_len) {
            Ok(length) => length,
            Err(_) => return Err(FrameError::PayloadTooLarge(self.payload_len)),
        };

        let mut buffer = vec![0; HEADER_LEN + self.payload_len];
        buffer[0] = self.channel;
        buffer[1] = self.command;
        buffer[2..HEADER_LEN].copy_from_slice(&length.to_be_bytes());

        Ok(Frame { buffer })
    }
}

impl Frame {
    pub fn builder() -> FrameBuilder {
        FrameBuilder::default()
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[HEADER_LEN..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
impl Frame {
    pub fn channel(&self) -> u8 {
        self.buffer[0]
    }

    pub fn command(&self) -> u8 {
        self.buffer[1]
    }

    pub fn payload_len(&self) -> usize {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[HEADER_LEN..]
    }
}

/// Splits `HOST`, `HOST:PORT`, `:PORT` or `[v6]:PORT`, filling in defaults.
fn split_host_port(hostport: &str) -> Result<(&str, u16), TransportError> {
    let (host, port) = match hostport.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') || host.ends_with(']') => (host, Some(port)),
        _ => (hostport, None),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    let host = if host.is_empty() { DEFAULT_HOST } else { host };

    let port = match port {
        Some(port) => match port.parse::<u16>() {
            Ok(port) => port,
            Err(_) => return Err(TransportError::InvalidPort(hostport.to_string())),
        },
        None => DEFAULT_PORT,
    };

    Ok((host, port))
}

/// Open Pixel Control client over TCP.
///
/// The connection is opened on the first write and dropped when a write
/// fails, so the following write connects again.
#[derive(Default)]
pub struct OpcClient {
    target_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
}

impl OpcClient {
    pub fn new() -> Self {
        OpcClient::default()
    }

    pub fn target_addr(&self) -> Option<SocketAddr> {
        self.target_addr
    }

    fn connect(&mut self, addr: SocketAddr) -> Result<&mut TcpStream, TransportError> {
        let stream = match TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(source) => return Err(TransportError::Connect { addr, source }),
        };

        // Frames are small and latency matters more than throughput.
        if let Err(err) = stream.set_nodelay(true) {
            log::debug!("Cannot set TCP_NODELAY on {addr}: {err}");
        }

        log::info!("Connected to OPC server at {addr}");
        Ok(self.stream.insert(stream))
    }
}

impl Transport for OpcClient {
    fn resolve(&mut self, hostport: &str) -> Result<(), TransportError> {
        let (host, port) = split_host_port(hostport)?;

        let mut addrs = match (host, port).to_socket_addrs() {
            Ok(addrs) => addrs,
            Err(source) => {
                return Err(TransportError::Resolve {
                    host: host.to_string(),
                    source,
                })
            }
        };

        let addr = match addrs.next() {
            Some(addr) => addr,
            None => return Err(TransportError::NoAddress(host.to_string())),
        };

        log::debug!("Resolved OPC server {hostport} to {addr}");
        self.target_addr = Some(addr);
        self.stream = None;
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let addr = match self.target_addr {
            Some(addr) => addr,
            None => return Err(TransportError::NotResolved),
        };

        let stream = match self.stream {
            Some(ref mut stream) => stream,
            None => self.connect(addr)?,
        };

        if let Err(source) = stream.write_all(frame) {
            self.stream = None;
            return Err(TransportError::Write { addr, source });
        }

        Ok(())
    }
}
