// Transport abstraction: how the hub writes packets to one peer.
//
// The hub only ever writes through a `Transport`; reading is done by whoever
// owns the other half (a reader thread for TCP, the test itself for channels)
// and is turned into closures on the hub's action queue. Sends are
// fire-and-forget from the hub's point of view: a failed write is reported to
// the caller, but the disconnect itself arrives later as an event from the
// read side.
//
// Implementations:
// - `TcpTransport`: hands packets to a per-connection writer thread over an
//   `mpsc` channel, so a peer that stops reading never stalls the caller.
//   The writer gives up after `WRITE_TIMEOUT` on a stuck socket. On `close`
//   or a write error it shuts the socket down, which unblocks the peer's
//   reader thread and turns into a normal disconnect.
// - `ChannelTransport`: delivers packets as `Inbound` values over an `mpsc`
//   channel. Used for in-process peers and in tests.

use std::io::{self, BufWriter};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use tandem_protocol::write_packet;

/// How long a single blocked write may take before the peer is dropped.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Write half of a peer connection.
pub trait Transport: Send {
    fn send(&mut self, packet_id: u8, payload: &[u8]) -> io::Result<()>;
    /// Close the connection. Idempotent.
    fn close(&mut self);
    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}

/// What the read side of a connection produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Packet { id: u8, payload: Vec<u8> },
    Closed,
}

pub struct TcpTransport {
    outbox: Option<Sender<(u8, Vec<u8>)>>,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Start the writer thread for `stream`.
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream.peer_addr().ok();
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let (tx, rx) = mpsc::channel();
        let name = match peer {
            Some(addr) => format!("tandem-writer-{addr}"),
            None => "tandem-writer".into(),
        };
        thread::Builder::new()
            .name(name)
            .spawn(move || writer_loop(stream, rx))?;
        Ok(Self {
            outbox: Some(tx),
            peer,
        })
    }
}

/// Write queued packets until the transport is closed or a write fails,
/// then shut the socket down.
fn writer_loop(stream: TcpStream, rx: Receiver<(u8, Vec<u8>)>) {
    let mut writer = BufWriter::new(stream);
    for (packet_id, payload) in rx {
        if let Err(e) = write_packet(&mut writer, packet_id, &payload) {
            log::debug!("Write to {:?} failed: {e}", writer.get_ref().peer_addr().ok());
            break;
        }
    }
    let _ = writer.get_ref().shutdown(Shutdown::Both);
}

impl Transport for TcpTransport {
    fn send(&mut self, packet_id: u8, payload: &[u8]) -> io::Result<()> {
        let Some(outbox) = &self.outbox else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport closed",
            ));
        };
        outbox
            .send((packet_id, payload.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer stopped"))
    }

    /// Queued packets are still written before the socket shuts down.
    fn close(&mut self) {
        self.outbox = None;
    }

    fn describe(&self) -> String {
        match self.peer {
            Some(addr) => addr.to_string(),
            None => "tcp peer".into(),
        }
    }
}

pub struct ChannelTransport {
    tx: Sender<Inbound>,
    label: String,
    closed: bool,
}

impl ChannelTransport {
    /// A transport plus the receiver that sees everything sent through it.
    pub fn pair(label: &str) -> (Self, Receiver<Inbound>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                tx,
                label: label.into(),
                closed: false,
            },
            rx,
        )
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, packet_id: u8, payload: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport closed",
            ));
        }
        self.tx
            .send(Inbound::Packet {
                id: packet_id,
                payload: payload.to_vec(),
            })
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.tx.send(Inbound::Closed);
        }
    }

    fn describe(&self) -> String {
        format!("local:{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;
    use std::net::TcpListener;
    use tandem_protocol::read_packet;

    #[test]
    fn channel_delivers_then_closes_once() {
        let (mut transport, rx) = ChannelTransport::pair("alice");
        transport.send(4, &[1, 2]).unwrap();
        transport.close();
        transport.close();
        assert!(transport.send(4, &[]).is_err());

        let got: Vec<Inbound> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                Inbound::Packet {
                    id: 4,
                    payload: vec![1, 2]
                },
                Inbound::Closed
            ]
        );
    }

    #[test]
    fn tcp_close_unblocks_the_reader() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut transport = TcpTransport::new(server).unwrap();
        transport.send(7, b"hi").unwrap();
        transport.close();
        assert!(transport.send(7, b"late").is_err());

        let mut reader = BufReader::new(client);
        assert_eq!(read_packet(&mut reader).unwrap(), (7, b"hi".to_vec()));
        assert!(read_packet(&mut reader).is_err());
    }

    #[test]
    fn stalled_peer_does_not_block_the_sender() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        // Connected but never read from.
        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();

        let mut transport = TcpTransport::new(server).unwrap();
        let chunk = vec![0u8; 64 * 1024];
        let start = std::time::Instant::now();
        // Far more than any socket buffer holds.
        for _ in 0..256 {
            transport.send(1, &chunk).unwrap();
        }
        assert!(start.elapsed() < Duration::from_secs(2));
        transport.close();
    }
}
