// Peer-side connection to a hub.
//
// A `PeerLink` is the write half (`Transport`) plus an inbox the read side
// fills. For TCP:
// - `PeerLink::tcp()` connects on the calling thread, then spawns a
//   background reader thread.
// - The reader thread calls `read_packet()` in a loop and pushes each packet
//   into an `mpsc` channel as `Inbound::Packet`; on EOF or error it pushes
//   `Inbound::Closed` and exits.
// - The owner queues sends through the transport (written by its own writer
//   thread) and drains the inbox without blocking, so the simulation thread
//   never waits on the network.
//
// In-process peers get a link from `ServerHandle::connect_local` instead;
// `ClientSession` does not care which kind it holds.

use std::io::BufReader;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use tandem_protocol::read_packet;

use crate::error::ClientError;
use crate::transport::{Inbound, TcpTransport, Transport};

pub struct PeerLink {
    pub transport: Box<dyn Transport>,
    pub inbox: Receiver<Inbound>,
}

impl PeerLink {
    pub fn new(transport: Box<dyn Transport>, inbox: Receiver<Inbound>) -> Self {
        Self { transport, inbox }
    }

    /// Connect to a hub over TCP and start the reader thread.
    pub fn tcp(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true).ok();
        let read_half = stream.try_clone()?;

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("tandem-client-reader".into())
            .spawn(move || reader_loop(BufReader::new(read_half), tx))?;

        Ok(Self::new(Box::new(TcpTransport::new(stream)?), rx))
    }
}

fn reader_loop(mut reader: BufReader<TcpStream>, tx: Sender<Inbound>) {
    while let Ok((id, payload)) = read_packet(&mut reader) {
        if tx.send(Inbound::Packet { id, payload }).is_err() {
            // Owner dropped the link.
            return;
        }
    }
    let _ = tx.send(Inbound::Closed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;
    use tandem_protocol::write_packet;

    #[test]
    fn tcp_link_reads_packets_then_reports_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut link = PeerLink::tcp(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();

        link.transport.send(3, b"up").unwrap();
        let mut server_reader = BufReader::new(server.try_clone().unwrap());
        assert_eq!(read_packet(&mut server_reader).unwrap(), (3, b"up".to_vec()));

        write_packet(&mut server, 9, b"down").unwrap();
        drop(server_reader);
        drop(server);

        let timeout = Duration::from_secs(5);
        assert_eq!(
            link.inbox.recv_timeout(timeout).unwrap(),
            Inbound::Packet {
                id: 9,
                payload: b"down".to_vec()
            }
        );
        assert_eq!(link.inbox.recv_timeout(timeout).unwrap(), Inbound::Closed);
    }
}
