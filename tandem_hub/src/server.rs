// TCP server and main loop for the hub.
//
// Architecture: thread-per-reader feeding the hub's action queue.
//
// - **Listener thread**: non-blocking `accept()` loop. Each new socket is
//   handed to the main thread as a queued closure that admits it through
//   `Hub::on_connected` and, if admitted, spawns its reader thread.
// - **Reader threads** (one per peer): `read_packet()` in a loop, each packet
//   queued as a `Hub::handle_receive` call. On EOF or error the thread
//   queues `Hub::on_disconnected` and exits.
// - **Main thread**: owns the `Hub`. Each iteration drains the action queue,
//   runs any pending long-action side effect, then advances as many ticks as
//   the fixed-step clock says are owed (skipped while paused).
//
// Only the main thread writes to peer sockets (through each connection's
// `Transport`); reader threads only read and enqueue.
//
// Shutdown: `ServerHandle::stop` clears `keep_running`. The main loop then
// disconnects every peer with `MpServerClosed`, which shuts their sockets
// down, and waits (bounded) on a countdown of live reader threads.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use tandem_protocol::{PlayerId, PlayerType, read_packet};

use crate::action_queue::{ActionQueue, QueueHandle};
use crate::client::PeerLink;
use crate::clock::FixedStep;
use crate::config::ServerSettings;
use crate::countdown::CountdownLock;
use crate::error::HubError;
use crate::hub::Hub;
use crate::persistence::SnapshotStore;
use crate::transport::{ChannelTransport, TcpTransport, Transport};

const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle returned by `start_server` to control the running hub.
pub struct ServerHandle {
    keep_running: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
    queue: QueueHandle<Hub>,
    addr: SocketAddr,
}

impl ServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Run `action` against the hub on its own thread.
    pub fn enqueue(&self, action: impl FnOnce(&mut Hub) + Send + 'static) {
        self.queue.enqueue(action);
    }

    /// Join the session from inside this process, bypassing TCP.
    pub fn connect_local(&self, kind: PlayerType) -> PeerLink {
        let (hub_side, inbox) = ChannelTransport::pair("local");
        let slot = Arc::new(OnceLock::new());
        let assigned = Arc::clone(&slot);
        self.queue.enqueue(move |hub: &mut Hub| {
            if let Ok(id) = hub.on_connected(Box::new(hub_side), kind) {
                let _ = assigned.set(id);
            }
        });
        let transport = LocalTransport {
            queue: self.queue.clone(),
            id: slot,
            closed: false,
        };
        PeerLink::new(Box::new(transport), inbox)
    }

    /// Signal the hub to stop and wait for it to shut down.
    pub fn stop(mut self) {
        self.keep_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

/// Bind, load the saved game and start the hub on a background thread.
/// Returns the handle and the bound address (useful with port 0).
pub fn start_server(
    settings: ServerSettings,
    store: Box<dyn SnapshotStore>,
) -> Result<(ServerHandle, SocketAddr), HubError> {
    let hub = Hub::new(settings, store)?;
    start_with_hub(hub)
}

/// Like `start_server`, for a hub that is already set up (custom gate).
pub fn start_with_hub(hub: Hub) -> Result<(ServerHandle, SocketAddr), HubError> {
    let listener = TcpListener::bind(&hub.settings().address)?;
    let addr = listener.local_addr()?;
    listener.set_nonblocking(true)?;
    log::info!("{} listening on {addr}", hub.settings().game_name);

    let queue = ActionQueue::new();
    let handle = queue.handle();
    let keep_running = Arc::new(AtomicBool::new(true));
    let readers = Arc::new(CountdownLock::new());

    {
        let keep_running = Arc::clone(&keep_running);
        let handle = handle.clone();
        let readers = Arc::clone(&readers);
        thread::Builder::new()
            .name("hub-listener".into())
            .spawn(move || accept_loop(listener, handle, readers, keep_running))?;
    }

    let thread = {
        let keep_running = Arc::clone(&keep_running);
        thread::Builder::new()
            .name("hub-main".into())
            .spawn(move || run_hub(hub, queue, readers, keep_running))?
    };

    Ok((
        ServerHandle {
            keep_running,
            thread: Some(thread),
            queue: handle,
            addr,
        },
        addr,
    ))
}

fn run_hub(
    mut hub: Hub,
    mut queue: ActionQueue<Hub>,
    readers: Arc<CountdownLock<PlayerId>>,
    keep_running: Arc<AtomicBool>,
) {
    let mut clock = FixedStep::new(hub.settings().tick_rate, Instant::now());

    while keep_running.load(Ordering::SeqCst) {
        queue.run(&mut hub);
        hub.poll_long_actions();
        for _ in 0..clock.due_ticks(Instant::now()) {
            if !hub.is_paused() {
                hub.tick();
            }
        }
        thread::sleep(
            clock
                .until_next()
                .clamp(Duration::from_millis(1), Duration::from_millis(10)),
        );
    }

    hub.shutdown();
    if !readers.wait_timeout(READER_SHUTDOWN_TIMEOUT) {
        log::warn!(
            "{} reader threads still running after shutdown",
            readers.ids().len()
        );
    }
}

fn accept_loop(
    listener: TcpListener,
    queue: QueueHandle<Hub>,
    readers: Arc<CountdownLock<PlayerId>>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                log::debug!("Accepted TCP connection from {addr}");
                stream.set_nonblocking(false).ok();
                stream.set_nodelay(true).ok();
                let reader_queue = queue.clone();
                let readers = Arc::clone(&readers);
                queue.enqueue(move |hub: &mut Hub| {
                    admit_tcp(hub, stream, reader_queue, readers);
                });
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                log::error!("Listener failed: {e}");
                break;
            }
        }
    }
}

/// Runs on the main thread: admit the socket and start its reader.
fn admit_tcp(
    hub: &mut Hub,
    stream: TcpStream,
    queue: QueueHandle<Hub>,
    readers: Arc<CountdownLock<PlayerId>>,
) {
    let read_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log::warn!("Could not clone socket: {e}");
            return;
        }
    };
    let transport = match TcpTransport::new(stream) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("Could not start writer for new connection: {e}");
            return;
        }
    };
    let Ok(id) = hub.on_connected(Box::new(transport), PlayerType::Normal) else {
        return;
    };

    readers.add(id);
    let thread_readers = Arc::clone(&readers);
    let spawned = thread::Builder::new()
        .name(format!("hub-reader-{}", id.0))
        .spawn(move || {
            reader_loop(BufReader::new(read_half), id, &queue);
            thread_readers.done(&id);
        });
    if let Err(e) = spawned {
        log::error!("Could not start reader thread: {e}");
        readers.done(&id);
        hub.disconnect(id, "Connection error: server overloaded");
    }
}

fn reader_loop(mut reader: BufReader<TcpStream>, id: PlayerId, queue: &QueueHandle<Hub>) {
    loop {
        match read_packet(&mut reader) {
            Ok((packet, payload)) => {
                queue.enqueue(move |hub: &mut Hub| hub.handle_receive(id, packet, &payload));
            }
            Err(e) => {
                log::debug!("Reader for player {} stopped: {e}", id.0);
                queue.enqueue(move |hub: &mut Hub| hub.on_disconnected(id));
                break;
            }
        }
    }
}

/// Peer-side transport for an in-process peer: packets go straight onto
/// the hub's action queue.
pub struct LocalTransport {
    queue: QueueHandle<Hub>,
    id: Arc<OnceLock<PlayerId>>,
    closed: bool,
}

impl Transport for LocalTransport {
    fn send(&mut self, packet_id: u8, payload: &[u8]) -> std::io::Result<()> {
        if self.closed {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport closed",
            ));
        }
        let id = Arc::clone(&self.id);
        let payload = payload.to_vec();
        self.queue.enqueue(move |hub: &mut Hub| {
            if let Some(id) = id.get() {
                hub.handle_receive(*id, packet_id, &payload);
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let id = Arc::clone(&self.id);
        self.queue.enqueue(move |hub: &mut Hub| {
            if let Some(id) = id.get() {
                hub.on_disconnected(*id);
            }
        });
    }

    fn describe(&self) -> String {
        match self.id.get() {
            Some(id) => format!("local player {}", id.0),
            None => "local player".into(),
        }
    }
}
