pub mod port;
pub use port::{LinkPort, PortOpener, SerialOpener};

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConnectionError, WriteError};
use crate::pubsub::Topic;

pub const DEFAULT_BAUD: u32 = 115_200;
//longest line kept while waiting for a terminator
pub const MAX_LINE_LEN: usize = 1024;

pub type LineHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Closed = 0,
    Opening = 1,
    Open = 2,
}

impl LinkState {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => LinkState::Opening,
            2 => LinkState::Open,
            _ => LinkState::Closed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected { port: String, baud: u32 },
    Disconnected { port: String },
    LinkLost { port: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    pub is_open: bool,
    pub port_name: String,
    pub baud: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    /// Port to open at startup, if any.
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    /// The controller may reset when the line opens; wait this long before use.
    pub settle_ms: u64,
    /// Sleep between checks for pending input.
    pub poll_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        LinkSettings {
            port: None,
            baud: DEFAULT_BAUD,
            read_timeout_ms: 1000,
            settle_ms: 2000,
            poll_ms: 5,
        }
    }
}

struct Session {
    port_name: String,
    baud: u32,
    writer: Box<dyn LinkPort>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

/// Restartable line-oriented link to the vehicle controller.
///
/// A background thread reads newline-terminated lines and hands each
/// non-empty one to the registered handler. Failures close the link and are
/// reported as [`LinkEvent::LinkLost`]; nothing reconnects on its own.
pub struct Link {
    opener: Arc<dyn PortOpener>,
    settings: LinkSettings,
    session: Arc<Mutex<Option<Session>>>,
    connecting: Mutex<()>,
    state: Arc<AtomicU8>,
    handler: Arc<RwLock<Option<LineHandler>>>,
    events: Arc<Topic<LinkEvent>>,
}

impl Link {
    pub fn new(opener: Arc<dyn PortOpener>, settings: LinkSettings) -> Self {
        Self::with_events(opener, settings, Arc::new(Topic::new("/link/events", 64)))
    }

    pub fn with_events(opener: Arc<dyn PortOpener>, settings: LinkSettings, events: Arc<Topic<LinkEvent>>) -> Self {
        Link {
            opener,
            settings,
            session: Arc::new(Mutex::new(None)),
            connecting: Mutex::new(()),
            state: Arc::new(AtomicU8::new(LinkState::Closed as u8)),
            handler: Arc::new(RwLock::new(None)),
            events,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn events(&self) -> Arc<Topic<LinkEvent>> {
        Arc::clone(&self.events)
    }

    /// Register the receiver of decoded lines, replacing any previous one.
    pub fn on_line<F>(&self, handler: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.handler.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::new(handler));
    }

    pub fn list_ports(&self) -> Vec<String> {
        self.opener.list_ports()
    }

    pub fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Open
    }

    pub fn connection_state(&self) -> ConnectionState {
        let session = self.lock_session();
        match session.as_ref() {
            Some(s) => ConnectionState {
                is_open: self.is_connected(),
                port_name: s.port_name.clone(),
                baud: s.baud,
            },
            None => ConnectionState::default(),
        }
    }

    /// Open `port`, wait for the far end to settle, then start the receive loop.
    /// An existing connection is closed first.
    pub fn connect(&self, port: &str, baud: u32) -> Result<ConnectionState, ConnectionError> {
        let _connecting = self.connecting.lock().unwrap_or_else(|p| p.into_inner());
        self.close();

        self.set_state(LinkState::Opening);
        info!("opening {} at {} baud", port, baud);

        let opened = self
            .opener
            .open(port, baud, Duration::from_millis(self.settings.read_timeout_ms))
            .and_then(|writer| writer.try_clone_port().map(|reader| (writer, reader)));

        let (writer, reader_port) = match opened {
            Ok(ports) => ports,
            Err(source) => {
                self.set_state(LinkState::Closed);
                warn!("failed to open {}: {}", port, source);
                return Err(ConnectionError::OpenFailed { port: port.to_string(), source });
            }
        };

        if self.settings.settle_ms > 0 {
            thread::sleep(Duration::from_millis(self.settings.settle_ms));
        }

        let running = Arc::new(AtomicBool::new(true));
        self.set_state(LinkState::Open);

        let receiver = ReceiveLoop {
            port: reader_port,
            port_name: port.to_string(),
            running: Arc::clone(&running),
            session: Arc::clone(&self.session),
            state: Arc::clone(&self.state),
            handler: Arc::clone(&self.handler),
            events: Arc::clone(&self.events),
            poll: Duration::from_millis(self.settings.poll_ms.max(1)),
            rx_buffer: Vec::with_capacity(256),
        };
        //held until the session is stored, so an early read failure finds it
        let mut slot = self.lock_session();
        let reader = thread::Builder::new()
            .name(format!("link-rx {}", port))
            .spawn(move || receiver.run());

        let reader = match reader {
            Ok(handle) => handle,
            Err(source) => {
                self.set_state(LinkState::Closed);
                return Err(ConnectionError::OpenFailed { port: port.to_string(), source });
            }
        };

        *slot = Some(Session {
            port_name: port.to_string(),
            baud,
            writer,
            running,
            reader: Some(reader),
        });

        info!("connected to {}", port);
        self.events.publish(LinkEvent::Connected { port: port.to_string(), baud });
        drop(slot);

        Ok(ConnectionState { is_open: true, port_name: port.to_string(), baud })
    }

    /// Stop the receive loop, wait for it, then close the port. Idempotent.
    ///
    /// Waits for a [`Link::connect`] still inside its settle delay, then
    /// closes the connection it made.
    pub fn disconnect(&self) {
        let _connecting = self.connecting.lock().unwrap_or_else(|p| p.into_inner());
        self.close();
    }

    //caller holds `connecting`
    fn close(&self) {
        let session = self.lock_session().take();
        let was_open = self.state() == LinkState::Open;
        self.set_state(LinkState::Closed);

        if let Some(session) = session {
            let port = session.port_name.clone();
            Self::shutdown(session);
            info!("serial link {} closed", port);
            if was_open {
                self.events.publish(LinkEvent::Disconnected { port });
            }
        }
    }

    /// Write one line as-is. A failed write closes the link and reports
    /// [`LinkEvent::LinkLost`].
    pub fn send(&self, line: &str) -> Result<(), WriteError> {
        let mut guard = self.lock_session();
        if !self.is_connected() {
            return Err(WriteError::NotConnected);
        }
        let session = match guard.as_mut() {
            Some(session) => session,
            None => return Err(WriteError::NotConnected),
        };

        let written = session
            .writer
            .write_all(line.as_bytes())
            .and_then(|_| session.writer.flush());

        match written {
            Ok(()) => Ok(()),
            Err(e) => {
                let session = guard.take();
                drop(guard);
                self.set_state(LinkState::Closed);
                if let Some(session) = session {
                    let port = session.port_name.clone();
                    warn!("write to {} failed: {}", port, e);
                    self.events.publish(LinkEvent::LinkLost { port, reason: e.to_string() });
                    Self::shutdown(session);
                }
                Err(WriteError::Io(e))
            }
        }
    }

    fn shutdown(mut session: Session) {
        session.running.store(false, Ordering::SeqCst);
        if let Some(reader) = session.reader.take() {
            //the handler itself may have asked us to disconnect
            if reader.thread().id() != thread::current().id() {
                let _ = reader.join();
            }
        }
        //writer drops here, after the reader is gone
    }

    fn set_state(&self, state: LinkState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        lock_slot(&self.session)
    }
}

fn lock_slot(slot: &Mutex<Option<Session>>) -> MutexGuard<'_, Option<Session>> {
    slot.lock().unwrap_or_else(|p| p.into_inner())
}

impl Drop for Link {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct ReceiveLoop {
    port: Box<dyn LinkPort>,
    port_name: String,
    running: Arc<AtomicBool>,
    session: Arc<Mutex<Option<Session>>>,
    state: Arc<AtomicU8>,
    handler: Arc<RwLock<Option<LineHandler>>>,
    events: Arc<Topic<LinkEvent>>,
    poll: Duration,
    rx_buffer: Vec<u8>,
}

impl ReceiveLoop {
    fn run(mut self) {
        debug!("receive loop for {} started", self.port_name);
        let mut read_buf = [0u8; 256];

        while self.running.load(Ordering::SeqCst) {
            match self.port.bytes_to_read() {
                Ok(0) => {
                    thread::sleep(self.poll);
                    continue;
                }
                Ok(_) => {}
                Err(e) => return self.lost(e),
            }

            match self.port.read(&mut read_buf) {
                Ok(n) if n > 0 => {
                    self.rx_buffer.extend_from_slice(&read_buf[..n]);
                    self.process_buffer();
                }
                Ok(_) => {}
                Err(ref e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted) => {}
                Err(e) => return self.lost(e),
            }
        }
        debug!("receive loop for {} stopped", self.port_name);
    }

    fn process_buffer(&mut self) {
        while let Some(line) = self.next_line() {
            if !line.is_empty() {
                self.deliver(&line);
            }
        }
        if self.rx_buffer.len() > MAX_LINE_LEN {
            warn!("discarding {} bytes without a line terminator", self.rx_buffer.len());
            self.rx_buffer.clear();
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.rx_buffer.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.rx_buffer.drain(..=end).collect();
        Some(decode_line(&raw))
    }

    fn deliver(&self, line: &str) {
        let handler = self.handler.read().unwrap_or_else(|p| p.into_inner()).clone();
        match handler {
            Some(handler) => handler(line),
            None => debug!("no line handler, dropping {:?}", line),
        }
    }

    fn lost(&self, e: std::io::Error) {
        self.running.store(false, Ordering::SeqCst);

        //only our own session; a disconnect may already have taken it
        let session = {
            let mut slot = lock_slot(&self.session);
            match slot.as_ref() {
                Some(s) if Arc::ptr_eq(&s.running, &self.running) => slot.take(),
                _ => None,
            }
        };
        let session = match session {
            Some(session) => session,
            None => {
                debug!("read from {} failed during close: {}", self.port_name, e);
                return;
            }
        };

        self.state.store(LinkState::Closed as u8, Ordering::SeqCst);
        warn!("read from {} failed, stopping receive loop: {}", self.port_name, e);
        self.events.publish(LinkEvent::LinkLost {
            port: self.port_name.clone(),
            reason: e.to_string(),
        });
        //drops the writer; our own handle is not joined
        Link::shutdown(session);
    }
}

//permissive utf-8: invalid sequences are dropped, whitespace trimmed
fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .filter(|&c| c != char::REPLACEMENT_CHARACTER)
        .collect::<String>()
        .trim()
        .to_string()
}
