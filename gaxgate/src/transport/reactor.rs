//! Tokio-backed reactor: TCP, console and spawned-program channels.
//!
//! The reactor owns a current-thread runtime that only makes progress while
//! [`Reactor::wait`] is blocking, so I/O tasks never run concurrently with
//! the callbacks of the relay core. Each channel is driven by one task that
//! forwards queued writes and reads while read readiness is enabled; write
//! readiness is level-triggered by the reactor itself.

use std::cell::{Cell, RefCell};
use std::io;
use std::process::Stdio;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Handle, Runtime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::{Accepter, Endpoint, Event, Reactor};
use crate::channel::{Channel, ChannelId};
use crate::error::ChannelError;

/// Size of a single read from a channel.
const READ_CHUNK: usize = 4096;

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Event as produced by the I/O tasks, before the reactor wraps channels.
pub(crate) enum RawEvent {
    Opened {
        id: ChannelId,
        result: Result<(), ChannelError>,
        local: Option<String>,
        remote: Option<String>,
    },
    Readable(ChannelId, Result<Bytes, ChannelError>),
    Closed(ChannelId),
    Accepted {
        stream: TcpStream,
        local: Option<String>,
        remote: Option<String>,
    },
    AccepterShutdown,
    Interrupt,
}

/// Instructions from a channel handle to its driver task.
#[derive(Debug)]
pub(crate) enum Command {
    Write(Bytes),
    Close,
}

/// State shared between a channel handle and the reactor.
#[derive(Debug, Default)]
struct Shared {
    open: Cell<bool>,
    closed: Cell<bool>,
    write_enabled: Cell<bool>,
    local: RefCell<Option<String>>,
    remote: RefCell<Option<String>>,
}

/// Handle to a channel driven by the tokio reactor.
pub struct TokioChannel {
    id: ChannelId,
    commands: mpsc::UnboundedSender<Command>,
    read_enabled: watch::Sender<bool>,
    shared: Rc<Shared>,
    close_requested: bool,
}

impl Channel for TokioChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        if self.close_requested || self.shared.closed.get() {
            return Err(ChannelError::Closed);
        }
        self.commands
            .send(Command::Write(Bytes::copy_from_slice(data)))
            .map_err(|_| ChannelError::Closed)?;
        Ok(data.len())
    }

    fn set_read_enabled(&mut self, enabled: bool) {
        self.read_enabled.send_replace(enabled);
    }

    fn set_write_enabled(&mut self, enabled: bool) {
        self.shared.write_enabled.set(enabled);
    }

    fn close(&mut self) {
        if self.close_requested {
            return;
        }
        self.close_requested = true;
        self.shared.write_enabled.set(false);
        if self.commands.send(Command::Close).is_err() {
            trace!("{}: close after driver exit", self.id);
        }
    }

    fn local_address(&self) -> Option<String> {
        self.shared.local.borrow().clone()
    }

    fn remote_address(&self) -> Option<String> {
        self.shared.remote.borrow().clone()
    }
}

/// Receiving ends handed to a channel's driver task.
struct DriverParts {
    id: ChannelId,
    commands: mpsc::UnboundedReceiver<Command>,
    read_enabled: watch::Receiver<bool>,
}

/// Reactor running channels on a current-thread tokio runtime.
pub struct TokioReactor {
    runtime: Runtime,
    events_tx: mpsc::UnboundedSender<RawEvent>,
    events: mpsc::UnboundedReceiver<RawEvent>,
    channels: Vec<(ChannelId, Weak<Shared>)>,
    cursor: usize,
}

impl TokioReactor {
    /// Create a reactor with its own runtime.
    ///
    /// Ctrl-C is reported as [`Event::Interrupt`].
    pub fn new() -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (events_tx, events) = mpsc::unbounded_channel();

        let interrupts = events_tx.clone();
        runtime.spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if interrupts.send(RawEvent::Interrupt).is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            runtime,
            events_tx,
            events,
            channels: Vec::new(),
            cursor: 0,
        })
    }

    /// Create an accepter for a `tcp,...` connection string.
    pub fn listen(&mut self, target: &str) -> Result<TokioAccepter, ChannelError> {
        let endpoint = Endpoint::parse(target)?;
        let addr = endpoint
            .listen_addr()
            .ok_or_else(|| ChannelError::InvalidTarget(target.to_string()))?;
        Ok(TokioAccepter {
            handle: self.runtime.handle().clone(),
            addr,
            events: self.events_tx.clone(),
            task: None,
            stopped: false,
        })
    }

    fn new_channel(&mut self) -> (TokioChannel, DriverParts) {
        let id = ChannelId::next();
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (read_tx, read_enabled) = watch::channel(false);
        let shared = Rc::new(Shared::default());
        self.channels.push((id, Rc::downgrade(&shared)));

        let channel = TokioChannel {
            id,
            commands: commands_tx,
            read_enabled: read_tx,
            shared,
            close_requested: false,
        };
        (
            channel,
            DriverParts {
                id,
                commands,
                read_enabled,
            },
        )
    }

    fn shared(&self, id: ChannelId) -> Option<Rc<Shared>> {
        self.channels
            .iter()
            .find(|(candidate, _)| *candidate == id)
            .and_then(|(_, shared)| shared.upgrade())
    }

    /// Pick the next channel that wants a `Writable` event, round robin.
    fn next_writable(&mut self) -> Option<ChannelId> {
        self.channels.retain(|(_, shared)| shared.strong_count() > 0);
        let count = self.channels.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let (id, shared) = &self.channels[index];
            let Some(shared) = shared.upgrade() else {
                continue;
            };
            if shared.open.get() && !shared.closed.get() && shared.write_enabled.get() {
                self.cursor = index + 1;
                return Some(*id);
            }
        }
        None
    }

    fn translate(&mut self, raw: RawEvent) -> Event {
        match raw {
            RawEvent::Opened {
                id,
                result,
                local,
                remote,
            } => {
                if let Some(shared) = self.shared(id) {
                    shared.open.set(result.is_ok());
                    *shared.local.borrow_mut() = local;
                    *shared.remote.borrow_mut() = remote;
                }
                Event::Opened(id, result)
            }
            RawEvent::Readable(id, result) => Event::Readable(id, result),
            RawEvent::Closed(id) => {
                if let Some(shared) = self.shared(id) {
                    shared.closed.set(true);
                }
                self.channels.retain(|(candidate, _)| *candidate != id);
                Event::Closed(id)
            }
            RawEvent::Accepted {
                stream,
                local,
                remote,
            } => {
                let (channel, parts) = self.new_channel();
                channel.shared.open.set(true);
                *channel.shared.local.borrow_mut() = local;
                *channel.shared.remote.borrow_mut() = remote;

                let events = self.events_tx.clone();
                let (reader, writer) = stream.into_split();
                self.runtime.spawn(drive(parts, reader, writer, events));
                Event::Accepted(Box::new(channel))
            }
            RawEvent::AccepterShutdown => Event::AccepterShutdown,
            RawEvent::Interrupt => Event::Interrupt,
        }
    }
}

impl Reactor for TokioReactor {
    fn open(&mut self, target: &str) -> Result<Box<dyn Channel>, ChannelError> {
        let endpoint = Endpoint::parse(target)?;
        let (channel, parts) = self.new_channel();
        let events = self.events_tx.clone();
        let target = target.to_string();

        debug!("{}: opening {}", channel.id, target);
        self.runtime.spawn(async move {
            match connect(&endpoint).await {
                Ok(connection) => {
                    let _ = events.send(RawEvent::Opened {
                        id: parts.id,
                        result: Ok(()),
                        local: connection.local,
                        remote: connection.remote,
                    });
                    drive(parts, connection.reader, connection.writer, events).await;
                }
                Err(e) => {
                    let _ = events.send(RawEvent::Opened {
                        id: parts.id,
                        result: Err(ChannelError::OpenFailed {
                            target,
                            message: e.to_string(),
                        }),
                        local: None,
                        remote: None,
                    });
                }
            }
        });

        Ok(Box::new(channel))
    }

    fn wait(&mut self, timeout: Duration) -> Option<Event> {
        let writable = self.next_writable();
        let events = &mut self.events;
        let raw = self.runtime.block_on(async move {
            // Let the I/O tasks run before looking at the queue
            tokio::task::yield_now().await;
            if let Ok(raw) = events.try_recv() {
                return Some(raw);
            }
            if writable.is_some() {
                return None;
            }
            tokio::time::timeout(timeout, events.recv())
                .await
                .ok()
                .flatten()
        });

        match raw {
            Some(raw) => Some(self.translate(raw)),
            None => writable.map(Event::Writable),
        }
    }
}

/// TCP accepter created by [`TokioReactor::listen`].
pub struct TokioAccepter {
    handle: Handle,
    addr: String,
    events: mpsc::UnboundedSender<RawEvent>,
    task: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Accepter for TokioAccepter {
    fn startup(&mut self) -> Result<(), ChannelError> {
        if self.task.is_some() || self.stopped {
            return Ok(());
        }

        let listener = std::net::TcpListener::bind(&self.addr)?;
        listener.set_nonblocking(true)?;
        let listener = {
            let _guard = self.handle.enter();
            TcpListener::from_std(listener)?
        };
        debug!("accepting on {}", self.addr);

        let events = self.events.clone();
        self.task = Some(self.handle.spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let local = stream.local_addr().ok().map(|a| a.to_string());
                        let accepted = RawEvent::Accepted {
                            stream,
                            local,
                            remote: Some(peer.to_string()),
                        };
                        if events.send(accepted).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }));
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let _ = self.events.send(RawEvent::AccepterShutdown);
    }
}

/// An established connection, split for the driver task.
struct Connection {
    reader: BoxReader,
    writer: BoxWriter,
    local: Option<String>,
    remote: Option<String>,
}

async fn connect(endpoint: &Endpoint) -> io::Result<Connection> {
    match endpoint {
        Endpoint::Tcp { .. } => {
            let addr = endpoint.socket_addr().unwrap_or_default();
            let stream = TcpStream::connect(addr.as_str()).await?;
            let local = stream.local_addr().ok().map(|a| a.to_string());
            let remote = stream.peer_addr().ok().map(|a| a.to_string());
            let (reader, writer) = stream.into_split();
            Ok(Connection {
                reader: Box::new(reader),
                writer: Box::new(writer),
                local,
                remote,
            })
        }
        Endpoint::Console => Ok(Connection {
            reader: Box::new(tokio::io::stdin()),
            writer: Box::new(tokio::io::stdout()),
            local: None,
            remote: None,
        }),
        Endpoint::Program { command, stderr } => {
            let mut child = tokio::process::Command::new(&command[0])
                .args(&command[1..])
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(if *stderr { Stdio::piped() } else { Stdio::inherit() })
                .spawn()?;

            let stdin = child
                .stdin
                .take()
                .ok_or_else(|| io::Error::other("child stdin unavailable"))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| io::Error::other("child stdout unavailable"))?;
            let reader: BoxReader = match child.stderr.take() {
                Some(errors) => Box::new(merge_output(stdout, errors)),
                None => Box::new(stdout),
            };
            let name = command[0].clone();
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) => debug!("{} exited: {}", name, status),
                    Err(e) => warn!("{} wait failed: {}", name, e),
                }
            });

            Ok(Connection {
                reader,
                writer: Box::new(stdin),
                local: None,
                remote: Some(command.join(" ")),
            })
        }
    }
}

/// Interleave two output streams of a program into one, in arrival order.
///
/// The merged stream ends once both inputs have.
fn merge_output<O, E>(mut stdout: O, mut stderr: E) -> DuplexStream
where
    O: AsyncRead + Send + Unpin + 'static,
    E: AsyncRead + Send + Unpin + 'static,
{
    let (merged, mut writer) = tokio::io::duplex(READ_CHUNK);
    tokio::spawn(async move {
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];
        let (mut out_open, mut err_open) = (true, true);

        while out_open || err_open {
            let written = tokio::select! {
                result = stdout.read(&mut out_buf), if out_open => match result {
                    Ok(n) if n > 0 => writer.write_all(&out_buf[..n]).await,
                    _ => {
                        out_open = false;
                        Ok(())
                    }
                },
                result = stderr.read(&mut err_buf), if err_open => match result {
                    Ok(n) if n > 0 => writer.write_all(&err_buf[..n]).await,
                    _ => {
                        err_open = false;
                        Ok(())
                    }
                },
            };
            if written.is_err() {
                break;
            }
        }
    });
    merged
}

/// Wait until read readiness is enabled, then read one chunk.
async fn read_chunk<R>(
    reader: &mut R,
    read_enabled: &mut watch::Receiver<bool>,
    buf: &mut [u8],
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    while !*read_enabled.borrow_and_update() {
        if read_enabled.changed().await.is_err() {
            // Handle dropped, nothing will ever enable reads again
            std::future::pending::<()>().await;
        }
    }
    reader.read(buf).await
}

/// Pump one channel until its handle asks for a close.
async fn drive<R, W>(
    parts: DriverParts,
    mut reader: R,
    mut writer: W,
    events: mpsc::UnboundedSender<RawEvent>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let DriverParts {
        id,
        mut commands,
        mut read_enabled,
    } = parts;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut failed = false;

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Write(data)) => {
                    if failed {
                        continue;
                    }
                    let written = async {
                        writer.write_all(&data).await?;
                        writer.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        failed = true;
                        let _ = events.send(RawEvent::Readable(id, Err(e.into())));
                    }
                }
                Some(Command::Close) | None => break,
            },
            result = read_chunk(&mut reader, &mut read_enabled, &mut buf), if !failed => {
                let event = match result {
                    Ok(0) => {
                        failed = true;
                        Err(ChannelError::RemoteClosed)
                    }
                    Ok(n) => Ok(Bytes::copy_from_slice(&buf[..n])),
                    Err(e) => {
                        failed = true;
                        Err(e.into())
                    }
                };
                let _ = events.send(RawEvent::Readable(id, event));
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        trace!("{}: shutdown: {}", id, e);
    }
    let _ = events.send(RawEvent::Closed(id));
}
