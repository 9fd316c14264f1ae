//! Modem control session.
//!
//! A [`ControlChannel`] speaks the line protocol of a VARA-style modem over
//! its control port and owns the data session: a relay whose primary leg is
//! the modem's data port and whose secondary leg is opened for every radio
//! connection and reset when the radio link drops.
//!
//! The data port stays open across radio connections. When the secondary
//! leg ends while a station is connected, the radio link is taken down with
//! `DISCONNECT`, escalating to `ABORT` if the modem does not confirm in time.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use log::{debug, error, info, trace, warn};

use super::config::ModemConfig;
use super::protocol::{ModemEvent, format_command};
use crate::channel::{Channel, ChannelId, LineBuffer, base_callsign};
use crate::error::{ChannelError, ProtocolError};
use crate::relay::{LoginCredentials, LoginFilter, Relay, Session, Slot};
use crate::transport::{Event, Reactor};

/// How long `run` waits for each event.
const WAIT_SLICE: Duration = Duration::from_secs(1);

/// Control session of a modem and owner of its data session.
pub struct ControlChannel {
    config: ModemConfig,
    channel: Option<Box<dyn Channel>>,
    incoming: LineBuffer,
    outgoing: BytesMut,
    errored: bool,
    closing: bool,
    close_issued: bool,

    /// Station on the other end of the radio link.
    connected_peer: Option<String>,
    shutting_down: bool,
    disconnecting: bool,
    abandoned: bool,

    data: Box<dyn Session>,

    /// Data session events received while waiting on the modem.
    deferred: VecDeque<Event>,
}

impl ControlChannel {
    pub fn new(config: ModemConfig) -> Self {
        let mut relay = Relay::new("data");
        relay.defer_close(Some(Slot::Primary));
        let data: Box<dyn Session> = match &config.login {
            Some(password) => Box::new(LoginFilter::new(
                relay,
                Slot::Secondary,
                LoginCredentials::new(base_callsign(&config.local_address), password.clone()),
            )),
            None => Box::new(relay),
        };

        let mut outgoing = BytesMut::new();
        outgoing.extend_from_slice(format_command(&["MYCALL", config.local_address.as_str()]).as_bytes());
        outgoing.extend_from_slice(format_command(&["LISTEN", "ON"]).as_bytes());

        Self {
            config,
            channel: None,
            incoming: LineBuffer::new(),
            outgoing,
            errored: false,
            closing: false,
            close_issued: false,
            connected_peer: None,
            shutting_down: false,
            disconnecting: false,
            abandoned: false,
            data,
            deferred: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    /// Station currently connected over the radio link.
    pub fn connected_peer(&self) -> Option<&str> {
        self.connected_peer.as_deref()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// The data session.
    pub fn data(&self) -> &dyn Session {
        &*self.data
    }

    fn control_id(&self) -> Option<ChannelId> {
        self.channel.as_ref().map(|c| c.id())
    }

    /// The control channel and the data session are both closed.
    pub fn is_finished(&self) -> bool {
        self.channel.is_none() && self.data.is_finished()
    }

    /// Open the control port and the modem's data port.
    pub fn start(&mut self, reactor: &mut dyn Reactor) -> Result<(), ChannelError> {
        info!("opening modem control {}", self.config.control_target);
        self.channel = Some(reactor.open(&self.config.control_target)?);
        let data_target = self.config.data_target.clone();
        self.data
            .relay_mut()
            .connect(reactor, Slot::Primary, &data_target)
    }

    /// Queue a command line for the modem.
    ///
    /// Nothing is sent once the control channel is gone.
    pub fn execute(&mut self, args: &[&str]) {
        let line = format_command(args);
        debug!("modem <- {}", line.trim_end());
        self.outgoing.extend_from_slice(line.as_bytes());
        self.enable_write();
    }

    fn enable_write(&mut self) {
        if self.errored || self.close_issued {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            channel.set_write_enabled(true);
        }
    }

    /// Dispatch one event, then any data session events deferred meanwhile.
    pub fn handle(&mut self, reactor: &mut dyn Reactor, event: Event) {
        self.dispatch_event(reactor, event);
        while let Some(event) = self.deferred.pop_front() {
            self.dispatch_event(reactor, event);
        }
    }

    fn dispatch_event(&mut self, reactor: &mut dyn Reactor, event: Event) {
        match event {
            Event::Interrupt => {
                if self.shutting_down {
                    warn!("interrupted again, giving up");
                    self.abandoned = true;
                } else {
                    info!("interrupted, closing modem");
                    self.shutdown(reactor);
                }
            }
            Event::Accepted(mut channel) => {
                warn!("unexpected inbound {}", channel.id());
                channel.close();
            }
            Event::AccepterShutdown => trace!("ignoring accepter shutdown"),
            event => {
                let Some(id) = event.channel() else {
                    return;
                };
                if self.control_id() == Some(id) {
                    self.on_control_event(reactor, event);
                } else if self.data.relay().owns(id) {
                    self.data.handle(reactor, event);
                    self.after_data_event(reactor);
                } else {
                    trace!("event for untracked {}: {:?}", id, event);
                }
            }
        }
    }

    /// React to the data session asking to close the modem-facing leg.
    fn after_data_event(&mut self, reactor: &mut dyn Reactor) {
        if !self.data.relay_mut().take_close_request() {
            return;
        }
        if self.connected_peer.is_some() {
            self.graceful_disconnect(reactor);
        }
        if self.data.relay().is_errored(Slot::Primary) && !self.shutting_down {
            warn!("modem data port failed");
            let relay = self.data.relay_mut();
            relay.defer_close(None);
            relay.close(Some(Slot::Primary));
        }
    }

    fn on_control_event(&mut self, reactor: &mut dyn Reactor, event: Event) {
        match event {
            Event::Opened(id, Ok(())) => {
                info!("modem control {} connected", id);
                if let Some(channel) = self.channel.as_mut() {
                    channel.set_write_enabled(true);
                    channel.set_read_enabled(true);
                }
            }
            Event::Opened(_, Err(e)) => {
                error!("modem control open error: {}", e);
                self.channel = None;
                self.shutdown(reactor);
            }
            Event::Readable(_, Ok(data)) => self.on_control_data(reactor, &data),
            Event::Readable(_, Err(e)) => {
                if e.is_remote_closed() {
                    info!("modem control: {}", e);
                } else {
                    warn!("modem control read error: {}", e);
                }
                self.errored = true;
                self.shutdown(reactor);
            }
            Event::Writable(_) => self.on_control_writable(),
            Event::Closed(id) => {
                info!("modem control {} closed", id);
                self.channel = None;
                self.close_issued = false;
                self.shutdown(reactor);
            }
            other => trace!("ignoring {:?}", other),
        }
    }

    fn on_control_data(&mut self, reactor: &mut dyn Reactor, data: &[u8]) {
        trace!("modem -> {} bytes", data.len());
        self.incoming.extend(data);

        if !self.data.relay().is_attached(Slot::Primary) {
            warn!("modem data port is gone");
            self.shutdown(reactor);
            return;
        }

        for line in self.incoming.lines() {
            if let Err(e) = self.dispatch(reactor, &line) {
                warn!("failed to dispatch {:?}: {}", line, e);
            }
        }
    }

    fn dispatch(&mut self, reactor: &mut dyn Reactor, line: &str) -> Result<(), ProtocolError> {
        debug!("modem -> {}", line);
        let event = ModemEvent::parse(line)?;
        match &event {
            ModemEvent::Connected {
                source,
                destination,
                ..
            } => {
                if let Some(peer) = &self.connected_peer {
                    return Err(ProtocolError::UnexpectedEvent {
                        command: "connected".to_string(),
                        reason: format!("already connected to {peer}"),
                    });
                }
                self.connected_peer = event.peer(&self.config.local_address).map(str::to_string);
                info!("connected: s:{} -> d:{}", source, destination);
                self.connect_spawn(reactor);
            }
            ModemEvent::Disconnected => {
                let peer = self.connected_peer.take();
                self.data.relay_mut().reset(Slot::Secondary);
                info!("disconnected from {}", peer.as_deref().unwrap_or("nobody"));
            }
            ModemEvent::Wrong => warn!("modem answered WRONG"),
            ModemEvent::Ack(command) => trace!("ignoring {}", command),
            ModemEvent::Unknown(command) => info!("unrecognized command: {}", command),
        }
        Ok(())
    }

    /// Open a fresh secondary leg for a new radio connection.
    fn connect_spawn(&mut self, reactor: &mut dyn Reactor) {
        let target = self.config.spawn_target.clone();
        let relay = self.data.relay_mut();
        relay.reset(Slot::Secondary);
        if relay.connect(reactor, Slot::Secondary, &target).is_err() {
            error!("connection failed");
            self.after_data_event(reactor);
            return;
        }
        if let Some(banner) = &self.config.banner {
            self.data
                .relay_mut()
                .enqueue(Slot::Primary, format!("{banner}\r\n").as_bytes());
        }
    }

    fn on_control_writable(&mut self) {
        if self.close_issued {
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        if !self.errored && !self.outgoing.is_empty() {
            match channel.write(&self.outgoing) {
                Ok(count) => self.outgoing.advance(count),
                Err(e) => {
                    warn!("modem control write error: {}", e);
                    self.errored = true;
                    self.outgoing.clear();
                    self.close_control();
                    return;
                }
            }
        }

        if self.errored || self.outgoing.is_empty() {
            channel.set_write_enabled(false);
            if self.closing {
                self.close_control();
            }
        }
    }

    fn close_control(&mut self) {
        if self.close_issued {
            return;
        }
        if let Some(channel) = self.channel.as_mut() {
            debug!("closing modem control {}", channel.id());
            self.close_issued = true;
            channel.close();
        }
    }

    /// Take the radio link down and wait for the modem to confirm.
    ///
    /// Blocks the event loop in bounded slices. Control channel events are
    /// handled while waiting; everything else is deferred.
    fn graceful_disconnect(&mut self, reactor: &mut dyn Reactor) {
        if self.disconnecting {
            return;
        }
        if self.errored || self.channel.is_none() {
            debug!("modem control unavailable, not disconnecting {:?}", self.connected_peer);
            return;
        }

        self.disconnecting = true;
        self.data.relay_mut().pause_writes();
        self.execute(&["DISCONNECT"]);
        let start = reactor.now();
        let abort_at = start + self.config.abort_after();
        let expire = start + self.config.disconnect_timeout;
        let mut aborted = false;

        loop {
            let now = reactor.now();
            if !aborted && now >= abort_at {
                warn!("modem has not confirmed the disconnect, aborting");
                self.execute(&["ABORT"]);
                aborted = true;
            }
            if now >= expire {
                error!("modem never confirmed the disconnect");
                self.connected_peer = None;
                break;
            }
            if self.connected_peer.is_none() || self.channel.is_none() || self.abandoned {
                break;
            }

            match reactor.wait(self.config.poll_interval) {
                Some(event) if event.channel().is_some() && event.channel() == self.control_id() => {
                    self.on_control_event(reactor, event);
                }
                Some(Event::Interrupt) if self.shutting_down => {
                    warn!("interrupted again, giving up");
                    self.abandoned = true;
                }
                // Reported again once writes resume
                Some(Event::Writable(_)) => {}
                Some(event) => self.deferred.push_back(event),
                None => {}
            }
        }
        self.data.relay_mut().resume_writes();
        self.disconnecting = false;
    }

    /// Disconnect the radio link, close the data session and then the
    /// control channel.
    pub fn shutdown(&mut self, reactor: &mut dyn Reactor) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("closing modem");

        if self.connected_peer.is_some() {
            self.graceful_disconnect(reactor);
        }

        self.data.relay_mut().defer_close(None);
        self.data.close();

        self.closing = true;
        if self.errored {
            self.close_control();
        } else {
            self.enable_write();
        }
    }

    /// Process events until closed, or until a second interrupt.
    pub fn run(&mut self, reactor: &mut dyn Reactor) {
        while !self.is_finished() && !self.abandoned {
            if let Some(event) = reactor.wait(WAIT_SLICE) {
                self.handle(reactor, event);
            }
        }
        debug!("modem control finished");
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::testing::{MockReactor, written};

    const CONTROL: &str = "tcp,localhost,8300";
    const DATA: &str = "tcp,localhost,8301";
    const SPAWN: &str = "stdio,cat";

    fn config() -> ModemConfig {
        ModemConfig {
            local_address: "N0CALL-1".to_string(),
            control_target: CONTROL.to_string(),
            data_target: DATA.to_string(),
            spawn_target: SPAWN.to_string(),
            disconnect_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
            ..ModemConfig::default()
        }
    }

    fn started(reactor: &mut MockReactor, config: ModemConfig) -> (ControlChannel, ChannelId, ChannelId) {
        let mut control = ControlChannel::new(config);
        control.start(reactor).unwrap();
        let ctl = reactor.opened_id(CONTROL).unwrap();
        let data = reactor.opened_id(DATA).unwrap();
        settle(reactor, &mut control);
        (control, ctl, data)
    }

    fn settle(reactor: &mut MockReactor, control: &mut ControlChannel) {
        for _ in 0..10_000 {
            match reactor.wait(Duration::ZERO) {
                Some(event) => control.handle(reactor, event),
                None => return,
            }
        }
        panic!("modem did not settle");
    }

    fn connect(reactor: &mut MockReactor, control: &mut ControlChannel, ctl: ChannelId) -> ChannelId {
        reactor.readable(ctl, b"CONNECTED KF7HVM-10 N0CALL-1 2300\r");
        settle(reactor, control);
        reactor.opened_id(SPAWN).unwrap()
    }

    #[test]
    fn test_announces_itself() {
        let mut reactor = MockReactor::new();
        let (_control, ctl, _) = started(&mut reactor, config());
        assert_eq!(written(&reactor, ctl), "MYCALL N0CALL-1\rLISTEN ON\r");
    }

    #[test]
    fn test_connected_spawns_and_relays() {
        let mut reactor = MockReactor::new();
        let config = ModemConfig {
            banner: Some("Welcome".to_string()),
            ..config()
        };
        let (mut control, ctl, data) = started(&mut reactor, config);
        let spawned = connect(&mut reactor, &mut control, ctl);
        assert_eq!(control.connected_peer(), Some("KF7HVM-10"));

        reactor.readable(data, b"hello\r");
        reactor.readable(spawned, b"hi there\r");
        settle(&mut reactor, &mut control);

        assert_eq!(written(&reactor, spawned), "hello\r");
        assert_eq!(written(&reactor, data), "Welcome\r\nhi there\r");
    }

    #[test]
    fn test_outbound_connection_peer_is_destination() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, _) = started(&mut reactor, config());
        reactor.readable(ctl, b"CONNECTED N0CALL-1 W1AW-10 500\r");
        settle(&mut reactor, &mut control);
        assert_eq!(control.connected_peer(), Some("W1AW-10"));
    }

    #[test]
    fn test_disconnected_resets_spawn_leg_only() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);

        reactor.readable(ctl, b"DISCONNECTED\r");
        settle(&mut reactor, &mut control);

        assert_eq!(control.connected_peer(), None);
        assert_eq!(reactor.state(spawned).borrow().close_calls, 1);
        assert_eq!(reactor.state(data).borrow().close_calls, 0);
        assert!(control.data().relay().is_attached(Slot::Primary));
        assert!(!control.data().relay().owns(spawned));

        // The next radio connection gets a fresh program
        let second = connect(&mut reactor, &mut control, ctl);
        assert_ne!(second, spawned);
        assert_eq!(control.connected_peer(), Some("KF7HVM-10"));
    }

    #[test]
    fn test_bad_lines_do_not_stop_dispatch() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, _) = started(&mut reactor, config());

        reactor.readable(ctl, b"CONNECTED KF7HVM\rPTT ON\rVERSION 4.8\r\r\nCONNECTED KF7HVM-10 N0CALL-1\r");
        settle(&mut reactor, &mut control);

        assert_eq!(control.connected_peer(), Some("KF7HVM-10"));
        assert_eq!(reactor.opened_targets().iter().filter(|t| *t == SPAWN).count(), 1);
    }

    #[test]
    fn test_second_connected_is_rejected() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, _) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);

        reactor.readable(ctl, b"CONNECTED W1AW N0CALL-1\r");
        settle(&mut reactor, &mut control);

        assert_eq!(control.connected_peer(), Some("KF7HVM-10"));
        assert_eq!(reactor.opened_id(SPAWN), Some(spawned));
        assert_eq!(reactor.state(spawned).borrow().close_calls, 0);
    }

    #[test]
    fn test_program_exit_disconnects_radio() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);
        reactor.reply_to(ctl, "DISCONNECT\r", "DISCONNECTED\r");
        let start = reactor.now;

        reactor.readable(spawned, b"73\r");
        reactor.push(Event::Readable(spawned, Err(ChannelError::RemoteClosed)));
        settle(&mut reactor, &mut control);

        assert_eq!(written(&reactor, data), "73\r");
        assert!(written(&reactor, ctl).ends_with("DISCONNECT\r"));
        assert_eq!(control.connected_peer(), None);
        assert_eq!(reactor.state(data).borrow().close_calls, 0);
        assert!(!control.data().relay().owns(spawned));
        assert!(reactor.now - start < Duration::from_secs(9));
    }

    #[test]
    fn test_disconnect_escalates_to_abort_once() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);
        let start = reactor.now;

        reactor.push(Event::Readable(spawned, Err(ChannelError::RemoteClosed)));
        settle(&mut reactor, &mut control);

        let sent = written(&reactor, ctl);
        assert_eq!(sent.matches("DISCONNECT\r").count(), 1);
        assert_eq!(sent.matches("ABORT\r").count(), 1);
        assert!(sent.ends_with("DISCONNECT\rABORT\r"));
        assert!(reactor.now - start >= Duration::from_secs(10));
        assert_eq!(control.connected_peer(), None);
        assert_eq!(reactor.state(data).borrow().close_calls, 0);
    }

    #[test]
    fn test_disconnect_polls_in_slices_while_data_port_is_congested() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);
        reactor.state(data).borrow_mut().accept_limit = Some(0);

        reactor.readable(spawned, b"73 de N0CALL\r");
        let event = reactor.wait(Duration::ZERO).unwrap();
        control.handle(&mut reactor, event);

        let before = reactor.waits;
        control.handle(&mut reactor, Event::Interrupt);

        // Ten one-second slices plus the control writes
        assert!(reactor.waits - before <= 20, "polled {} times", reactor.waits - before);
        assert!(written(&reactor, ctl).ends_with("DISCONNECT\rABORT\r"));
        assert_eq!(control.data().relay().pending(Slot::Primary), b"73 de N0CALL\r");
        assert!(reactor.state(data).borrow().write_enabled);

        reactor.state(data).borrow_mut().accept_limit = Some(4);
        settle(&mut reactor, &mut control);

        assert_eq!(written(&reactor, data), "73 de N0CALL\r");
        assert_eq!(reactor.state(data).borrow().close_calls, 1);
        assert!(control.is_finished());
    }

    #[test]
    fn test_failed_spawn_disconnects_radio() {
        let mut reactor = MockReactor::new();
        reactor.refuse(SPAWN);
        let (mut control, ctl, data) = started(&mut reactor, config());
        reactor.reply_to(ctl, "DISCONNECT\r", "DISCONNECTED\r");

        reactor.readable(ctl, b"CONNECTED KF7HVM-10 N0CALL-1\r");
        settle(&mut reactor, &mut control);

        assert!(written(&reactor, ctl).ends_with("DISCONNECT\r"));
        assert_eq!(control.connected_peer(), None);
        assert_eq!(reactor.state(data).borrow().close_calls, 0);
    }

    #[test]
    fn test_interrupt_shuts_everything_down() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());
        let spawned = connect(&mut reactor, &mut control, ctl);
        reactor.reply_to(ctl, "DISCONNECT\r", "DISCONNECTED\r");

        reactor.push(Event::Interrupt);
        settle(&mut reactor, &mut control);

        assert!(control.is_shutting_down());
        assert!(written(&reactor, ctl).ends_with("DISCONNECT\r"));
        assert_eq!(reactor.state(spawned).borrow().close_calls, 1);
        assert_eq!(reactor.state(data).borrow().close_calls, 1);
        assert_eq!(reactor.state(ctl).borrow().close_calls, 1);
        assert!(control.is_finished());
    }

    #[test]
    fn test_second_interrupt_abandons_disconnect() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, _) = started(&mut reactor, config());
        connect(&mut reactor, &mut control, ctl);
        let start = reactor.now;

        reactor.push(Event::Interrupt);
        reactor.push(Event::Interrupt);
        control.run(&mut reactor);

        assert!(!written(&reactor, ctl).contains("ABORT"));
        assert!(reactor.now - start < Duration::from_secs(9));
    }

    #[test]
    fn test_data_port_failure_shuts_down() {
        let mut reactor = MockReactor::new();
        let (mut control, ctl, data) = started(&mut reactor, config());

        reactor.push(Event::Readable(
            data,
            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset).into()),
        ));
        settle(&mut reactor, &mut control);
        assert_eq!(reactor.state(data).borrow().close_calls, 1);
        assert!(!control.is_shutting_down());

        reactor.readable(ctl, b"IAMALIVE\r");
        settle(&mut reactor, &mut control);
        assert!(control.is_shutting_down());
        assert!(control.is_finished());
    }

    #[test]
    fn test_gateway_login_uses_local_callsign() {
        let mut reactor = MockReactor::new();
        let config = ModemConfig {
            login: Some(SecretString::from("CMSTelnet")),
            ..config()
        };
        let (mut control, ctl, data) = started(&mut reactor, config);
        let gateway = connect(&mut reactor, &mut control, ctl);

        reactor.readable(gateway, b"Callsign :\r");
        reactor.readable(gateway, b"Password :\r");
        settle(&mut reactor, &mut control);

        assert_eq!(written(&reactor, gateway), "N0CALL\r\nCMSTelnet\r\n");
        assert_eq!(written(&reactor, data), "");
    }
}
