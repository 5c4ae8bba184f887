//! Chat connection state machine.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──TCP up, PASS/NICK/USER──► Registering
//!       ▲                                                               │ 001
//!       │                                              CAP REQ, JOIN ◄──┘
//!       └──── connection lost (reconnect after backoff) ◄──── Joined ◄── own JOIN
//! ```
//!
//! `PING` is answered immediately. Once welcomed the client also sends its
//! own keep-alive `PING`. Reconnect delays double from the initial delay up
//! to the cap and reset on the next welcome.

use crate::reactor::{ReactorHandle, Socket, SocketError, Timer};
use puppet_domain::{Backoff, ChatEvent, LineBuffer, Message, Privmsg};
use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::{Rc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Not connected to chat")]
    NotConnected,

    #[error("Channel not joined yet")]
    NotJoined,

    #[error("Line contains a line break: {0:?}")]
    InvalidLine(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Disconnected,
    Connecting,
    Registering,
    Joined,
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChatState::Disconnected => "disconnected",
            ChatState::Connecting => "connecting",
            ChatState::Registering => "registering",
            ChatState::Joined => "joined",
        };
        write!(f, "{}", name)
    }
}

/// Connection parameters, from the `[chat]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatOptions {
    /// `host:port`.
    pub server: String,
    pub nick: String,
    /// Sent as `PASS` (e.g. `oauth:...`) when set.
    pub password: Option<String>,
    pub channel: String,
    pub keepalive: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            server: "irc.chat.twitch.tv:6667".to_string(),
            nick: String::new(),
            password: None,
            channel: String::new(),
            keepalive: Duration::from_secs(60),
            reconnect_initial: Duration::from_secs(1),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

impl ChatOptions {
    /// Channel name as sent on the wire: lowercase with a leading `#`.
    pub fn channel_name(&self) -> String {
        let name = self.channel.trim().trim_start_matches('#').to_lowercase();
        format!("#{}", name)
    }
}

type Handler = Box<dyn FnMut(ChatEvent)>;

struct Connection {
    state: ChatState,
    socket: Option<Socket>,
    lines: LineBuffer,
    backoff: Backoff,
    keepalive: Timer,
    reconnect: Timer,
    /// Identifies the current connection attempt; callbacks from older
    /// attempts are ignored.
    generation: u64,
    /// `connect` called and not cancelled by `disconnect`.
    wanted: bool,
}

struct ChatInner {
    reactor: ReactorHandle,
    options: ChatOptions,
    conn: RefCell<Connection>,
    /// Kept apart from `conn` so the handler may call back into the client.
    handler: RefCell<Option<Handler>>,
}

/// Chat connection owned by the application.
///
/// Events reach the handler installed with [`set_handler`](Self::set_handler).
/// Use a [`ChatSender`] inside the handler to reply without keeping the
/// client alive.
pub struct ChatClient {
    inner: Rc<ChatInner>,
}

impl ChatClient {
    pub fn new(reactor: ReactorHandle, options: ChatOptions) -> Self {
        let backoff = Backoff::new(options.reconnect_initial, options.reconnect_max);
        let conn = Connection {
            state: ChatState::Disconnected,
            socket: None,
            lines: LineBuffer::new(),
            backoff,
            keepalive: reactor.create_timer(),
            reconnect: reactor.create_timer(),
            generation: 0,
            wanted: false,
        };
        Self {
            inner: Rc::new(ChatInner {
                reactor,
                options,
                conn: RefCell::new(conn),
                handler: RefCell::new(None),
            }),
        }
    }

    pub fn set_handler(&self, handler: impl FnMut(ChatEvent) + 'static) {
        *self.inner.handler.borrow_mut() = Some(Box::new(handler));
    }

    /// Connect, and keep reconnecting until [`disconnect`](Self::disconnect).
    pub fn connect(&self) {
        {
            let mut conn = self.inner.conn.borrow_mut();
            conn.wanted = true;
            if conn.state != ChatState::Disconnected {
                return;
            }
            conn.reconnect.stop();
        }
        self.inner.start_connect();
    }

    pub fn disconnect(&self) {
        let socket = {
            let mut conn = self.inner.conn.borrow_mut();
            conn.wanted = false;
            conn.generation += 1;
            conn.state = ChatState::Disconnected;
            conn.keepalive.stop();
            conn.reconnect.stop();
            conn.lines.clear();
            conn.socket.take()
        };
        if socket.is_some() {
            info!("Leaving chat");
        }
        drop(socket);
    }

    pub fn state(&self) -> ChatState {
        self.inner.conn.borrow().state
    }

    pub fn options(&self) -> &ChatOptions {
        &self.inner.options
    }

    /// Reconnect attempts since the last welcome.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.conn.borrow().backoff.attempts()
    }

    pub fn sender(&self) -> ChatSender {
        ChatSender {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn send_privmsg(&self, text: &str) -> Result<(), ChatError> {
        self.inner.send_privmsg(text)
    }

    pub fn send_raw(&self, line: &str) -> Result<(), ChatError> {
        self.inner.send_line(line)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Weak sending handle for use inside event handlers.
#[derive(Clone)]
pub struct ChatSender {
    inner: Weak<ChatInner>,
}

impl ChatSender {
    pub fn send_privmsg(&self, text: &str) -> Result<(), ChatError> {
        self.inner
            .upgrade()
            .ok_or(ChatError::NotConnected)?
            .send_privmsg(text)
    }

    pub fn send_raw(&self, line: &str) -> Result<(), ChatError> {
        self.inner
            .upgrade()
            .ok_or(ChatError::NotConnected)?
            .send_line(line)
    }
}

impl ChatInner {
    fn start_connect(self: &Rc<Self>) {
        let generation = {
            let mut conn = self.conn.borrow_mut();
            conn.generation += 1;
            conn.state = ChatState::Connecting;
            conn.lines.clear();
            conn.generation
        };
        info!("Connecting to chat at {}", self.options.server);
        let weak = Rc::downgrade(self);
        self.reactor.connect(self.options.server.clone(), move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connected(generation, result);
            }
        });
    }

    fn is_current(&self, generation: u64) -> bool {
        let conn = self.conn.borrow();
        conn.wanted && conn.generation == generation
    }

    fn on_connected(self: &Rc<Self>, generation: u64, result: io::Result<Socket>) {
        if !self.is_current(generation) {
            debug!("Ignoring stale chat connection attempt");
            return;
        }
        let mut socket = match result {
            Ok(socket) => socket,
            Err(e) => {
                warn!("Chat connection failed: {}", e);
                self.connection_lost(format!("connect failed: {}", e));
                return;
            }
        };

        let weak = Rc::downgrade(self);
        let started = socket.start_read(move |chunk| {
            if let Some(inner) = weak.upgrade() {
                inner.on_data(generation, chunk);
            }
        });
        if let Err(e) = started {
            self.connection_lost(e.to_string());
            return;
        }

        {
            let mut conn = self.conn.borrow_mut();
            conn.socket = Some(socket);
            conn.state = ChatState::Registering;
        }
        debug!("Chat socket up, registering as {}", self.options.nick);

        let nick = &self.options.nick;
        let mut lines = Vec::with_capacity(3);
        if let Some(password) = &self.options.password {
            lines.push(format!("PASS {}", password));
        }
        lines.push(format!("NICK {}", nick));
        lines.push(format!("USER {} 8 * :{}", nick, nick));
        for line in lines {
            if let Err(e) = self.send_line(&line) {
                warn!("Registration write failed: {}", e);
            }
        }
    }

    fn on_data(self: &Rc<Self>, generation: u64, chunk: Result<&[u8], SocketError>) {
        if !self.is_current(generation) {
            return;
        }
        match chunk {
            Ok(bytes) => {
                let lines = self.conn.borrow_mut().lines.feed(bytes);
                for line in lines {
                    // A handler may disconnect mid-batch.
                    if !self.is_current(generation) {
                        return;
                    }
                    self.handle_line(&line);
                }
            }
            Err(e) => self.connection_lost(e.to_string()),
        }
    }

    fn handle_line(self: &Rc<Self>, line: &str) {
        let Some(message) = Message::parse(line) else {
            trace!("Dropping malformed chat line: {:?}", line);
            return;
        };
        trace!("< {}", line);

        match message.command.as_str() {
            "PING" => {
                let pong = Message::new("PONG", message.params).to_string();
                if let Err(e) = self.send_line(&pong) {
                    warn!("Failed to answer PING: {}", e);
                }
            }
            "001" => self.on_welcome(),
            "JOIN" if self.is_own(&message) => {
                let channel = message.param(0).unwrap_or_default().to_string();
                self.conn.borrow_mut().state = ChatState::Joined;
                info!("Joined {}", channel);
                self.emit(ChatEvent::Joined { channel });
            }
            "RECONNECT" => self.connection_lost("server requested reconnect".to_string()),
            "PRIVMSG" => match Privmsg::from_message(&message) {
                Some(privmsg) => self.emit(ChatEvent::Privmsg(privmsg)),
                None => self.emit(ChatEvent::Other(message)),
            },
            _ => self.emit(ChatEvent::Other(message)),
        }
    }

    fn is_own(&self, message: &Message) -> bool {
        message
            .nick()
            .is_some_and(|nick| nick.eq_ignore_ascii_case(&self.options.nick))
    }

    fn on_welcome(self: &Rc<Self>) {
        info!("Chat registration accepted");
        {
            let mut conn = self.conn.borrow_mut();
            conn.backoff.reset();
            let weak = Rc::downgrade(self);
            let period = self.options.keepalive;
            conn.keepalive.start(
                period,
                period,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade()
                        && let Err(e) = inner.send_line("PING :keepalive")
                    {
                        debug!("Keep-alive not sent: {}", e);
                    }
                }),
            );
        }
        let join = format!("JOIN {}", self.options.channel_name());
        for line in [
            "CAP REQ :twitch.tv/tags",
            "CAP REQ :twitch.tv/commands",
            join.as_str(),
        ] {
            if let Err(e) = self.send_line(line) {
                warn!("Write after welcome failed: {}", e);
            }
        }
        self.emit(ChatEvent::Welcome);
    }

    fn connection_lost(self: &Rc<Self>, reason: String) {
        let (socket, wanted) = {
            let mut conn = self.conn.borrow_mut();
            conn.generation += 1;
            conn.state = ChatState::Disconnected;
            conn.keepalive.stop();
            conn.lines.clear();
            (conn.socket.take(), conn.wanted)
        };
        drop(socket);
        warn!("Chat connection lost: {}", reason);
        self.emit(ChatEvent::Disconnected { reason });
        if wanted {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(self: &Rc<Self>) {
        let mut conn = self.conn.borrow_mut();
        if !conn.wanted {
            return;
        }
        let delay = conn.backoff.next_delay();
        info!("Reconnecting to chat in {:?} (attempt {})", delay, conn.backoff.attempts());
        let weak = Rc::downgrade(self);
        conn.reconnect.start(
            delay,
            Duration::ZERO,
            Box::new(move || {
                if let Some(inner) = weak.upgrade()
                    && inner.conn.borrow().wanted
                {
                    inner.start_connect();
                }
            }),
        );
    }

    fn send_privmsg(&self, text: &str) -> Result<(), ChatError> {
        if self.conn.borrow().state != ChatState::Joined {
            return Err(ChatError::NotJoined);
        }
        let line = Message::new(
            "PRIVMSG",
            vec![self.options.channel_name(), text.to_string()],
        )
        .to_string();
        self.send_line(&line)
    }

    fn send_line(&self, line: &str) -> Result<(), ChatError> {
        if line.contains(['\r', '\n']) {
            return Err(ChatError::InvalidLine(line.to_string()));
        }
        let conn = self.conn.borrow();
        let socket = conn.socket.as_ref().ok_or(ChatError::NotConnected)?;
        if line.starts_with("PASS ") {
            trace!("> PASS ***");
        } else {
            trace!("> {}", line);
        }
        socket.write(format!("{}\r\n", line), None);
        Ok(())
    }

    fn emit(&self, event: ChatEvent) {
        let handler = self.handler.borrow_mut().take();
        let Some(mut handler) = handler else {
            trace!("No chat handler for {:?}", event);
            return;
        };
        handler(event);
        let mut slot = self.handler.borrow_mut();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::Reactor;
    use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;

    fn options(server: String) -> ChatOptions {
        ChatOptions {
            server,
            nick: "puppetbot".into(),
            password: Some("oauth:secret".into()),
            channel: "#Streamer".into(),
            reconnect_initial: Duration::from_millis(20),
            reconnect_max: Duration::from_millis(80),
            ..Default::default()
        }
    }

    /// Reads client lines until one starts with `prefix`; returns them all.
    fn read_until(reader: &mut BufReader<TcpStream>, prefix: &str) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap() == 0 {
                panic!("client closed before sending {prefix}");
            }
            let line = line.trim_end().to_string();
            let done = line.starts_with(prefix);
            lines.push(line);
            if done {
                return lines;
            }
        }
    }

    #[test]
    fn registers_joins_answers_ping_and_replies() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = read_until(&mut reader, "USER");

            writer.write_all(b":tmi.twitch.tv 001 puppetbot :Welcome, GLHF!\r\n").unwrap();
            seen.extend(read_until(&mut reader, "JOIN"));
            writer
                .write_all(b":puppetbot!puppetbot@puppetbot.tmi.twitch.tv JOIN #streamer\r\nPING :tmi.twitch.tv\r\n")
                .unwrap();
            seen.extend(read_until(&mut reader, "PONG"));
            writer
                .write_all(b"@display-name=Alice;badges= :alice!alice@alice.tmi.twitch.tv PRIVMSG #streamer :hey @PuppetBot\r\n")
                .unwrap();
            seen.extend(read_until(&mut reader, "PRIVMSG"));
            seen
        });

        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(reactor.handle(), options(addr));
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        let sender = client.sender();
        client.set_handler(move |event| {
            if let ChatEvent::Privmsg(msg) = &event
                && msg.mentions("puppetbot")
            {
                sender.send_privmsg(&format!("hi {}!", msg.display_name)).unwrap();
            }
            log.borrow_mut().push(event);
        });
        client.connect();
        assert_eq!(client.state(), ChatState::Connecting);

        while !events.borrow().iter().any(|e| matches!(e, ChatEvent::Privmsg(_))) {
            reactor.run_once();
        }
        // Let the reply reach the server.
        reactor.run_until_stopped_or(Duration::from_millis(50));
        let seen = server.join().unwrap();

        assert_eq!(client.state(), ChatState::Joined);
        assert_eq!(
            seen,
            vec![
                "PASS oauth:secret",
                "NICK puppetbot",
                "USER puppetbot 8 * :puppetbot",
                "CAP REQ :twitch.tv/tags",
                "CAP REQ :twitch.tv/commands",
                "JOIN #streamer",
                "PONG :tmi.twitch.tv",
                "PRIVMSG #streamer :hi Alice!",
            ]
        );
        let events = events.borrow();
        assert_eq!(events[0], ChatEvent::Welcome);
        assert_eq!(
            events[1],
            ChatEvent::Joined {
                channel: "#streamer".into()
            }
        );
    }

    #[test]
    fn reconnects_with_doubling_backoff() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            // Drop the first two connections straight away, welcome the third.
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                drop(stream);
            }
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b":tmi 001 puppetbot :hi\r\n").unwrap();
            stream
        });

        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(reactor.handle(), options(addr));
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        client.set_handler(move |event| log.borrow_mut().push(event));
        client.connect();

        while !events.borrow().contains(&ChatEvent::Welcome) {
            reactor.run_once();
        }
        let _stream = server.join().unwrap();

        let drops = events
            .borrow()
            .iter()
            .filter(|e| matches!(e, ChatEvent::Disconnected { .. }))
            .count();
        assert_eq!(drops, 2);
        assert_eq!(client.reconnect_attempts(), 0, "welcome resets the backoff");
        assert_eq!(client.state(), ChatState::Registering);
    }

    /// Turns the loop until the server thread is done.
    fn pump_until_finished<T>(reactor: &Reactor, server: &thread::JoinHandle<T>) {
        while !server.is_finished() {
            reactor.run_until_stopped_or(Duration::from_millis(10));
        }
    }

    #[test]
    fn keepalive_pings_repeat_after_welcome() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            read_until(&mut reader, "USER");
            writer.write_all(b":tmi.twitch.tv 001 puppetbot :hi\r\n").unwrap();
            read_until(&mut reader, "JOIN");
            let first = read_until(&mut reader, "PING");
            let second = read_until(&mut reader, "PING");
            (first, second)
        });

        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(
            reactor.handle(),
            ChatOptions {
                keepalive: Duration::from_millis(30),
                ..options(addr)
            },
        );
        client.connect();
        pump_until_finished(&reactor, &server);
        let (first, second) = server.join().unwrap();

        assert_eq!(first, vec!["PING :keepalive"]);
        assert_eq!(second, vec!["PING :keepalive"]);
        assert_eq!(client.state(), ChatState::Registering);
    }

    #[test]
    fn server_reconnect_request_opens_a_new_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (first, _) = listener.accept().unwrap();
            let mut writer = first.try_clone().unwrap();
            let mut reader = BufReader::new(first);
            read_until(&mut reader, "USER");
            writer.write_all(b":tmi.twitch.tv 001 puppetbot :hi\r\n").unwrap();
            read_until(&mut reader, "JOIN");
            writer.write_all(b":tmi.twitch.tv RECONNECT\r\n").unwrap();

            let (second, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(second);
            read_until(&mut reader, "USER")
        });

        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(reactor.handle(), options(addr));
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        client.set_handler(move |event| log.borrow_mut().push(event));
        client.connect();
        pump_until_finished(&reactor, &server);
        let registration = server.join().unwrap();

        assert_eq!(
            registration,
            vec![
                "PASS oauth:secret",
                "NICK puppetbot",
                "USER puppetbot 8 * :puppetbot",
            ]
        );
        assert_eq!(
            *events.borrow(),
            vec![
                ChatEvent::Welcome,
                ChatEvent::Disconnected {
                    reason: "server requested reconnect".into()
                },
            ]
        );
        assert_eq!(client.state(), ChatState::Registering);
        assert_eq!(client.reconnect_attempts(), 1);
    }

    #[test]
    fn disconnect_closes_the_socket_and_stops_reconnecting() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            read_until(&mut reader, "USER");
            writer
                .write_all(b":tmi.twitch.tv 001 puppetbot :hi\r\n:puppetbot!puppetbot@puppetbot.tmi.twitch.tv JOIN #streamer\r\n")
                .unwrap();
            read_until(&mut reader, "JOIN");

            // Returns once the client has closed its side.
            let mut rest = String::new();
            reader.read_to_string(&mut rest).unwrap();

            // Several backoff windows pass without a new connection.
            listener.set_nonblocking(true).unwrap();
            thread::sleep(Duration::from_millis(300));
            matches!(listener.accept(), Err(e) if e.kind() == ErrorKind::WouldBlock)
        });

        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(reactor.handle(), options(addr));
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        client.set_handler(move |event| log.borrow_mut().push(event));
        client.connect();
        while client.state() != ChatState::Joined {
            reactor.run_once();
        }

        client.disconnect();
        assert_eq!(client.state(), ChatState::Disconnected);
        pump_until_finished(&reactor, &server);

        assert!(server.join().unwrap(), "client reconnected after disconnect");
        assert_eq!(client.state(), ChatState::Disconnected);
        assert!(matches!(client.send_raw("PING :x"), Err(ChatError::NotConnected)));
        assert_eq!(
            *events.borrow(),
            vec![
                ChatEvent::Welcome,
                ChatEvent::Joined {
                    channel: "#streamer".into()
                },
            ]
        );
    }

    #[test]
    fn sending_requires_a_joined_channel() {
        let reactor = Reactor::new().unwrap();
        let client = ChatClient::new(reactor.handle(), options("127.0.0.1:9".into()));
        assert!(matches!(client.send_privmsg("hi"), Err(ChatError::NotJoined)));
        assert!(matches!(client.send_raw("PING :x"), Err(ChatError::NotConnected)));
        assert!(matches!(
            client.send_raw("PRIVMSG #a :x\r\nQUIT"),
            Err(ChatError::InvalidLine(_))
        ));
    }

    #[test]
    fn channel_name_is_normalized() {
        let mut opts = ChatOptions::default();
        opts.channel = " #SomeStreamer ".into();
        assert_eq!(opts.channel_name(), "#somestreamer");
        opts.channel = "other".into();
        assert_eq!(opts.channel_name(), "#other");
    }
}
