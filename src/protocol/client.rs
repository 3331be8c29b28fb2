use std::collections::{BTreeMap, VecDeque};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use super::backtrace::{decode_backtrace, Backtrace};
use super::message::{DebuggerEvent, Request, Response, V8Message};
use crate::debugger::{Handle, PendingHandles, StepAction};
use crate::error::{Error, Result};

/// Largest body `read_frame` will allocate for. Backtraces of deep stacks stay far below this.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// One `Content-Length` framed message: its headers and raw body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The header-only greeting V8 sends right after accepting a connection.
    pub fn is_handshake(&self) -> bool {
        self.body.is_empty() && self.header("Type") == Some("connect")
    }
}

/// Read one frame. `Ok(None)` means the stream ended cleanly between frames.
pub fn read_frame<R: BufRead>(reader: &mut R) -> Result<Option<Frame>> {
    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            if headers.is_empty() {
                return Ok(None);
            }
            return Err(Error::Disconnected);
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if headers.is_empty() {
                // Stray separator between frames.
                continue;
            }
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(Error::Frame(format!("unparsable header line `{line}`")));
        };
        let (key, value) = (key.trim().to_string(), value.trim().to_string());
        if key.eq_ignore_ascii_case("Content-Length") {
            content_length = Some(
                value
                    .parse()
                    .map_err(|_| Error::Frame(format!("bad Content-Length `{value}`")))?,
            );
        }
        headers.push((key, value));
    }

    let len = content_length.ok_or_else(|| Error::Frame("missing Content-Length".into()))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::Frame(format!(
            "Content-Length {len} exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Ok(Some(Frame { headers, body }))
}

pub fn write_frame<W: Write>(writer: &mut W, message: &V8Message) -> Result<()> {
    let payload = serde_json::to_vec(message)?;
    write!(writer, "Content-Length: {}\r\n\r\n", payload.len())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

/// The debugger-protocol session as seen by the trace engine.
///
/// Implementors only provide the raw request/event plumbing; the typed
/// requests are built on top of [`Debugger::request`].
pub trait Debugger {
    /// Send one request and block until its response arrives.
    fn request(&mut self, command: &str, arguments: Option<Value>) -> Result<Response>;

    /// Next event from the target, blocking while it runs.
    fn next_event(&mut self) -> DebuggerEvent;

    /// Resume the target. `None` runs freely to the next break.
    fn continue_with(&mut self, action: Option<StepAction>) -> Result<()> {
        let arguments = action.map(|a| json!({ "stepaction": a }));
        self.request("continue", arguments)?;
        Ok(())
    }

    fn backtrace(&mut self) -> Result<Backtrace> {
        let response = self.request("backtrace", Some(json!({})))?;
        decode_backtrace(response.body, &response.refs)
    }

    /// Resolve one batch of handles to their raw mirrors.
    fn lookup(&mut self, handles: &PendingHandles) -> Result<BTreeMap<Handle, Value>> {
        let handles: Vec<Handle> = handles.iter().copied().collect();
        let response = self.request("lookup", Some(json!({ "handles": handles })))?;
        let body = match response.body {
            Some(Value::Object(map)) => map,
            Some(Value::Null) | None => return Ok(BTreeMap::new()),
            Some(other) => {
                return Err(Error::protocol(
                    "lookup",
                    format!("expected an object body, got {other}"),
                ))
            }
        };

        body.into_iter()
            .map(|(key, mirror)| {
                key.parse::<i64>()
                    .map(|h| (Handle(h), mirror))
                    .map_err(|_| Error::protocol("lookup", format!("non-numeric handle `{key}`")))
            })
            .collect()
    }
}

/// V8 debugger client over TCP.
pub struct TcpDebugger {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    seq: u64,
    queued_events: VecDeque<DebuggerEvent>,
    request_timeout: Option<Duration>,
    closed: bool,
}

impl TcpDebugger {
    pub fn new(stream: TcpStream, request_timeout: Option<Duration>) -> Result<Self> {
        stream.set_nodelay(true)?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            stream,
            reader,
            seq: 0,
            queued_events: VecDeque::new(),
            request_timeout,
            closed: false,
        })
    }

    /// Connect to `host:port`, retrying while the target is still starting up.
    pub fn connect(
        host: &str,
        port: u16,
        attempts: u32,
        interval: Duration,
        request_timeout: Option<Duration>,
    ) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match TcpStream::connect((host, port)) {
                Ok(stream) => {
                    info!(host, port, attempt, "attached to debugger port");
                    return Self::new(stream, request_timeout);
                }
                Err(e) if attempt < attempts => {
                    debug!(host, port, attempt, error = %e, "debugger port not ready");
                    attempt += 1;
                    thread::sleep(interval);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn read_message(&mut self) -> Result<Option<Frame>> {
        let frame = read_frame(&mut self.reader)?;
        if let Some(frame) = &frame {
            trace!(body = %String::from_utf8_lossy(&frame.body), "<-");
        }
        Ok(frame)
    }

    fn classify(frame: &Frame) -> Result<Inbound> {
        if frame.is_handshake() {
            debug!(
                v8 = frame.header("V8-Version").unwrap_or("?"),
                host = frame.header("Embedding-Host").unwrap_or("?"),
                "handshake"
            );
            return Ok(Inbound::Event(DebuggerEvent::Connect));
        }
        if frame.body.is_empty() {
            return Ok(Inbound::Nothing);
        }
        match serde_json::from_slice::<V8Message>(&frame.body)? {
            V8Message::Event(event) => Ok(Inbound::Event(event.into())),
            V8Message::Response(response) => Ok(Inbound::Response(response)),
            V8Message::Request(request) => {
                warn!(command = %request.command, "target sent a request; ignoring");
                Ok(Inbound::Nothing)
            }
        }
    }

    fn with_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }
}

/// What a single incoming frame turned out to be.
enum Inbound {
    Event(DebuggerEvent),
    Response(Response),
    Nothing,
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Debugger for TcpDebugger {
    fn request(&mut self, command: &str, arguments: Option<Value>) -> Result<Response> {
        if self.closed {
            return Err(Error::Disconnected);
        }
        let seq = self.next_seq();
        let message = V8Message::Request(Request {
            seq,
            command: command.to_string(),
            arguments,
        });
        debug!(seq, command, "-> request");
        if let Err(e) = write_frame(&mut self.stream, &message) {
            self.closed = e.is_fatal();
            return Err(e);
        }

        self.with_read_timeout(self.request_timeout)?;
        let outcome = loop {
            let frame = match self.read_message() {
                Ok(Some(frame)) => frame,
                Ok(None) => break Err(Error::Disconnected),
                Err(Error::Io(e)) if is_timeout(&e) => {
                    break Err(Error::Timeout {
                        command: command.to_string(),
                        timeout: self.request_timeout.unwrap_or_default(),
                    })
                }
                Err(e) => break Err(e),
            };
            match Self::classify(&frame) {
                Ok(Inbound::Response(response)) if response.request_seq == seq => {
                    break Ok(response)
                }
                Ok(Inbound::Response(response)) => {
                    warn!(
                        expected = seq,
                        got = response.request_seq,
                        command = %response.command,
                        "dropping response to another request"
                    );
                }
                Ok(Inbound::Event(event)) => self.queued_events.push_back(event),
                Ok(Inbound::Nothing) => {}
                Err(e) => self.queued_events.push_back(DebuggerEvent::Error(e.to_string())),
            }
        };
        self.with_read_timeout(None)?;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if e.is_fatal() {
                    self.closed = true;
                }
                return Err(e);
            }
        };
        if !response.success {
            let message = response
                .message
                .unwrap_or_else(|| "no message".to_string());
            return Err(Error::protocol(command, message));
        }
        debug!(seq, command, running = response.running, "<- response");
        Ok(response)
    }

    fn next_event(&mut self) -> DebuggerEvent {
        if let Some(event) = self.queued_events.pop_front() {
            return event;
        }
        if self.closed {
            return DebuggerEvent::Close;
        }
        loop {
            let frame = match self.read_message() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    self.closed = true;
                    return DebuggerEvent::Close;
                }
                Err(e) => {
                    if e.is_fatal() {
                        self.closed = true;
                    }
                    return DebuggerEvent::Error(e.to_string());
                }
            };
            match Self::classify(&frame) {
                Ok(Inbound::Event(event)) => return event,
                Ok(Inbound::Response(response)) => {
                    debug!(request_seq = response.request_seq, "late response ignored");
                }
                Ok(Inbound::Nothing) => {}
                Err(e) => return DebuggerEvent::Error(e.to_string()),
            }
        }
    }
}
