use std::io::{BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};

use source_inspector::debugger::{Handle, PendingHandles};
use source_inspector::protocol::{
    read_frame, write_frame, Debugger, DebuggerEvent, Event, Response, TcpDebugger, V8Message,
};
use source_inspector::trace::OptReferenceParser;
use source_inspector::{trace_session, Error, InspectorConfig};

/// Minimal stand-in for a V8 target listening on a debug port.
struct FakeTarget {
    stream: TcpStream,
    reader: BufReader<TcpStream>,
}

impl FakeTarget {
    fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = listener.accept().unwrap();
        let reader = BufReader::new(stream.try_clone().unwrap());
        Self { stream, reader }
    }

    fn handshake(&mut self) {
        self.stream
            .write_all(
                b"Type: connect\r\nV8-Version: 3.14.5.9\r\nProtocol-Version: 1\r\n\
                  Embedding-Host: node v0.10.48\r\nContent-Length: 0\r\n\r\n",
            )
            .unwrap();
    }

    fn event(&mut self, name: &str, body: Value) {
        let event = V8Message::Event(Event {
            seq: 0,
            event: name.into(),
            body: Some(body),
        });
        write_frame(&mut self.stream, &event).unwrap();
    }

    /// Read the next request and answer it with `body`.
    fn answer(&mut self, expected: &str, body: Value, refs: Vec<Value>) -> Option<Value> {
        let frame = read_frame(&mut self.reader).unwrap().unwrap();
        let request = match serde_json::from_slice::<V8Message>(&frame.body).unwrap() {
            V8Message::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        };
        assert_eq!(request.command, expected);
        let response = Response::ok(request.seq, &request.command, body).with_refs(refs);
        write_frame(&mut self.stream, &V8Message::Response(response)).unwrap();
        request.arguments
    }
}

fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[test]
fn traces_a_session_over_loopback() {
    let (listener, port) = listener();
    let target = thread::spawn(move || {
        let mut target = FakeTarget::accept(&listener);
        target.handshake();
        let step = target.answer("continue", json!({}), vec![]);
        assert_eq!(step, Some(json!({"stepaction": "in"})));

        target.event(
            "break",
            json!({"sourceLine": 1, "script": {"name": "/srv/app.js"}}),
        );
        target.answer(
            "backtrace",
            json!({
                "toFrame": 1,
                "frames": [{
                    "func": {"ref": 20}, "script": {"ref": 21}, "line": 1,
                    "locals": [{"name": "xs", "value": {"ref": 30}}],
                    "arguments": [{"name": "require", "value": {"ref": 40}}]
                }]
            }),
            vec![
                json!({"handle": 20, "type": "function", "name": "", "inferredName": ""}),
                json!({"handle": 21, "type": "script", "name": "/srv/app.js"}),
            ],
        );
        let first = target.answer(
            "lookup",
            json!({"30": {"handle": 30, "type": "object", "className": "Array",
                          "properties": [{"name": 0, "ref": 31}]}}),
            vec![],
        );
        assert_eq!(first, Some(json!({"handles": [30]})));
        target.answer(
            "lookup",
            json!({"31": {"handle": 31, "type": "string", "value": "a"}}),
            vec![],
        );
        let step = target.answer("continue", json!({}), vec![]);
        assert_eq!(step, Some(json!({"stepaction": "in"})));

        target.event(
            "break",
            json!({"sourceLine": 12, "script": {"name": "/usr/lib/node/module.js"}}),
        );
        let step = target.answer("continue", json!({}), vec![]);
        assert_eq!(step, Some(json!({"stepaction": "out"})));
        // Dropping the stream closes the session.
    });

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let debugger = TcpDebugger::new(stream, Some(Duration::from_secs(5))).unwrap();
    let traces = trace_session(debugger, OptReferenceParser, &InspectorConfig::new("app.js", port));
    target.join().unwrap();

    assert_eq!(traces.len(), 1);
    assert_eq!(
        serde_json::to_value(&traces.records()[0]).unwrap(),
        json!({
            "event": "step_line",
            "func_name": "",
            "line": 1,
            "variables": {"xs": ["REF", 30]},
            "heap": {"30": ["LIST", "a"]}
        })
    );
}

#[test]
fn events_arriving_mid_request_are_queued_in_order() {
    let (listener, port) = listener();
    let target = thread::spawn(move || {
        let mut target = FakeTarget::accept(&listener);
        let frame = read_frame(&mut target.reader).unwrap().unwrap();
        let request = match serde_json::from_slice::<V8Message>(&frame.body).unwrap() {
            V8Message::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        };
        target.event("afterCompile", json!({}));
        target.event("break", json!({"sourceLine": 2, "script": {"name": "app.js"}}));
        let response = Response::ok(request.seq, "lookup", json!({"5": {"handle": 5, "type": "null"}}));
        write_frame(&mut target.stream, &V8Message::Response(response)).unwrap();
    });

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut debugger = TcpDebugger::new(stream, Some(Duration::from_secs(5))).unwrap();
    let mirrors = debugger.lookup(&PendingHandles::from([Handle(5)])).unwrap();
    target.join().unwrap();

    assert_eq!(mirrors[&Handle(5)]["type"], "null");
    assert_eq!(debugger.next_event(), DebuggerEvent::Other("afterCompile".into()));
    assert!(matches!(debugger.next_event(), DebuggerEvent::Break(b) if b.source_line == Some(2)));
    assert_eq!(debugger.next_event(), DebuggerEvent::Close);
    assert!(matches!(
        debugger.request("continue", None),
        Err(Error::Disconnected)
    ));
}

#[test]
fn unsuccessful_response_becomes_protocol_error() {
    let (listener, port) = listener();
    let target = thread::spawn(move || {
        let mut target = FakeTarget::accept(&listener);
        let frame = read_frame(&mut target.reader).unwrap().unwrap();
        let request = match serde_json::from_slice::<V8Message>(&frame.body).unwrap() {
            V8Message::Request(request) => request,
            other => panic!("expected a request, got {other:?}"),
        };
        let mut response = Response::ok(request.seq, "backtrace", Value::Null);
        response.success = false;
        response.message = Some("No frames".into());
        response.body = None;
        write_frame(&mut target.stream, &V8Message::Response(response)).unwrap();
    });

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut debugger = TcpDebugger::new(stream, Some(Duration::from_secs(5))).unwrap();
    let err = debugger.backtrace().unwrap_err();
    target.join().unwrap();

    match err {
        Error::Protocol { command, message } => {
            assert_eq!(command, "backtrace");
            assert_eq!(message, "No frames");
        }
        other => panic!("expected a protocol error, got {other:?}"),
    }
    assert!(!Error::Protocol {
        command: String::new(),
        message: String::new()
    }
    .is_fatal());
}

#[test]
fn silent_target_times_out() {
    let (listener, port) = listener();
    let target = thread::spawn(move || {
        let mut target = FakeTarget::accept(&listener);
        // Swallow the request and never answer.
        let _ = read_frame(&mut target.reader);
        thread::sleep(Duration::from_millis(500));
    });

    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    let mut debugger = TcpDebugger::new(stream, Some(Duration::from_millis(100))).unwrap();
    let err = debugger.request("backtrace", Some(json!({}))).unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert!(err.is_fatal());
    target.join().unwrap();
}
