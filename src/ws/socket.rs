use crate::{
    errors::WsError,
    limits::WsLimits,
    server::session::{Consumed, Session},
    ws::frame::{encode_frame, encode_message, Frame, FrameParser, Opcode},
};
use tracing::{debug, warn};

/// Application callbacks for one WebSocket connection.
///
/// A handler is created per connection by the
/// [`WebSocketFactory`](crate::WebSocketFactory) registered for the upgraded
/// path. Callbacks run on the connection's task, in the order frames arrive.
///
/// # Examples
/// ```
/// use duplex_web::{Outbound, WebSocketHandler};
///
/// struct Echo;
///
/// impl WebSocketHandler for Echo {
///     fn text(&mut self, socket: &mut Outbound<'_>, text: String) {
///         socket.send_text(&text);
///     }
///
///     fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>) {
///         socket.send_binary(&data);
///     }
/// }
/// ```
pub trait WebSocketHandler: Send {
    /// The handshake response has been queued.
    fn connected(&mut self, socket: &mut Outbound<'_>) {
        let _ = socket;
    }

    /// A complete text message arrived.
    ///
    /// A text message that is not valid UTF-8 never reaches this method: the
    /// connection is closed instead.
    fn text(&mut self, socket: &mut Outbound<'_>, text: String);

    /// A complete binary message arrived.
    fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>);

    /// The connection is closing. Called once.
    fn closed(&mut self) {}
}

/// Sends frames to the peer from inside a [`WebSocketHandler`] callback.
pub struct Outbound<'a> {
    session: &'a mut dyn Session,
    max_payload: usize,
    close_requested: bool,
}

impl<'a> Outbound<'a> {
    #[inline]
    fn new(session: &'a mut dyn Session, max_payload: usize) -> Self {
        Self {
            session,
            max_payload,
            close_requested: false,
        }
    }

    /// Sends a text message, fragmented if it exceeds the frame limit.
    #[inline]
    pub fn send_text(&mut self, text: &str) {
        self.send(Opcode::Text, text.as_bytes());
    }

    /// Sends a binary message, fragmented if it exceeds the frame limit.
    #[inline]
    pub fn send_binary(&mut self, data: &[u8]) {
        self.send(Opcode::Binary, data);
    }

    /// Sends a ping. Only the first 125 bytes of `payload` are used.
    pub fn ping(&mut self, payload: &[u8]) {
        let payload = &payload[..payload.len().min(125)];
        let mut out = Vec::with_capacity(2 + payload.len());
        encode_frame(&mut out, true, Opcode::Ping, payload, None);
        self.session.send(out);
    }

    /// Closes the connection once the current callback returns.
    #[inline]
    pub fn close(&mut self) {
        self.close_requested = true;
        self.session.request_close();
    }

    fn send(&mut self, opcode: Opcode, payload: &[u8]) {
        let mut out = Vec::with_capacity(payload.len() + 14);
        encode_message(&mut out, opcode, payload, self.max_payload);
        self.session.send(out);
    }
}

/// The WebSocket personality of a connection.
///
/// Created by the upgrade handshake. Parses frames, reassembles fragmented
/// messages, answers pings and hands complete messages to its handler.
pub struct WebSocket {
    handler: Box<dyn WebSocketHandler>,
    parser: FrameParser,
    message: Option<(Opcode, Vec<u8>)>,
    limits: WsLimits,
    closed: bool,
}

impl WebSocket {
    pub(crate) fn new(handler: Box<dyn WebSocketHandler>, limits: &WsLimits) -> Self {
        Self {
            handler,
            parser: FrameParser::new(limits.max_payload),
            message: None,
            limits: limits.clone(),
            closed: false,
        }
    }

    /// Runs the handler's `connected` callback. `false` if it asked to close.
    pub(crate) fn connected(&mut self, session: &mut dyn Session) -> bool {
        let mut socket = Outbound::new(session, self.limits.max_payload);
        self.handler.connected(&mut socket);
        !socket.close_requested
    }

    pub(crate) fn consume(&mut self, session: &mut dyn Session, mut input: &[u8]) -> Consumed {
        while !input.is_empty() {
            let result = self.parser.parse(input).and_then(|(used, frame)| {
                input = &input[used..];
                match frame {
                    Some(frame) => self.dispatch(session, frame),
                    None => Ok(true),
                }
            });

            match result {
                Ok(true) => {}
                Ok(false) => return Consumed::Closed,
                Err(err) => {
                    warn!(error = %err, "websocket protocol violation");
                    session.request_close();
                    return Consumed::Closed;
                }
            }
        }

        Consumed::All
    }

    /// Notifies the handler and sends an empty close frame, once.
    pub(crate) fn closing(&mut self, session: &mut dyn Session) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.handler.closed();

        let mut out = Vec::with_capacity(2);
        encode_frame(&mut out, true, Opcode::Close, &[], None);
        session.send(out);
    }

    // `Ok(false)` once the connection should close.
    fn dispatch(&mut self, session: &mut dyn Session, frame: Frame) -> Result<bool, WsError> {
        match frame.opcode {
            Opcode::Continuation => {
                let Some((_, buffer)) = self.message.as_mut() else {
                    return Err(WsError::UnexpectedContinuation);
                };
                if buffer.len() + frame.payload.len() > self.limits.max_message {
                    return Err(WsError::MessageTooLarge);
                }
                buffer.extend_from_slice(&frame.payload);

                match (frame.fin, self.message.take()) {
                    (true, Some((opcode, buffer))) => self.deliver(session, opcode, buffer),
                    (_, message) => {
                        self.message = message;
                        Ok(true)
                    }
                }
            }
            Opcode::Text | Opcode::Binary => {
                if self.message.is_some() {
                    return Err(WsError::ExpectedContinuation);
                }

                match frame.fin {
                    true => self.deliver(session, frame.opcode, frame.payload),
                    false => {
                        self.message = Some((frame.opcode, frame.payload));
                        Ok(true)
                    }
                }
            }
            Opcode::Ping => {
                let mut out = Vec::with_capacity(frame.payload.len() + 10);
                encode_frame(&mut out, true, Opcode::Pong, &frame.payload, None);
                session.send(out);
                Ok(true)
            }
            Opcode::Pong => Ok(true),
            Opcode::Close => {
                debug!("websocket close frame received");
                session.request_close();
                Ok(false)
            }
        }
    }

    fn deliver(
        &mut self,
        session: &mut dyn Session,
        opcode: Opcode,
        data: Vec<u8>,
    ) -> Result<bool, WsError> {
        let mut socket = Outbound::new(session, self.limits.max_payload);

        match opcode {
            Opcode::Text => {
                simdutf8::basic::from_utf8(&data).map_err(|_| WsError::InvalidUtf8)?;
                // SAFETY: validated just above.
                let text = unsafe { String::from_utf8_unchecked(data) };
                self.handler.text(&mut socket, text);
            }
            _ => self.handler.binary(&mut socket, data),
        }

        Ok(!socket.close_requested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Connected,
        Text(String),
        Binary(Vec<u8>),
        Closed,
    }

    #[derive(Default, Clone)]
    struct Recorder {
        events: Arc<Mutex<Vec<Event>>>,
        echo: bool,
        close_on: Option<&'static str>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl WebSocketHandler for Recorder {
        fn connected(&mut self, _: &mut Outbound<'_>) {
            self.events.lock().unwrap().push(Event::Connected);
        }

        fn text(&mut self, socket: &mut Outbound<'_>, text: String) {
            if self.echo {
                socket.send_text(&text);
            }
            if self.close_on == Some(text.as_str()) {
                socket.close();
            }
            self.events.lock().unwrap().push(Event::Text(text));
        }

        fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>) {
            if self.echo {
                socket.send_binary(&data);
            }
            self.events.lock().unwrap().push(Event::Binary(data));
        }

        fn closed(&mut self) {
            self.events.lock().unwrap().push(Event::Closed);
        }
    }

    fn socket(recorder: &Recorder, limits: &WsLimits) -> WebSocket {
        WebSocket::new(Box::new(recorder.clone()), limits)
    }

    #[test]
    fn ping_gets_pong() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        let consumed = ws.consume(&mut session, &client_frame(true, Opcode::Ping, b"abc"));

        assert!(matches!(consumed, Consumed::All));
        assert_eq!(session.sent, [0x8A, 0x03, b'a', b'b', b'c']);
        assert!(recorder.events().is_empty());
        assert!(!session.close_requested);
    }

    #[test]
    fn pong_is_ignored() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        ws.consume(&mut session, &client_frame(true, Opcode::Pong, b"late"));
        assert!(session.sent.is_empty());
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn three_fragments() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        let frames = [
            client_frame(false, Opcode::Text, b"Hel"),
            client_frame(false, Opcode::Continuation, b"lo, "),
            client_frame(true, Opcode::Continuation, b"World"),
        ];

        for (i, frame) in frames.iter().enumerate() {
            assert!(matches!(ws.consume(&mut session, frame), Consumed::All));

            match i {
                2 => assert_eq!(recorder.events(), [Event::Text("Hello, World".into())]),
                _ => assert!(recorder.events().is_empty()),
            }
        }
        assert!(ws.message.is_none());
    }

    #[test]
    fn control_frames_between_fragments() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        let mut input = client_frame(false, Opcode::Binary, &[1, 2]);
        input.extend(client_frame(true, Opcode::Ping, b""));
        input.extend(client_frame(true, Opcode::Continuation, &[3]));

        assert!(matches!(ws.consume(&mut session, &input), Consumed::All));
        assert_eq!(recorder.events(), [Event::Binary(vec![1, 2, 3])]);
        assert_eq!(session.sent, [0x8A, 0x00]);
    }

    #[test]
    fn round_trip() {
        for max_payload in [64, 128 * 1024] {
            let limits = WsLimits {
                max_payload,
                ..WsLimits::default()
            };

            for len in [0, 10, 200, 70000, 300_000] {
                let text: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
                let data: Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();

                let mut wire = Vec::new();
                encode_message(&mut wire, Opcode::Text, text.as_bytes(), max_payload);
                encode_message(&mut wire, Opcode::Binary, &data, max_payload);

                let recorder = Recorder::default();
                let mut ws = socket(&recorder, &limits);
                let mut session = RecordingSession::default();

                for piece in wire.chunks(8192) {
                    assert!(matches!(ws.consume(&mut session, piece), Consumed::All));
                }
                assert_eq!(recorder.events(), [Event::Text(text), Event::Binary(data)]);
            }
        }
    }

    #[test]
    fn echo_through_outbound() {
        let recorder = Recorder {
            echo: true,
            ..Recorder::default()
        };
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        ws.consume(&mut session, &client_frame(true, Opcode::Text, b"hi"));
        assert_eq!(session.sent, [0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn close_frame_stops_processing() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        let mut input = client_frame(true, Opcode::Close, &[0x03, 0xE8]);
        input.extend(client_frame(true, Opcode::Text, b"ignored"));

        assert!(matches!(ws.consume(&mut session, &input), Consumed::Closed));
        assert!(session.close_requested);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn handler_close() {
        let recorder = Recorder {
            close_on: Some("bye"),
            ..Recorder::default()
        };
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        let mut input = client_frame(true, Opcode::Text, b"bye");
        input.extend(client_frame(true, Opcode::Text, b"after"));

        assert!(matches!(ws.consume(&mut session, &input), Consumed::Closed));
        assert!(session.close_requested);
        assert_eq!(recorder.events(), [Event::Text("bye".into())]);
    }

    #[test]
    fn closing_once() {
        let recorder = Recorder::default();
        let mut ws = socket(&recorder, &WsLimits::default());
        let mut session = RecordingSession::default();

        assert!(ws.connected(&mut session));
        ws.closing(&mut session);
        ws.closing(&mut session);

        assert_eq!(session.sent, [0x88, 0x00]);
        assert_eq!(session.sends, 1);
        assert_eq!(recorder.events(), [Event::Connected, Event::Closed]);
    }

    #[test]
    fn protocol_errors_close() {
        let limits = WsLimits {
            max_payload: 16,
            max_message: 20,
            ..WsLimits::default()
        };

        #[rustfmt::skip]
        let cases: [Vec<Vec<u8>>; 6] = [
            vec![client_frame(true, Opcode::Continuation, b"orphan")],
            vec![client_frame(false, Opcode::Text, b"a"), client_frame(true, Opcode::Text, b"b")],
            vec![client_frame(true, Opcode::Text, &[0xC3, 0x28])],
            vec![client_frame(true, Opcode::Binary, &[0; 17])],
            vec![
                client_frame(false, Opcode::Binary, &[0; 16]),
                client_frame(true, Opcode::Continuation, &[0; 5]),
            ],
            vec![vec![0x83, 0x00]],
        ];

        for frames in cases {
            let recorder = Recorder::default();
            let mut ws = socket(&recorder, &limits);
            let mut session = RecordingSession::default();

            let input: Vec<u8> = frames.concat();
            assert!(matches!(ws.consume(&mut session, &input), Consumed::Closed));
            assert!(session.close_requested);
            assert!(session.sent.is_empty());
            assert!(recorder.events().is_empty());
        }
    }
}
