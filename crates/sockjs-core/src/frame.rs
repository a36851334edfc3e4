use std::fmt;

/// Close codes defined by the SockJS protocol.
pub mod close_code {
    /// Another connection is still attached to the session.
    pub const ANOTHER_CONNECTION: u16 = 2010;
    /// The session was interrupted by a concurrent connection attempt.
    pub const INTERRUPTED: u16 = 1002;
    /// Normal server-initiated close.
    pub const GO_AWAY: u16 = 3000;
}

/// One SockJS wire frame.
///
/// Frames are immutable once constructed; rendering to a transport's byte
/// form never touches session state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Open,
    Heartbeat,
    /// Ordered batch of application messages. Never empty.
    Message(Vec<String>),
    Close(u16, String),
}

impl Frame {
    pub fn close(code: u16, reason: &str) -> Self {
        Self::Close(code, reason.to_string())
    }

    /// `c[2010,"Another connection still open"]`
    pub fn close_another_connection() -> Self {
        Self::close(close_code::ANOTHER_CONNECTION, "Another connection still open")
    }

    /// `c[1002,"Connection interrupted"]`
    pub fn close_interrupted() -> Self {
        Self::close(close_code::INTERRUPTED, "Connection interrupted")
    }

    /// `c[3000,"Go away!"]`
    pub fn close_go_away() -> Self {
        Self::close(close_code::GO_AWAY, "Go away!")
    }

    /// The frame's textual wire form: `o`, `h`, `a[...]` or `c[...]`.
    pub fn wire(&self) -> String {
        match self {
            Self::Open => "o".to_string(),
            Self::Heartbeat => "h".to_string(),
            Self::Message(msgs) => {
                debug_assert!(!msgs.is_empty(), "message frame with no messages");
                let mut out = String::from("a[");
                for (i, msg) in msgs.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&quote(msg));
                }
                out.push(']');
                out
            }
            Self::Close(code, reason) => format!("c[{},{}]", code, quote(reason)),
        }
    }

    /// Wire form terminated with `\n`, as written by polling and
    /// streaming transports.
    pub fn wire_line(&self) -> String {
        let mut s = self.wire();
        s.push('\n');
        s
    }

    /// JSONP rendering: `<callback>("<escaped frame>");\r\n`.
    pub fn wire_jsonp(&self, callback: &str) -> String {
        format!("{}({});\r\n", callback, quote(&self.wire()))
    }

    /// EventSource rendering: `data: <frame>\r\n\r\n`.
    pub fn wire_eventsource(&self) -> String {
        format!("data: {}\r\n\r\n", self.wire())
    }

    /// HTMLFile rendering: a script block invoking the page's `p()` hook.
    pub fn wire_htmlfile(&self) -> String {
        format!("<script>\np({});\n</script>\r\n", quote(&self.wire()))
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.wire())
    }
}

/// Code points that must be escaped as `\uxxxx` even though plain JSON
/// would pass them through. Browsers and intermediaries mangle these, so
/// the protocol test suite requires the escaped form.
fn needs_unicode_escape(c: u32) -> bool {
    matches!(
        c,
        0x200C..=0x200F | 0x2028..=0x202F | 0x2060..=0x206F | 0xD800..=0xDFFF | 0xFFF0..=0xFFFF
    )
}

/// Encode a string as a JSON string literal (quotes included) using the
/// SockJS escaping rules.
///
/// Astral-plane characters are written as escaped surrogate pairs, which
/// covers the protocol's U+D800–U+DFFF requirement (lone surrogates cannot
/// occur in a Rust `String`).
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\x08' => out.push_str("\\b"),
            '\x09' => out.push_str("\\t"),
            '\x0a' => out.push_str("\\n"),
            '\x0c' => out.push_str("\\f"),
            '\x0d' => out.push_str("\\r"),
            _ => {
                let cp = c as u32;
                if cp < 0x20 {
                    out.push_str(&format!("\\u{cp:04x}"));
                } else if cp >= 0x10000 {
                    // Escaped surrogate pair.
                    let v = cp - 0x10000;
                    let high = 0xD800 + (v >> 10);
                    let low = 0xDC00 + (v & 0x3FF);
                    out.push_str(&format!("\\u{high:04x}\\u{low:04x}"));
                } else if needs_unicode_escape(cp) {
                    out.push_str(&format!("\\u{cp:04x}"));
                } else {
                    out.push(c);
                }
            }
        }
    }
    out.push('"');
    out
}
