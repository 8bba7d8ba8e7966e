//! XMPP `<message/>` stanzas as used by the rendezvous protocol.
//!
//! Only the subset the harness exchanges is modelled: addressing, type,
//! an optional `<body/>` and an optional rendezvous marker element. Unknown
//! child elements are skipped.

use std::fmt;

use ibbcheck_config::{Jid, JidError};
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use uuid::Uuid;

use crate::rendezvous::{RendezvousSignal, SIGNAL_NS};

/// The `jabber:client` content namespace.
pub const CLIENT_NS: &str = "jabber:client";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageType {
    #[default]
    Normal,
    Chat,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Normal => "normal",
            MessageType::Chat => "chat",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub from: Option<Jid>,
    pub to: Jid,
    pub kind: MessageType,
    pub body: Option<String>,
    pub signal: Option<RendezvousSignal>,
}

/// Errors from parsing a message stanza.
#[derive(Debug, thiserror::Error)]
pub enum StanzaError {
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    #[error("expected <message/>, found <{0}/>")]
    UnexpectedElement(String),

    #[error("missing required attribute {0:?}")]
    MissingAttribute(&'static str),

    #[error("invalid JID in {attr:?}: {source}")]
    Jid {
        attr: &'static str,
        #[source]
        source: JidError,
    },

    #[error("unsupported message type {0:?}")]
    UnsupportedType(String),

    #[error("document ended before </message>")]
    Truncated,
}

impl Message {
    /// A `normal` message to `to` with a fresh random id.
    pub fn new(to: Jid) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            from: None,
            to,
            kind: MessageType::Normal,
            body: None,
            signal: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_signal(mut self, signal: RendezvousSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_from(mut self, from: Jid) -> Self {
        self.from = Some(from);
        self
    }

    /// Render the stanza as it goes on the wire.
    pub fn to_xml(&self) -> String {
        let mut xml = format!(
            "<message xmlns='{CLIENT_NS}' id='{}' to='{}'",
            escape(self.id.as_str()),
            escape(self.to.to_string().as_str()),
        );
        if let Some(from) = &self.from {
            xml.push_str(&format!(" from='{}'", escape(from.to_string().as_str())));
        }
        xml.push_str(&format!(" type='{}'>", self.kind));
        if let Some(body) = &self.body {
            xml.push_str(&format!("<body>{}</body>", escape(body.as_str())));
        }
        if let Some(signal) = self.signal {
            xml.push_str(&format!("<{} xmlns='{SIGNAL_NS}'/>", signal.element_name()));
        }
        xml.push_str("</message>");
        xml
    }

    /// Parse a single `<message/>` element.
    pub fn from_xml(xml: &str) -> Result<Self, StanzaError> {
        let mut reader = Reader::from_str(xml);

        let mut message: Option<Message> = None;
        let mut depth = 0usize;
        let mut in_body = false;

        loop {
            let event = reader.read_event()?;
            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    if depth == 0 {
                        if e.local_name().as_ref() != b"message" {
                            return Err(StanzaError::UnexpectedElement(
                                String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                            ));
                        }
                        message = Some(parse_header(e)?);
                    } else if depth == 1
                        && let Some(msg) = message.as_mut()
                    {
                        match e.local_name().as_ref() {
                            b"body" => {
                                msg.body.get_or_insert_with(String::new);
                                in_body = !empty;
                            }
                            name => {
                                if let Some(signal) = RendezvousSignal::from_element_name(name)
                                    && in_signal_ns(e)?
                                {
                                    msg.signal = Some(signal);
                                }
                            }
                        }
                    }
                    if !empty {
                        depth += 1;
                    } else if depth == 0 {
                        break;
                    }
                }
                Event::Text(text) if in_body => {
                    if let Some(body) = message.as_mut().and_then(|m| m.body.as_mut()) {
                        body.push_str(&text.unescape()?);
                    }
                }
                Event::End(_) => {
                    in_body = false;
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        break;
                    }
                }
                Event::Eof => return Err(StanzaError::Truncated),
                _ => {}
            }
        }

        message.ok_or(StanzaError::Truncated)
    }
}

fn parse_header(e: &BytesStart<'_>) -> Result<Message, StanzaError> {
    let mut id = None;
    let mut to = None;
    let mut from = None;
    let mut kind = MessageType::Normal;

    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?;
        match attr.key.as_ref() {
            b"id" => id = Some(value.into_owned()),
            b"to" => to = Some(parse_jid("to", &value)?),
            b"from" => from = Some(parse_jid("from", &value)?),
            b"type" => {
                kind = match value.as_ref() {
                    "normal" => MessageType::Normal,
                    "chat" => MessageType::Chat,
                    other => return Err(StanzaError::UnsupportedType(other.to_string())),
                }
            }
            _ => {}
        }
    }

    Ok(Message {
        id: id.unwrap_or_default(),
        from,
        to: to.ok_or(StanzaError::MissingAttribute("to"))?,
        kind,
        body: None,
        signal: None,
    })
}

fn parse_jid(attr: &'static str, value: &str) -> Result<Jid, StanzaError> {
    Jid::parse(value).map_err(|source| StanzaError::Jid { attr, source })
}

/// A marker without its own `xmlns` inherits `jabber:client` from the stanza.
fn in_signal_ns(e: &BytesStart<'_>) -> Result<bool, StanzaError> {
    match e.try_get_attribute("xmlns")? {
        Some(attr) => Ok(attr.unescape_value()? == SIGNAL_NS),
        None => Ok(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn jid(s: &str) -> Jid {
        Jid::parse(s).unwrap()
    }

    #[test]
    fn test_done_signal_wire_form() {
        let mut msg = Message::new(jid("recv@localhost/a"))
            .with_from(jid("send@localhost/b"))
            .with_body("hello")
            .with_signal(RendezvousSignal::Done);
        msg.id = "m1".into();

        assert_eq!(
            msg.to_xml(),
            "<message xmlns='jabber:client' id='m1' to='recv@localhost/a' \
             from='send@localhost/b' type='normal'><body>hello</body>\
             <doneibb xmlns='jabber:client'/></message>"
        );
    }

    #[test]
    fn test_parse_start_signal() {
        let xml = "<message xmlns='jabber:client' id='x' to='a@b/c' from='d@e/f' type='normal'>\
                   <startibb xmlns='jabber:client'/></message>";
        let msg = Message::from_xml(xml).unwrap();
        assert_eq!(msg.signal, Some(RendezvousSignal::Start));
        assert_eq!(msg.from, Some(jid("d@e/f")));
        assert_eq!(msg.body, None);
    }

    #[test]
    fn test_body_is_unescaped() {
        let msg = Message::new(jid("a@b"))
            .with_body("<bear> & 'loons' \u{2014} \"trains\"")
            .with_signal(RendezvousSignal::Done);
        let parsed = Message::from_xml(&msg.to_xml()).unwrap();
        assert_eq!(parsed.body.as_deref(), Some("<bear> & 'loons' \u{2014} \"trains\""));
        assert_eq!(parsed.signal, Some(RendezvousSignal::Done));
        assert_eq!(parsed.id, msg.id);
    }

    #[test]
    fn test_empty_body_element() {
        let xml = "<message to='a@b'><body/><doneibb/></message>";
        let msg = Message::from_xml(xml).unwrap();
        assert_eq!(msg.body.as_deref(), Some(""));
        assert_eq!(msg.signal, Some(RendezvousSignal::Done));
        assert_eq!(msg.kind, MessageType::Normal);
    }

    #[test]
    fn test_marker_in_foreign_namespace_ignored() {
        let xml = "<message to='a@b' type='chat'><doneibb xmlns='urn:example'/></message>";
        let msg = Message::from_xml(xml).unwrap();
        assert_eq!(msg.signal, None);
        assert_eq!(msg.kind, MessageType::Chat);
    }

    #[test]
    fn test_nested_unknown_children_skipped() {
        let xml = "<message to='a@b'><x xmlns='urn:other'><body>not me</body></x>\
                   <body>me</body></message>";
        let msg = Message::from_xml(xml).unwrap();
        assert_eq!(msg.body.as_deref(), Some("me"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Message::from_xml("<iq to='a@b'/>"),
            Err(StanzaError::UnexpectedElement(name)) if name == "iq"
        ));
        assert!(matches!(
            Message::from_xml("<message id='1'/>"),
            Err(StanzaError::MissingAttribute("to"))
        ));
        assert!(matches!(
            Message::from_xml("<message to='@b'/>"),
            Err(StanzaError::Jid { attr: "to", .. })
        ));
        assert!(matches!(
            Message::from_xml("<message to='a@b' type='groupchat'/>"),
            Err(StanzaError::UnsupportedType(_))
        ));
        assert!(matches!(
            Message::from_xml("<message to='a@b'><body>"),
            Err(StanzaError::Truncated) | Err(StanzaError::Xml(_))
        ));
    }
}
