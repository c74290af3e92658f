use thiserror::Error;

/// Longest accepted dotted-decimal address, in bytes.
pub const MAX_IP_LEN: usize = 31;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("message has fewer than two fields")]
    MissingFields,
    #[error("invalid sender address `{0}`")]
    BadSender(String),
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
    #[error("HELLO carries no parseable sequence number")]
    BadSequence,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello {
        sender: String,
        seq: u16,
    },
    DistanceVector {
        sender: String,
        entries: Vec<(String, u32)>,
    },
}

/// Decode one datagram. Malformed tuples inside a DV are skipped rather
/// than failing the whole message.
pub fn parse(input: &str) -> Result<Message, ParseError> {
    let mut fields = input.split(':');
    let sender = fields.next().unwrap_or("");
    let kind = fields.next().ok_or(ParseError::MissingFields)?;

    if sender.is_empty() || sender.len() > MAX_IP_LEN {
        return Err(ParseError::BadSender(sender.to_string()));
    }

    match kind {
        "HELLO" => {
            let seq = fields
                .next()
                .and_then(|tok| tok.parse::<u16>().ok())
                .ok_or(ParseError::BadSequence)?;
            Ok(Message::Hello {
                sender: sender.to_string(),
                seq,
            })
        }
        "DV" => {
            let entries = fields.filter_map(parse_tuple).collect();
            Ok(Message::DistanceVector {
                sender: sender.to_string(),
                entries,
            })
        }
        other => Err(ParseError::UnknownKind(other.to_string())),
    }
}

// A tuple token looks like "(dest,dist)". Anything after the closing
// parenthesis is ignored; a missing one is tolerated.
fn parse_tuple(token: &str) -> Option<(String, u32)> {
    let inside = token.strip_prefix('(')?;
    let inside = match inside.find(')') {
        Some(end) => &inside[..end],
        None => inside,
    };

    let (dest, dist) = inside.split_once(',')?;
    if dest.is_empty() || dest.len() > MAX_IP_LEN {
        return None;
    }
    let dist = dist.parse::<u32>().ok()?;
    Some((dest.to_string(), dist))
}

pub fn encode_hello(sender: &str, seq: u16) -> String {
    format!("{}:HELLO:{}", sender, seq)
}

/// Encode a distance vector. Callers pass one entry per destination; the
/// output carries a trailing `:` after the last tuple.
pub fn encode_distance_vector(sender: &str, entries: &[(String, u32)]) -> String {
    let mut out = format!("{}:DV:", sender);
    for (dest, dist) in entries {
        out.push_str(&format!("({},{}):", dest, dist));
    }
    out
}
