//! Wire codec for the management protocol
//!
//! The protocol exchanges *sentences*: sequences of length-prefixed words
//! terminated by an empty word. Word lengths use a variable-width prefix
//! (1-5 bytes, high bits of the first byte select the width). Replies
//! start with a control word (`!re` data row, `!done` end of reply,
//! `!trap` command error, `!fatal` connection error) followed by
//! `=key=value` attribute words.

use std::collections::HashMap;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single word; anything larger is a corrupt stream.
const MAX_WORD_LEN: u32 = 4 * 1024 * 1024;

/// Encode a word length into its variable-width prefix.
pub fn encode_length(len: u32) -> Vec<u8> {
    match len {
        0..=0x7F => vec![len as u8],
        0x80..=0x3FFF => {
            let v = len | 0x8000;
            vec![(v >> 8) as u8, v as u8]
        }
        0x4000..=0x1F_FFFF => {
            let v = len | 0xC0_0000;
            vec![(v >> 16) as u8, (v >> 8) as u8, v as u8]
        }
        0x20_0000..=0xFFF_FFFF => {
            let v = len | 0xE000_0000;
            vec![(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8, v as u8]
        }
        _ => {
            let mut out = vec![0xF0];
            out.extend_from_slice(&len.to_be_bytes());
            out
        }
    }
}

/// Read a variable-width word length prefix.
pub async fn read_length<R>(reader: &mut R) -> io::Result<u32>
where
    R: AsyncRead + Unpin,
{
    let first = reader.read_u8().await?;

    let len = if first & 0x80 == 0 {
        first as u32
    } else if first & 0xC0 == 0x80 {
        let b = reader.read_u8().await?;
        (((first & !0xC0) as u32) << 8) | b as u32
    } else if first & 0xE0 == 0xC0 {
        let mut rest = [0u8; 2];
        reader.read_exact(&mut rest).await?;
        (((first & !0xE0) as u32) << 16) | ((rest[0] as u32) << 8) | rest[1] as u32
    } else if first & 0xF0 == 0xE0 {
        let mut rest = [0u8; 3];
        reader.read_exact(&mut rest).await?;
        (((first & !0xF0) as u32) << 24)
            | ((rest[0] as u32) << 16)
            | ((rest[1] as u32) << 8)
            | rest[2] as u32
    } else if first == 0xF0 {
        let mut rest = [0u8; 4];
        reader.read_exact(&mut rest).await?;
        u32::from_be_bytes(rest)
    } else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid length prefix byte: {first:#04x}"),
        ));
    };

    if len > MAX_WORD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("word length {len} exceeds protocol maximum"),
        ));
    }

    Ok(len)
}

/// Write one sentence: each word length-prefixed, then the empty terminator.
pub async fn write_sentence<W>(writer: &mut W, words: &[&str]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for word in words {
        writer.write_all(&encode_length(word.len() as u32)).await?;
        writer.write_all(word.as_bytes()).await?;
    }
    writer.write_all(&[0]).await?;
    writer.flush().await?;

    Ok(())
}

/// Read words until the empty terminator word.
pub async fn read_sentence<R>(reader: &mut R) -> io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut words = Vec::new();

    loop {
        let len = read_length(reader).await?;
        if len == 0 {
            return Ok(words);
        }

        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf).await?;

        let word = String::from_utf8(buf)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "word is not valid UTF-8"))?;
        words.push(word);
    }
}

/// Control word opening a reply sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyWord {
    /// One data row
    Re,
    /// End of reply
    Done,
    /// Command-level error (the session stays usable)
    Trap,
    /// Connection-level error (the session is dead)
    Fatal,
}

/// One parsed reply sentence: control word plus `=key=value` attributes.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub reply: ReplyWord,
    pub attributes: HashMap<String, String>,
}

impl Sentence {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Parse the words of one reply sentence.
pub fn parse_reply(words: Vec<String>) -> io::Result<Sentence> {
    let mut iter = words.into_iter();

    let reply = match iter.next().as_deref() {
        Some("!re") => ReplyWord::Re,
        Some("!done") => ReplyWord::Done,
        Some("!trap") => ReplyWord::Trap,
        Some("!fatal") => ReplyWord::Fatal,
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected reply word: {other:?}"),
            ));
        }
    };

    let mut attributes = HashMap::new();
    for word in iter {
        // Attribute words look like "=key=value"; anything else (API
        // attributes like ".tag=") is irrelevant to us and skipped.
        if let Some(rest) = word.strip_prefix('=')
            && let Some((key, value)) = rest.split_once('=')
        {
            attributes.insert(key.to_string(), value.to_string());
        }
    }

    Ok(Sentence { reply, attributes })
}
