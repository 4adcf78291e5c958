//! Server-sent-event framing for the proxy stream.
//!
//! Every `data:` payload is one JSON object: either a canonical
//! [`ProviderEvent`] or a `{"type":"usage","usage":{..}}` frame carrying
//! provisional usage.

use std::str::Utf8Error;

use crate::ProviderId;
use crate::errors::ProviderError;
use crate::provider::{ProviderEvent, ProviderUpdate};
use crate::usage::Usage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parses one frame; `None` for frames with neither event nor data, such
    /// as keep-alive comments.
    fn parse(bytes: &[u8]) -> Result<Option<Self>, Utf8Error> {
        let text = std::str::from_utf8(bytes)?;
        let mut event = None;
        let mut data: Option<String> = None;
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                _ => {}
            }
        }
        if event.is_none() && data.is_none() {
            return Ok(None);
        }
        Ok(Some(Self {
            event,
            data: data.unwrap_or_default(),
        }))
    }
}

/// Incremental SSE decoder; bytes may be split anywhere.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    /// Appends a chunk and returns every frame it completed. A frame that is
    /// not valid UTF-8 is returned as an error in its place.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<Result<SseFrame, Utf8Error>> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some((end, delimiter)) = frame_end(&self.buf[consumed..]) {
            if let Some(frame) = SseFrame::parse(&self.buf[consumed..consumed + end]).transpose() {
                frames.push(frame);
            }
            consumed += end + delimiter;
        }
        self.buf.drain(..consumed);
        frames
    }

    /// Flushes a final frame the server did not terminate with a blank line.
    pub fn finish(&mut self) -> Option<Result<SseFrame, Utf8Error>> {
        let rest = std::mem::take(&mut self.buf);
        SseFrame::parse(&rest).transpose()
    }
}

/// Finds the blank line ending the first frame: `(frame_len, delimiter_len)`.
fn frame_end(buf: &[u8]) -> Option<(usize, usize)> {
    buf.iter().enumerate().find_map(|(i, byte)| {
        if *byte != b'\n' {
            return None;
        }
        let rest = &buf[i + 1..];
        if rest.starts_with(b"\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n") {
            Some((i, 3))
        } else {
            None
        }
    })
}

#[derive(serde::Deserialize)]
struct UsageFrame {
    #[serde(default)]
    usage: Usage,
}

/// Decodes one frame as returned by [`SseDecoder`]. `[DONE]` markers and
/// empty payloads yield `None`; undecodable frames are transport errors.
pub(crate) fn decode_frame(
    provider: &ProviderId,
    frame: Result<&SseFrame, &Utf8Error>,
) -> Result<Option<ProviderUpdate>, ProviderError> {
    let frame = frame.map_err(|e| {
        ProviderError::transport(provider.clone(), format!("proxy frame is not valid UTF-8: {e}"))
    })?;
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }
    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        ProviderError::transport(provider.clone(), format!("invalid proxy event frame: {e}"))
    })?;
    if value.get("type").and_then(|t| t.as_str()) == Some("usage") {
        let frame: UsageFrame = serde_json::from_value(value).map_err(|e| {
            ProviderError::transport(provider.clone(), format!("invalid proxy usage frame: {e}"))
        })?;
        return Ok(Some(ProviderUpdate::Usage(frame.usage)));
    }
    let event: ProviderEvent = serde_json::from_value(value).map_err(|e| {
        ProviderError::transport(provider.clone(), format!("invalid proxy event: {e}"))
    })?;
    Ok(Some(ProviderUpdate::Event(event)))
}
