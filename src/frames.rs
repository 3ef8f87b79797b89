//! Line encoding of the client-facing event stream.
//!
//! The data protocol prefixes every line with a tag: `0` for a text delta and
//! `e` for a finish event. The plain text protocol carries the deltas only.

use serde::Serialize;

use crate::llm::UsageSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Error { message: String },
    Finish { usage: UsageSummary },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamProtocol {
    #[default]
    Data,
    Text,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

#[derive(Serialize)]
#[serde(tag = "finishReason", rename_all = "lowercase")]
enum FinishEvent<'a> {
    Error {
        message: &'a str,
    },
    #[serde(rename_all = "camelCase")]
    Stop {
        usage: WireUsage,
        is_continued: bool,
    },
}

impl Frame {
    /// Encoded line including the trailing newline, or `None` when the
    /// protocol has no representation for this frame.
    pub fn encode(&self, protocol: StreamProtocol) -> Option<String> {
        match (protocol, self) {
            (StreamProtocol::Text, Frame::Text(delta)) => Some(delta.clone()),
            (StreamProtocol::Text, _) => None,
            (StreamProtocol::Data, Frame::Text(delta)) => Some(tagged('0', delta)),
            (StreamProtocol::Data, Frame::Error { message }) => {
                Some(tagged('e', &FinishEvent::Error { message }))
            }
            (StreamProtocol::Data, Frame::Finish { usage }) => Some(tagged(
                'e',
                &FinishEvent::Stop {
                    usage: WireUsage {
                        prompt_tokens: usage.prompt_tokens,
                        completion_tokens: usage.completion_tokens,
                    },
                    is_continued: false,
                },
            )),
        }
    }
}

fn tagged<T: Serialize + ?Sized>(tag: char, payload: &T) -> String {
    // Strings, and structs of strings and integers, always serialize.
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "null".to_string());
    format!("{tag}:{json}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_is_json_string() {
        let line = Frame::Text("Hel\"lo\n".into()).encode(StreamProtocol::Data);
        assert_eq!(line.as_deref(), Some("0:\"Hel\\\"lo\\n\"\n"));
    }

    #[test]
    fn error_frame() {
        let line = Frame::Error {
            message: "upstream exploded".into(),
        }
        .encode(StreamProtocol::Data);
        assert_eq!(
            line.as_deref(),
            Some("e:{\"finishReason\":\"error\",\"message\":\"upstream exploded\"}\n")
        );
    }

    #[test]
    fn finish_frame_with_and_without_usage() {
        let with = Frame::Finish {
            usage: UsageSummary {
                prompt_tokens: Some(12),
                completion_tokens: Some(3),
            },
        };
        assert_eq!(
            with.encode(StreamProtocol::Data).as_deref(),
            Some(
                "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":12,\"completionTokens\":3},\"isContinued\":false}\n"
            )
        );

        let without = Frame::Finish {
            usage: UsageSummary::default(),
        };
        assert_eq!(
            without.encode(StreamProtocol::Data).as_deref(),
            Some(
                "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":null,\"completionTokens\":null},\"isContinued\":false}\n"
            )
        );
    }

    #[test]
    fn text_protocol_drops_finish_events() {
        assert_eq!(
            Frame::Text("Hi".into()).encode(StreamProtocol::Text).as_deref(),
            Some("Hi")
        );
        assert_eq!(
            Frame::Error {
                message: "x".into()
            }
            .encode(StreamProtocol::Text),
            None
        );
    }

    #[test]
    fn protocol_parses_from_query_value() {
        let p: StreamProtocol = serde_json::from_str("\"text\"").unwrap();
        assert_eq!(p, StreamProtocol::Text);
        assert_eq!(StreamProtocol::default(), StreamProtocol::Data);
    }
}
