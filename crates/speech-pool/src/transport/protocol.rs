//! JSON-lines messages exchanged with a speech host

use base64::{engine::general_purpose, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::TransportError;

/// The literal a healthy host returns from `hello`
pub const HANDSHAKE_REPLY: &str = "World";

/// Request sent to a speech host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum HostRequest {
    /// Handshake
    Hello,
    /// Synthesize marked-up text
    SpeakSsml { markup: String },
}

/// Response returned by a speech host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HostResponse {
    /// Plain string result (the handshake reply)
    Ok { value: String },
    /// Base64-encoded audio stream
    Audio { data: String },
    /// Host-side failure
    Error { message: String },
}

impl HostResponse {
    /// Wrap raw audio bytes
    pub fn audio(bytes: &[u8]) -> Self {
        Self::Audio {
            data: general_purpose::STANDARD.encode(bytes),
        }
    }

    /// Expect a plain string result
    pub fn into_value(self) -> Result<String, TransportError> {
        match self {
            Self::Ok { value } => Ok(value),
            Self::Error { message } => Err(TransportError::Remote(message)),
            Self::Audio { .. } => Err(TransportError::Protocol(
                "expected a value, got audio".to_string(),
            )),
        }
    }

    /// Expect audio and decode it
    pub fn into_audio(self) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Audio { data } => general_purpose::STANDARD
                .decode(data)
                .map_err(|e| TransportError::Protocol(format!("invalid audio payload: {}", e))),
            Self::Error { message } => Err(TransportError::Remote(message)),
            Self::Ok { .. } => Err(TransportError::Protocol(
                "expected audio, got a value".to_string(),
            )),
        }
    }
}

/// Serialize a message as one newline-terminated JSON line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, TransportError> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| TransportError::Protocol(format!("failed to encode message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

/// Parse one JSON line (trailing newline optional)
pub fn decode_line<T: DeserializeOwned>(line: &str) -> Result<T, TransportError> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| TransportError::Protocol(format!("malformed message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        assert_eq!(
            encode_line(&HostRequest::Hello).unwrap(),
            "{\"method\":\"hello\"}\n"
        );
        assert_eq!(
            encode_line(&HostRequest::SpeakSsml {
                markup: "<speak>hi</speak>".to_string()
            })
            .unwrap(),
            "{\"method\":\"speak_ssml\",\"markup\":\"<speak>hi</speak>\"}\n"
        );
    }

    #[test]
    fn test_decode_handshake_reply() {
        let response: HostResponse = decode_line("{\"status\":\"ok\",\"value\":\"World\"}\n").unwrap();
        assert_eq!(response.into_value().unwrap(), HANDSHAKE_REPLY);
    }

    #[test]
    fn test_audio_payload() {
        let response = HostResponse::audio(b"RIFF\x00\x00");
        assert_eq!(
            response,
            HostResponse::Audio {
                data: "UklGRgAA".to_string()
            }
        );
        assert_eq!(response.into_audio().unwrap(), b"RIFF\x00\x00".to_vec());
    }

    #[test]
    fn test_remote_error() {
        let response: HostResponse =
            decode_line("{\"status\":\"error\",\"message\":\"no voice\"}").unwrap();
        assert_eq!(
            response.into_audio(),
            Err(TransportError::Remote("no voice".to_string()))
        );
    }

    #[test]
    fn test_wrong_response_kind() {
        let response = HostResponse::Ok {
            value: "World".to_string(),
        };
        assert!(matches!(
            response.into_audio(),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_invalid_base64() {
        let response = HostResponse::Audio {
            data: "not base64!".to_string(),
        };
        assert!(matches!(
            response.into_audio(),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_malformed_line() {
        let result: Result<HostResponse, _> = decode_line("{\"status\":\"later\"}");
        assert!(matches!(result, Err(TransportError::Protocol(_))));
    }
}
