//! Marked-up text for the `speak_ssml` call
//!
//! Language detection and voice choice happen upstream; this only renders
//! what the caller decided into a `<speak>` document.

use serde::{Deserialize, Serialize};

/// Builder for a single-utterance SSML document
///
/// # Example
///
/// ```
/// use chatvoice_speech::Ssml;
///
/// let markup = Ssml::new("hi <3")
///     .with_lang("en-US")
///     .with_voice("en-US-AriaNeural")
///     .render();
///
/// assert_eq!(
///     markup,
///     "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" xml:lang=\"en-US\">\
///      <voice name=\"en-US-AriaNeural\">hi &lt;3</voice></speak>"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ssml {
    text: String,
    lang: String,
    voice: Option<String>,
    rate: Option<String>,
    pitch: Option<String>,
}

impl Ssml {
    /// Wrap plain text; the language defaults to `en-US`
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            lang: "en-US".to_string(),
            voice: None,
            rate: None,
            pitch: None,
        }
    }

    /// BCP-47 language tag for `xml:lang`
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }

    /// Voice name understood by the speech host
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }

    /// Prosody rate, e.g. `"+10%"` or `"slow"`
    pub fn with_rate(mut self, rate: impl Into<String>) -> Self {
        self.rate = Some(rate.into());
        self
    }

    /// Prosody pitch, e.g. `"-2st"`
    pub fn with_pitch(mut self, pitch: impl Into<String>) -> Self {
        self.pitch = Some(pitch.into());
        self
    }

    /// Render the document
    pub fn render(&self) -> String {
        let mut body = escape(&self.text);

        if self.rate.is_some() || self.pitch.is_some() {
            let mut attrs = String::new();
            if let Some(rate) = &self.rate {
                attrs.push_str(&format!(" rate=\"{}\"", escape(rate)));
            }
            if let Some(pitch) = &self.pitch {
                attrs.push_str(&format!(" pitch=\"{}\"", escape(pitch)));
            }
            body = format!("<prosody{}>{}</prosody>", attrs, body);
        }

        if let Some(voice) = &self.voice {
            body = format!("<voice name=\"{}\">{}</voice>", escape(voice), body);
        }

        format!(
            "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" xml:lang=\"{}\">{}</speak>",
            escape(&self.lang),
            body
        )
    }
}

impl std::fmt::Display for Ssml {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Escape the five XML special characters
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(
            Ssml::new("hello").render(),
            "<speak version=\"1.0\" xmlns=\"http://www.w3.org/2001/10/synthesis\" xml:lang=\"en-US\">hello</speak>"
        );
    }

    #[test]
    fn test_escapes_chat_text() {
        assert_eq!(escape("a & b <script> \"q\" it's"), "a &amp; b &lt;script&gt; &quot;q&quot; it&apos;s");
    }

    #[test]
    fn test_prosody_inside_voice() {
        let markup = Ssml::new("gg")
            .with_lang("ja-JP")
            .with_voice("ja-JP-NanamiNeural")
            .with_rate("+20%")
            .with_pitch("-1st")
            .to_string();

        assert!(markup.contains("xml:lang=\"ja-JP\""));
        assert!(markup.ends_with(
            "<voice name=\"ja-JP-NanamiNeural\"><prosody rate=\"+20%\" pitch=\"-1st\">gg</prosody></voice></speak>"
        ));
    }

    #[test]
    fn test_attribute_values_escaped() {
        let markup = Ssml::new("x").with_voice("bad\"voice").render();
        assert!(markup.contains("<voice name=\"bad&quot;voice\">"));
    }
}
