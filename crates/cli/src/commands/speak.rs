// Speak command - synthesize lines concurrently and write audio files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chatvoice_speech::{HostCommandConfig, SpeechPool, SpeechPoolConfig, Ssml};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use super::build_pool;
use crate::output::{print_table_header, print_table_row, OutputFormat};

/// Voice settings shared by every line
#[derive(Debug, Clone)]
pub struct SpeakOptions {
    pub out_dir: PathBuf,
    pub voice: Option<String>,
    pub lang: String,
    pub rate: Option<String>,
}

impl SpeakOptions {
    fn markup(&self, text: &str) -> String {
        let mut ssml = Ssml::new(text).with_lang(&self.lang);
        if let Some(voice) = &self.voice {
            ssml = ssml.with_voice(voice);
        }
        if let Some(rate) = &self.rate {
            ssml = ssml.with_rate(rate);
        }
        ssml.render()
    }
}

/// Outcome of one line
#[derive(Debug, Clone, Serialize)]
pub struct SpeakResult {
    pub index: usize,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    pub bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn run(
    pool_config: SpeechPoolConfig,
    host_config: HostCommandConfig,
    lines: Vec<String>,
    options: &SpeakOptions,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    tokio::fs::create_dir_all(&options.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", options.out_dir.display()))?;

    let pool = build_pool(pool_config, host_config)?;
    info!(lines = lines.len(), "Speaking");

    let results = speak_all(&pool, lines, options).await;
    pool.shutdown().await;

    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if output.is_text() {
        if !quiet {
            print_table_header(&[("#", 4), ("FILE", 28), ("BYTES", 10), ("TEXT", 40)]);
            for result in &results {
                let index = result.index.to_string();
                let file = result
                    .file
                    .as_ref()
                    .map(|f| f.display().to_string())
                    .unwrap_or_else(|| "-".to_string());
                let bytes = match &result.error {
                    Some(_) => "failed".to_string(),
                    None => result.bytes.to_string(),
                };
                print_table_row(&[(&index, 4), (&file, 28), (&bytes, 10), (&result.text, 40)]);
            }
        }
        if failed > 0 {
            println!("{} of {} lines failed (see log)", failed, results.len());
        }
    } else {
        output.print_value(&serde_json::json!({ "data": results, "failed": failed }))?;
    }

    Ok(())
}

/// Synthesize every line at once; a failed line never affects the others
pub async fn speak_all(pool: &SpeechPool, lines: Vec<String>, options: &SpeakOptions) -> Vec<SpeakResult> {
    let requests = lines.into_iter().enumerate().map(|(index, text)| {
        let pool = pool.clone();
        let markup = options.markup(&text);
        let path = options.out_dir.join(file_name(index));

        async move {
            let outcome = match pool.synthesize(&markup).await {
                Ok(audio) => write_audio(&path, &audio).await.map(|_| audio.len()),
                Err(e) => Err(anyhow::Error::new(e)),
            };

            match outcome {
                Ok(bytes) => SpeakResult {
                    index,
                    text,
                    file: Some(path),
                    bytes,
                    error: None,
                },
                Err(e) => {
                    warn!(index, error = %e, "Dropping line");
                    SpeakResult {
                        index,
                        text,
                        file: None,
                        bytes: 0,
                        error: Some(format!("{:#}", e)),
                    }
                }
            }
        }
    });

    join_all(requests).await
}

fn file_name(index: usize) -> String {
    format!("line-{:03}.wav", index)
}

async fn write_audio(path: &Path, audio: &[u8]) -> Result<()> {
    tokio::fs::write(path, audio)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatvoice_speech::testing::{MockLauncher, MOCK_AUDIO};
    use std::sync::Arc;

    fn options(dir: &Path) -> SpeakOptions {
        SpeakOptions {
            out_dir: dir.to_path_buf(),
            voice: Some("en-US-AriaNeural".to_string()),
            lang: "en-US".to_string(),
            rate: None,
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(0), "line-000.wav");
        assert_eq!(file_name(42), "line-042.wav");
    }

    #[test]
    fn test_markup_uses_voice() {
        let dir = tempfile::tempdir().unwrap();
        let markup = options(dir.path()).markup("hi & bye");
        assert!(markup.contains("<voice name=\"en-US-AriaNeural\">"));
        assert!(markup.contains("hi &amp; bye"));
    }

    #[tokio::test]
    async fn test_speak_all_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let pool = SpeechPool::new(SpeechPoolConfig::default(), Arc::new(MockLauncher::new())).unwrap();

        let results = speak_all(
            &pool,
            vec!["first".to_string(), "second".to_string()],
            &options(dir.path()),
        )
        .await;

        assert_eq!(results.len(), 2);
        for result in &results {
            assert!(result.error.is_none());
            let written = std::fs::read(result.file.as_ref().unwrap()).unwrap();
            assert_eq!(written, MOCK_AUDIO);
        }
        assert!(dir.path().join("line-001.wav").exists());
    }

    #[tokio::test]
    async fn test_failed_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(MockLauncher::new().with_handshake_reply("nope"));
        let pool = SpeechPool::new(SpeechPoolConfig::default(), launcher).unwrap();

        let results = speak_all(&pool, vec!["lost".to_string()], &options(dir.path())).await;

        assert_eq!(results[0].bytes, 0);
        assert!(results[0].file.is_none());
        assert!(results[0].error.as_ref().unwrap().contains("handshake"));
        assert!(!dir.path().join("line-000.wav").exists());
    }
}
