//! In-memory speech hosts for tests
//!
//! [`MockLauncher`] hands out [`MockEndpoint`]s with scripted behavior and
//! keeps every endpoint it created so tests can steer and inspect them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::transport::{EndpointLauncher, SpeechEndpoint, TransportError, HANDSHAKE_REPLY};

/// A tiny WAV header, enough to look like audio
pub const MOCK_AUDIO: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

/// Scripted endpoint
pub struct MockEndpoint {
    port: u16,
    hello_reply: Option<String>,
    hello_delay: Duration,
    speak_delay: Duration,
    audio: Vec<u8>,
    fail_speech: AtomicBool,
    hello_calls: AtomicUsize,
    speak_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    last_markup: Mutex<Option<String>>,
}

impl MockEndpoint {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Make every following `speak_ssml` fail (or succeed again)
    pub fn set_fail_speech(&self, fail: bool) {
        self.fail_speech.store(fail, Ordering::SeqCst);
    }

    pub fn hello_count(&self) -> usize {
        self.hello_calls.load(Ordering::SeqCst)
    }

    pub fn speak_count(&self) -> usize {
        self.speak_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_count() > 0
    }

    /// Markup of the most recent `speak_ssml` call
    pub fn last_markup(&self) -> Option<String> {
        self.last_markup.lock().clone()
    }
}

#[async_trait]
impl SpeechEndpoint for MockEndpoint {
    async fn hello(&self) -> Result<String, TransportError> {
        self.hello_calls.fetch_add(1, Ordering::SeqCst);
        if !self.hello_delay.is_zero() {
            tokio::time::sleep(self.hello_delay).await;
        }
        self.hello_reply
            .clone()
            .ok_or_else(|| TransportError::Io("connection reset during handshake".to_string()))
    }

    async fn speak_ssml(&self, markup: &str) -> Result<Vec<u8>, TransportError> {
        self.speak_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_markup.lock() = Some(markup.to_string());

        if !self.speak_delay.is_zero() {
            tokio::time::sleep(self.speak_delay).await;
        }
        if self.is_shut_down() {
            return Err(TransportError::Closed);
        }
        if self.fail_speech.load(Ordering::SeqCst) {
            return Err(TransportError::Io("connection reset by speech host".to_string()));
        }
        Ok(self.audio.clone())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Launcher producing [`MockEndpoint`]s
pub struct MockLauncher {
    hello_reply: Option<String>,
    hello_delay: Duration,
    launch_delay: Duration,
    speak_delay: Duration,
    audio: Vec<u8>,
    fail_speech: bool,
    failing_launches: AtomicUsize,
    launches: AtomicUsize,
    endpoints: Mutex<Vec<Arc<MockEndpoint>>>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Healthy hosts that answer the handshake and return [`MOCK_AUDIO`]
    pub fn new() -> Self {
        Self {
            hello_reply: Some(HANDSHAKE_REPLY.to_string()),
            hello_delay: Duration::ZERO,
            launch_delay: Duration::ZERO,
            speak_delay: Duration::ZERO,
            audio: MOCK_AUDIO.to_vec(),
            fail_speech: false,
            failing_launches: AtomicUsize::new(0),
            launches: AtomicUsize::new(0),
            endpoints: Mutex::new(vec![]),
        }
    }

    /// Answer the handshake with `reply`
    pub fn with_handshake_reply(mut self, reply: impl Into<String>) -> Self {
        self.hello_reply = Some(reply.into());
        self
    }

    /// Fail the handshake round trip itself
    pub fn with_broken_handshake(mut self) -> Self {
        self.hello_reply = None;
        self
    }

    pub fn with_hello_delay(mut self, delay: Duration) -> Self {
        self.hello_delay = delay;
        self
    }

    /// Time each launch takes before the endpoint exists
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn with_speak_delay(mut self, delay: Duration) -> Self {
        self.speak_delay = delay;
        self
    }

    pub fn with_audio(mut self, audio: impl Into<Vec<u8>>) -> Self {
        self.audio = audio.into();
        self
    }

    /// Every endpoint starts out failing `speak_ssml`
    pub fn with_failing_speech(mut self) -> Self {
        self.fail_speech = true;
        self
    }

    /// The next `n` launches fail as if the port had been taken
    pub fn with_failing_launches(self, n: usize) -> Self {
        self.failing_launches.store(n, Ordering::SeqCst);
        self
    }

    /// Launch attempts so far, failed ones included
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Endpoints created so far, in launch order
    pub fn endpoints(&self) -> Vec<Arc<MockEndpoint>> {
        self.endpoints.lock().clone()
    }

    pub fn endpoint(&self, index: usize) -> Option<Arc<MockEndpoint>> {
        self.endpoints.lock().get(index).cloned()
    }

    /// Endpoint serving the worker bound to `port`
    pub fn endpoint_for_port(&self, port: u16) -> Option<Arc<MockEndpoint>> {
        self.endpoints.lock().iter().find(|e| e.port == port).cloned()
    }
}

#[async_trait]
impl EndpointLauncher for MockLauncher {
    async fn launch(&self, port: u16) -> Result<Arc<dyn SpeechEndpoint>, TransportError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }

        let should_fail = self
            .failing_launches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(TransportError::Connect {
                port,
                message: "address already in use".to_string(),
            });
        }

        let endpoint = Arc::new(MockEndpoint {
            port,
            hello_reply: self.hello_reply.clone(),
            hello_delay: self.hello_delay,
            speak_delay: self.speak_delay,
            audio: self.audio.clone(),
            fail_speech: AtomicBool::new(self.fail_speech),
            hello_calls: AtomicUsize::new(0),
            speak_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            last_markup: Mutex::new(None),
        });
        self.endpoints.lock().push(Arc::clone(&endpoint));
        Ok(endpoint)
    }
}
