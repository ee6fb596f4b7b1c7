// Tests for the JSON-lines TCP endpoint against an in-process fake host

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatvoice_speech::transport::{decode_line, encode_line, HostRequest, HostResponse};
use chatvoice_speech::{
    EndpointLauncher, SpeechEndpoint, SpeechPool, SpeechPoolConfig, Ssml, TcpEndpoint,
    TransportError,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const FAKE_WAV: &[u8] = b"RIFF\x10\x00\x00\x00WAVEdata";

/// Serve one connection the way a speech host would
///
/// Markup containing "unknown-voice" gets an error reply, markup containing
/// "hangup" closes the connection without answering, and markup containing
/// "slow" is answered after a delay.
async fn serve_host(stream: TcpStream) {
    let (read_half, mut writer) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let response = match decode_line::<HostRequest>(&line) {
            Ok(HostRequest::Hello) => HostResponse::Ok {
                value: "World".to_string(),
            },
            Ok(HostRequest::SpeakSsml { markup }) if markup.contains("hangup") => return,
            Ok(HostRequest::SpeakSsml { markup }) if markup.contains("unknown-voice") => {
                HostResponse::Error {
                    message: "voice not installed".to_string(),
                }
            }
            Ok(HostRequest::SpeakSsml { markup }) if markup.contains("slow") => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                HostResponse::audio(FAKE_WAV)
            }
            Ok(HostRequest::SpeakSsml { .. }) => HostResponse::audio(FAKE_WAV),
            Err(e) => HostResponse::Error {
                message: e.to_string(),
            },
        };

        let Ok(reply) = encode_line(&response) else {
            return;
        };
        if writer.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn spawn_fake_host(listener: TcpListener) {
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_host(stream));
        }
    });
}

async fn connected_endpoint() -> TcpEndpoint {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    spawn_fake_host(listener).await;
    TcpEndpoint::connect(addr).await.unwrap()
}

#[tokio::test]
async fn test_handshake_and_synthesis() {
    let endpoint = connected_endpoint().await;

    assert_eq!(endpoint.hello().await.unwrap(), "World");

    let markup = Ssml::new("hello chat").render();
    assert_eq!(endpoint.speak_ssml(&markup).await.unwrap(), FAKE_WAV);
}

#[tokio::test]
async fn test_remote_error_keeps_connection() {
    let endpoint = connected_endpoint().await;

    let err = endpoint
        .speak_ssml("<speak><voice name=\"unknown-voice\">hi</voice></speak>")
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Remote("voice not installed".to_string()));

    assert_eq!(endpoint.speak_ssml("<speak>hi</speak>").await.unwrap(), FAKE_WAV);
}

#[tokio::test]
async fn test_hangup_closes_endpoint() {
    let endpoint = connected_endpoint().await;

    let err = endpoint.speak_ssml("<speak>hangup</speak>").await.unwrap_err();
    assert_eq!(err, TransportError::Closed);

    // The broken stream was dropped
    assert_eq!(endpoint.hello().await.unwrap_err(), TransportError::Closed);
}

#[tokio::test]
async fn test_abandoned_request_does_not_leak_reply() {
    let endpoint = connected_endpoint().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        endpoint.speak_ssml("<speak>slow</speak>"),
    )
    .await;
    assert!(abandoned.is_err());

    // The late audio reply must never be read as the handshake answer
    assert_eq!(endpoint.hello().await.unwrap_err(), TransportError::Closed);
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let endpoint = connected_endpoint().await;

    endpoint.shutdown().await.unwrap();
    endpoint.shutdown().await.unwrap();

    assert_eq!(endpoint.hello().await.unwrap_err(), TransportError::Closed);
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = TcpEndpoint::connect(addr).await;

    assert!(matches!(
        result,
        Err(TransportError::Connect { port, .. }) if port == addr.port()
    ));
}

/// Binds the fake host to the port the pool picked
struct InProcessLauncher {
    launches: AtomicUsize,
}

#[async_trait]
impl EndpointLauncher for InProcessLauncher {
    async fn launch(&self, port: u16) -> Result<Arc<dyn SpeechEndpoint>, TransportError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| TransportError::Connect {
                port,
                message: e.to_string(),
            })?;
        spawn_fake_host(listener).await;

        let endpoint = TcpEndpoint::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, port))).await?;
        Ok(Arc::new(endpoint))
    }
}

#[tokio::test]
async fn test_pool_over_tcp() {
    let launcher = Arc::new(InProcessLauncher {
        launches: AtomicUsize::new(0),
    });
    let pool = SpeechPool::new(SpeechPoolConfig::default(), launcher.clone()).unwrap();

    let markup = Ssml::new("thanks for the raid").with_voice("en-US-AriaNeural");
    let first = pool.synthesize(&markup.render()).await.unwrap();
    let second = pool.synthesize("<speak>again</speak>").await.unwrap();

    assert_eq!(first, FAKE_WAV);
    assert_eq!(second, FAKE_WAV);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);

    pool.shutdown().await;
    assert!(pool.is_empty());
}

#[tokio::test]
async fn test_pool_evicts_hung_up_worker() {
    let launcher = Arc::new(InProcessLauncher {
        launches: AtomicUsize::new(0),
    });
    let pool = SpeechPool::new(SpeechPoolConfig::default(), launcher.clone()).unwrap();

    pool.synthesize("<speak>warmup</speak>").await.unwrap();
    let first_port = pool.workers()[0].port;

    // Every host hangs up on this one, so each attempt costs a worker
    let err = pool.synthesize("<speak>hangup</speak>").await.unwrap_err();

    assert!(err.is_transient());
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 3);
    assert!(pool.workers().iter().all(|w| w.port != first_port));
}
