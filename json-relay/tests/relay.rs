use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use futures_util::{SinkExt, StreamExt};
use json_relay::{Relay, RelayConfig, registry::Registry};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::Message,
};

const READ_TIMEOUT: Duration = Duration::from_secs(2);
const SILENCE: Duration = Duration::from_millis(250);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    addr: SocketAddr,
    registry: Arc<Registry>,
    shutdown: Option<oneshot::Sender<()>>,
    server: JoinHandle<()>,
}

impl TestRelay {
    async fn start() -> Result<Self> {
        Self::start_with(RelayConfig::default()).await
    }

    async fn start_with(config: RelayConfig) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let relay = Relay::new(listener, config);
        let addr = relay.local_addr()?;
        let registry = relay.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            let _ = relay.run_until(shutdown).await;
        });

        Ok(Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            server,
        })
    }

    /// Connects a client and waits until the relay has registered it.
    async fn connect(&self) -> Result<Client> {
        let before = self.registry.len().await;
        let (client, _) = connect_async(format!("ws://{}", self.addr)).await?;
        self.wait_for_clients(before + 1).await?;
        Ok(client)
    }

    async fn wait_for_clients(&self, expected: usize) -> Result<()> {
        let deadline = Instant::now() + READ_TIMEOUT;
        while self.registry.len().await != expected {
            if Instant::now() > deadline {
                return Err(anyhow!(
                    "expected {expected} registered clients, found {}",
                    self.registry.len().await
                ));
            }
            sleep(Duration::from_millis(10)).await;
        }
        Ok(())
    }

    async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = self.server.await;
    }
}

async fn send_text(client: &mut Client, text: &str) -> Result<()> {
    client.send(Message::text(text.to_string())).await?;
    Ok(())
}

async fn recv_text(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(READ_TIMEOUT, client.next())
            .await
            .context("timed out waiting for relayed message")?
            .context("relay closed the connection")??;
        match message {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame: {other:?}")),
        }
    }
}

async fn assert_silent(client: &mut Client, name: &str) {
    if let Ok(Some(Ok(message))) = timeout(SILENCE, client.next()).await {
        panic!("{name} should not receive anything, got {message:?}");
    }
}

#[tokio::test]
async fn valid_json_reaches_other_client_but_not_sender() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    send_text(&mut alice, r#"{"x":1}"#).await?;

    assert_eq!(recv_text(&mut bob).await?, r#"{"x":1}"#);
    assert_silent(&mut alice, "alice").await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn invalid_json_is_never_delivered() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    send_text(&mut alice, "hello").await?;
    send_text(&mut alice, "not json").await?;

    assert_silent(&mut bob, "bob").await;
    assert_silent(&mut alice, "alice").await;

    // The sender stays connected and can still relay valid messages.
    send_text(&mut alice, "[1,2,3]").await?;
    assert_eq!(recv_text(&mut bob).await?, "[1,2,3]");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn disconnected_client_is_skipped() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;
    let mut carol = relay.connect().await?;

    bob.close(None).await?;
    relay.wait_for_clients(2).await?;

    send_text(&mut alice, r#"{"y":2}"#).await?;

    assert_eq!(recv_text(&mut carol).await?, r#"{"y":2}"#);
    assert_silent(&mut alice, "alice").await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn abrupt_disconnect_is_deregistered() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let bob = relay.connect().await?;
    let mut carol = relay.connect().await?;

    // Dropping the stream without a close handshake looks like a transport failure.
    drop(bob);
    relay.wait_for_clients(2).await?;

    send_text(&mut alice, "42").await?;
    assert_eq!(recv_text(&mut carol).await?, "42");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn registry_size_tracks_connects_and_disconnects() -> Result<()> {
    let relay = TestRelay::start().await?;

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(relay.connect().await?);
    }
    assert_eq!(relay.registry.len().await, 5);

    for mut client in clients.drain(..2) {
        client.close(None).await?;
    }
    relay.wait_for_clients(3).await?;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn lone_client_broadcast_is_a_noop() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;

    send_text(&mut alice, r#"{"alone":true}"#).await?;
    assert_silent(&mut alice, "alice").await;
    assert_eq!(relay.registry.len().await, 1);

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn every_other_client_receives_the_same_bytes() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut sender = relay.connect().await?;
    let mut receivers = Vec::new();
    for _ in 0..4 {
        receivers.push(relay.connect().await?);
    }

    let raw = "{ \"spaced\" : [1, 2 ,3] , \"s\":\"\\u00e9\" }";
    send_text(&mut sender, raw).await?;

    for receiver in &mut receivers {
        assert_eq!(recv_text(receiver).await?, raw);
    }
    assert_silent(&mut sender, "sender").await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn binary_json_frames_are_relayed_as_text() -> Result<()> {
    let relay = TestRelay::start().await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;

    alice.send(Message::binary(b"\"text\"".to_vec())).await?;
    assert_eq!(recv_text(&mut bob).await?, "\"text\"");

    alice.send(Message::binary(vec![0xc3, 0x28])).await?;
    assert_silent(&mut bob, "bob").await;

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn oversized_message_drops_only_its_sender() -> Result<()> {
    let relay = TestRelay::start_with(RelayConfig {
        max_message_size: 64,
        ..RelayConfig::default()
    })
    .await?;
    let mut alice = relay.connect().await?;
    let mut bob = relay.connect().await?;
    let mut carol = relay.connect().await?;

    let oversized = format!(r#"{{"pad":"{}"}}"#, "x".repeat(256));
    send_text(&mut alice, &oversized).await?;
    relay.wait_for_clients(2).await?;
    assert_silent(&mut bob, "bob").await;

    send_text(&mut bob, "null").await?;
    assert_eq!(recv_text(&mut carol).await?, "null");

    relay.stop().await;
    Ok(())
}

#[tokio::test]
async fn bind_failure_is_reported() -> Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0").await?;
    let addr = occupied.local_addr()?;

    let result = Relay::bind(RelayConfig {
        listen: addr,
        ..RelayConfig::default()
    })
    .await;

    match result {
        Err(json_relay::RelayError::Bind { addr: reported, .. }) => assert_eq!(reported, addr),
        Err(other) => return Err(anyhow!("unexpected error: {other}")),
        Ok(_) => return Err(anyhow!("bind on an occupied port should fail")),
    }
    Ok(())
}
