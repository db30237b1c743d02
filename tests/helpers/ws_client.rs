#![allow(dead_code)]
//! A minimal WebSocket subscriber.

use certfeed::core::CertificateEvent;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};

pub struct Subscriber {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Subscriber {
    pub async fn connect(url: &str) -> Self {
        let (stream, _) = connect_async(url).await.expect("WebSocket connect failed");
        Self { stream }
    }

    /// The next event, or `None` if nothing arrives within `wait`.
    pub async fn next_event(&mut self, wait: Duration) -> Option<CertificateEvent> {
        loop {
            let frame = match timeout(wait, self.stream.next()).await {
                Ok(Some(Ok(frame))) => frame,
                _ => return None,
            };
            match frame {
                Message::Text(text) => {
                    return Some(serde_json::from_str(text.as_str()).expect("invalid event JSON"))
                }
                Message::Close(_) => return None,
                _ => continue,
            }
        }
    }

    /// Collects `count` events, failing if any takes longer than `wait`.
    pub async fn take_events(&mut self, count: usize, wait: Duration) -> Vec<CertificateEvent> {
        let mut events = Vec::with_capacity(count);
        for i in 0..count {
            match self.next_event(wait).await {
                Some(event) => events.push(event),
                None => panic!("only received {} of {} events", i, count),
            }
        }
        events
    }

    /// True if the server ends the connection within `wait`.
    pub async fn wait_for_close(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return false,
                Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => continue,
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .expect("send failed");
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

pub fn domains(events: &[CertificateEvent]) -> Vec<String> {
    events.iter().map(|e| e.domain.clone()).collect()
}
