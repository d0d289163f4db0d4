//! Optional TCP fanout for log events, so an operator console can follow a
//! headless daemon without scraping stdout. Frames are length-prefixed JSON
//! envelopes; slow or dead clients are dropped, never waited on.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

#[derive(Debug, Clone, Serialize)]
pub struct LogEnvelope {
    pub unix_ms: u64,
    pub level: String,
    pub topic: String,
    pub message: String,
}

/// Tracing layer that forwards every event into the stream channel.
#[derive(Clone)]
pub struct LogForwardLayer {
    sender: Sender<LogEnvelope>,
}

impl LogForwardLayer {
    pub fn new(sender: Sender<LogEnvelope>) -> Self {
        Self { sender }
    }
}

pub struct LogStreamHandle {
    sender: Sender<LogEnvelope>,
}

impl LogStreamHandle {
    pub fn layer(&self) -> LogForwardLayer {
        LogForwardLayer {
            sender: self.sender.clone(),
        }
    }
}

/// Bind the fanout listener. A bind failure disables streaming rather than
/// failing the embedding.
pub fn start_log_stream(bind_addr: SocketAddr) -> Option<LogStreamHandle> {
    let listener = match TcpListener::bind(bind_addr) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("log stream bind failed at {bind_addr}: {err}; streaming disabled");
            return None;
        }
    };
    if let Err(err) = listener.set_nonblocking(true) {
        eprintln!("log stream listener setup failed: {err}; streaming disabled");
        return None;
    }

    let (sender, receiver) = unbounded::<LogEnvelope>();
    thread::spawn(move || fan_out(listener, receiver));
    Some(LogStreamHandle { sender })
}

fn fan_out(listener: TcpListener, receiver: Receiver<LogEnvelope>) {
    let clients: Arc<Mutex<Vec<TcpStream>>> = Arc::new(Mutex::new(Vec::new()));
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = stream.set_nodelay(true);
                clients
                    .lock()
                    .expect("log client list mutex poisoned")
                    .push(stream);
            }
            Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(_) => thread::sleep(Duration::from_millis(200)),
        }

        while let Ok(envelope) = receiver.try_recv() {
            if let Ok(payload) = serde_json::to_vec(&envelope) {
                let mut guard = clients.lock().expect("log client list mutex poisoned");
                guard.retain_mut(|stream| write_frame(stream, &payload).is_ok());
            }
        }

        thread::sleep(Duration::from_millis(16));
    }
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> io::Result<()> {
    stream.write_all(&(payload.len() as u32).to_le_bytes())?;
    stream.write_all(payload)
}

impl<S> Layer<S> for LogForwardLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let envelope = LogEnvelope {
            unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            level: metadata.level().to_string(),
            topic: metadata.target().to_string(),
            message: visitor
                .message
                .unwrap_or_else(|| metadata.target().to_string()),
        };
        let _ = self.sender.send(envelope);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_flat_json() {
        let envelope = LogEnvelope {
            unix_ms: 1_700_000_000_000,
            level: "DEBUG".to_string(),
            topic: "strike::flight".to_string(),
            message: "missile 7 resolved".to_string(),
        };
        let json = serde_json::to_string(&envelope).expect("serializes");
        assert!(json.contains("\"topic\":\"strike::flight\""));
    }
}
