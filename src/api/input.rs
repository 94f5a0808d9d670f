//! Tag report sources
//!
//! Stdin is read on a plain thread so a read that never returns cannot hold up
//! shutdown. The TCP listener spawns one task per connection. Every source runs
//! its own [`IngestDecoder`]: range batches go straight to the engine queue and
//! operator commands go to the caller as [`InputEvent`]s.

use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::thread;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::RangeBatch;
use crate::processing::{ControlCommand, IngestDecoder, IngestStats, InputMessage};

/// Something the caller has to act on
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Control(ControlCommand),
    /// A reader thread reached end of input
    Closed(IngestStats),
}

/// Decode one line and forward it. Returns `false` once nobody is listening.
fn forward(
    decoder: &mut IngestDecoder,
    line: &str,
    batches: &mpsc::UnboundedSender<RangeBatch>,
    events: &mpsc::UnboundedSender<InputEvent>,
) -> bool {
    // Malformed lines are logged by the decoder and skipped
    let Ok(Some(message)) = decoder.decode_message(line) else {
        return true;
    };
    match message {
        InputMessage::Ranges(report) if report.observations.is_empty() => true,
        InputMessage::Ranges(report) => batches.send(report.observations).is_ok(),
        InputMessage::Control(command) => events.send(InputEvent::Control(command)).is_ok(),
    }
}

/// Read `reader` to the end, forwarding every line
pub fn pump_lines<R: BufRead>(
    reader: R,
    batches: &mpsc::UnboundedSender<RangeBatch>,
    events: &mpsc::UnboundedSender<InputEvent>,
) -> IngestStats {
    let mut decoder = IngestDecoder::new();

    for line in reader.lines() {
        match line {
            Ok(line) => {
                if !forward(&mut decoder, &line, batches, events) {
                    warn!("Engine stopped accepting input");
                    break;
                }
            }
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        }
    }

    decoder.stats()
}

/// Read `reader` on a dedicated thread; sends [`InputEvent::Closed`] at end of input
pub fn spawn_reader<R>(
    name: &str,
    reader: R,
    batches: mpsc::UnboundedSender<RangeBatch>,
    events: mpsc::UnboundedSender<InputEvent>,
) -> io::Result<thread::JoinHandle<()>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let stats = pump_lines(reader, &batches, &events);
        let _ = events.send(InputEvent::Closed(stats));
    })
}

pub fn spawn_stdin_reader(
    batches: mpsc::UnboundedSender<RangeBatch>,
    events: mpsc::UnboundedSender<InputEvent>,
) -> io::Result<thread::JoinHandle<()>> {
    spawn_reader("stdin-reader", io::BufReader::new(io::stdin()), batches, events)
}

/// TCP listener accepting tag report connections
pub struct TcpInput {
    addr: SocketAddr,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl TcpInput {
    /// Bind `addr` and accept connections until [`TcpInput::shutdown`]
    pub async fn start(
        addr: SocketAddr,
        batches: mpsc::UnboundedSender<RangeBatch>,
        events: mpsc::UnboundedSender<InputEvent>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let actual_addr = listener.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, peer)) => {
                            info!(%peer, "tag connected");
                            tokio::spawn(read_connection(stream, peer, batches.clone(), events.clone()));
                        }
                        Err(e) => warn!("Accept error: {}", e),
                    },
                    _ = shutdown_rx.recv() => {
                        debug!("tcp input stopping");
                        break;
                    }
                }
            }
        });

        info!(addr = %actual_addr, "Listening for tag reports (TCP)");
        Ok(Self {
            addr: actual_addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting; open connections end with the runtime
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

async fn read_connection(
    stream: TcpStream,
    peer: SocketAddr,
    batches: mpsc::UnboundedSender<RangeBatch>,
    events: mpsc::UnboundedSender<InputEvent>,
) {
    let mut decoder = IngestDecoder::new();
    let mut lines = BufReader::new(stream).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !forward(&mut decoder, &line, &batches, &events) {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(%peer, "Connection read error: {}", e);
                break;
            }
        }
    }

    let stats = decoder.stats();
    info!(
        %peer,
        lines = stats.lines_decoded,
        rejected_lines = stats.lines_rejected,
        commands = stats.commands,
        "tag disconnected"
    );
}
