//! Message bus client: line-delimited JSON frames over a TCP socket, §4.1/§6.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{Error, FrameError};
use crate::frame::Frame;

/// A connected bus client: a background task reads lines off the socket
/// and forwards parsed, receive-hook-validated frames on `inbound`; callers
/// send frames to write out on `outbound`.
pub struct BusClient {
    /// Validated frames received from the bus, in arrival order.
    pub inbound: mpsc::Receiver<Frame>,
    /// Handle to submit outbound frames for writing.
    pub outbound: mpsc::Sender<Frame>,
}

impl BusClient {
    /// Connect to `addr` and spawn the read/write tasks for `self_agent_id`.
    /// Frames that fail receive-hook validation are logged and dropped,
    /// never forwarded on `inbound`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the TCP connection cannot be established.
    pub async fn connect(addr: &str, self_agent_id: String) -> Result<Self, Error> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (inbound_tx, inbound_rx) = mpsc::channel::<Frame>(256);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(256);

        let reader_agent_id = self_agent_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_and_validate(&line, &reader_agent_id) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::info!(error = %e, "dropping malformed or misaddressed frame");
                            }
                        }
                    }
                    Ok(None) => {
                        tracing::info!("bus connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "bus read error");
                        break;
                    }
                }
            }
        });

        tokio::spawn(async move {
            while let Some(mut frame) = outbound_rx.recv().await {
                frame.stamp_sender(&self_agent_id);
                let line = match frame.to_line() {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize outbound frame");
                        continue;
                    }
                };
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::error!(error = %e, "bus write error");
                    break;
                }
                if let Err(e) = write_half.write_all(b"\n").await {
                    tracing::error!(error = %e, "bus write error");
                    break;
                }
            }
        });

        Ok(Self {
            inbound: inbound_rx,
            outbound: outbound_tx,
        })
    }
}

fn parse_and_validate(line: &str, self_agent_id: &str) -> Result<Frame, FrameError> {
    let frame = Frame::from_line(line)?;
    frame.validate_receive(self_agent_id)?;
    Ok(frame)
}
