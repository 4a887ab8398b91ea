//! One framed protocol session over one socket.
//!
//! A dedicated reader task decodes frames as they arrive and sorts them into
//! three buckets: events go to the installed event callback, replies go to
//! the single-capacity response slot of the command in flight, and anything
//! else is discarded. Commands are serialized by an async mutex so at most
//! one is ever waiting for a reply.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anova_hub_common::codec;
use anova_hub_common::event::{self, AnovaEvent};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::time;
use tracing::{debug, error, warn};

use super::{Error, Result};

/// Hard ceiling on how long a command may wait for its reply.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

type EventCallback = Arc<dyn Fn(AnovaEvent) + Send + Sync>;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    peer: String,
    writer: Mutex<BoxedWriter>,
    cmd_lock: Mutex<()>,
    response_slot: StdMutex<Option<oneshot::Sender<String>>>,
    event_callback: StdMutex<Option<EventCallback>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Wraps a socket and spawns its reader task.
    pub fn new<S>(stream: S, peer: impl Into<String>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let connection = Arc::new(Self {
            peer: peer.into(),
            writer: Mutex::new(Box::new(write_half) as BoxedWriter),
            cmd_lock: Mutex::new(()),
            response_slot: StdMutex::new(None),
            event_callback: StdMutex::new(None),
            closed,
        });

        tokio::spawn(connection.clone().read_loop(read_half));
        connection
    }

    /// Installs the callback invoked for every event frame.
    ///
    /// The callback runs on the reader task. It must not call
    /// [`Connection::send_command`] synchronously on this connection, or the
    /// command lock deadlocks; hand the event to a channel instead.
    pub fn set_event_callback(&self, callback: impl Fn(AnovaEvent) + Send + Sync + 'static) {
        *self.event_callback.lock().unwrap() = Some(Arc::new(callback));
    }

    /// Sends one command line and waits for the matching reply.
    ///
    /// Returns [`Error::Timeout`] after [`RESPONSE_TIMEOUT`] and
    /// [`Error::ConnectionClosed`] once the socket is gone.
    pub async fn send_command(&self, message: &str) -> Result<String> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let _guard = self.cmd_lock.lock().await;
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        let frame = codec::encode(message)?;
        let (tx, rx) = oneshot::channel();
        *self.response_slot.lock().unwrap() = Some(tx);

        {
            let mut writer = self.writer.lock().await;
            let written: std::io::Result<()> = async {
                writer.write_all(&frame).await?;
                writer.write_all(&[codec::DELIMITER]).await?;
                writer.flush().await
            }
            .await;
            drop(writer);

            if let Err(err) = written {
                self.response_slot.lock().unwrap().take();
                self.close().await;
                return Err(Error::Io(err));
            }
        }
        debug!(peer = %self.peer, %message, "--> sent command");

        match time::timeout(RESPONSE_TIMEOUT, rx).await {
            Ok(Ok(response)) => {
                debug!(peer = %self.peer, %response, "<-- received response");
                Ok(response)
            }
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => {
                // Clear the slot so the next command starts clean.
                self.response_slot.lock().unwrap().take();
                Err(Error::Timeout)
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection has transitioned to closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Closes the socket and wakes any pending sender. Idempotent.
    pub async fn close(&self) {
        if self.mark_closed() {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.shutdown().await {
            debug!(peer = %self.peer, %err, "error shutting down socket");
        }
    }

    /// Flips the closed flag; returns whether it was already set. Dropping
    /// the response sender wakes a pending command with `ConnectionClosed`.
    fn mark_closed(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            self.response_slot.lock().unwrap().take();
        }
        was_closed
    }

    async fn read_loop<R>(self: Arc<Self>, read_half: ReadHalf<R>)
    where
        R: AsyncRead + Send,
    {
        let mut reader = BufReader::new(read_half);
        let mut closed = self.closed.subscribe();
        let mut frame = Vec::new();

        loop {
            frame.clear();
            if *closed.borrow_and_update() {
                break;
            }
            let read = tokio::select! {
                _ = closed.changed() => break,
                read = read_frame(&mut reader, &mut frame) => read,
            };
            match read {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(peer = %self.peer, "connection closed by remote host");
                    break;
                }
                Err(err) => {
                    warn!(peer = %self.peer, %err, "error reading from connection");
                    break;
                }
            }

            let message = match codec::decode(&frame) {
                Ok(message) => message,
                Err(err) => {
                    error!(peer = %self.peer, %err, "failed to decode frame");
                    break;
                }
            };

            if message.to_lowercase().contains("invalid command") {
                debug!(peer = %self.peer, %message, "device rejected command, skipping");
                continue;
            }

            if event::is_event(&message) {
                match AnovaEvent::parse(&message) {
                    Ok(parsed) => {
                        let callback = self.event_callback.lock().unwrap().clone();
                        match callback {
                            Some(callback) => callback(parsed),
                            None => {
                                debug!(peer = %self.peer, ?parsed, "event received but no callback set")
                            }
                        }
                    }
                    Err(err) => error!(peer = %self.peer, %err, "error parsing event"),
                }
                continue;
            }

            match self.response_slot.lock().unwrap().take() {
                Some(slot) => {
                    // The waiter may have timed out in the meantime; a failed
                    // send just drops the stale reply.
                    let _ = slot.send(message);
                }
                None => {
                    debug!(peer = %self.peer, %message, "discarding unexpected response")
                }
            }
        }

        self.close().await;
    }
}

/// Reads one frame as header, declared-length payload, checksum and
/// delimiter. Frames cannot be split on the delimiter byte alone: rotated
/// payload bytes and checksums can legitimately be `0x16`.
pub(crate) async fn read_frame<R>(reader: &mut R, frame: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;
    frame.extend_from_slice(&header);

    let length = header[1] as usize;
    let body_start = frame.len();
    frame.resize(body_start + length + 2, 0); // payload, checksum, delimiter
    reader.read_exact(&mut frame[body_start..]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tokio::time;

    use super::*;
    use crate::cooker::sim::{read_message, write_message};

    fn pair() -> (Arc<Connection>, DuplexStream) {
        let (server_side, cooker_side) = tokio::io::duplex(4096);
        (Connection::new(server_side, "test"), cooker_side)
    }

    #[tokio::test]
    async fn command_gets_its_reply() {
        let (connection, mut cooker) = pair();

        let task = tokio::spawn(async move { connection.send_command("read temp").await });

        assert_eq!(read_message(&mut cooker).await, "read temp");
        write_message(&mut cooker, "58.5").await;

        assert_eq!(task.await.unwrap().unwrap(), "58.5");
    }

    #[tokio::test]
    async fn commands_are_serialized_and_replies_are_not_crossed() {
        let (connection, mut cooker) = pair();

        let a = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("read temp").await })
        };
        let b = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("read set temp").await })
        };

        // Whichever command arrives first is answered before the second one
        // is allowed to touch the wire.
        for _ in 0..2 {
            let request = read_message(&mut cooker).await;
            match request.as_str() {
                "read temp" => write_message(&mut cooker, "20.1").await,
                "read set temp" => write_message(&mut cooker, "60.0").await,
                other => panic!("unexpected request: {other}"),
            }
        }

        assert_eq!(a.await.unwrap().unwrap(), "20.1");
        assert_eq!(b.await.unwrap().unwrap(), "60.0");
    }

    #[tokio::test]
    async fn event_mid_command_goes_to_the_callback() {
        let (connection, mut cooker) = pair();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        connection.set_event_callback(move |event| {
            let _ = event_tx.send(event);
        });

        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };

        assert_eq!(read_message(&mut cooker).await, "status");
        write_message(&mut cooker, "event low water").await;
        write_message(&mut cooker, "low water").await;

        assert_eq!(task.await.unwrap().unwrap(), "low water");
        let event = event_rx.recv().await.unwrap();
        assert_eq!(
            event.event_type,
            anova_hub_common::event::EventType::LowWater
        );
    }

    #[tokio::test]
    async fn unsolicited_response_is_discarded() {
        let (connection, mut cooker) = pair();
        write_message(&mut cooker, "stray").await;
        // Let the reader drain the stray frame before a command installs
        // its response slot.
        time::sleep(Duration::from_millis(50)).await;

        // The connection keeps working afterwards.
        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };
        assert_eq!(read_message(&mut cooker).await, "status");
        write_message(&mut cooker, "stopped").await;
        assert_eq!(task.await.unwrap().unwrap(), "stopped");
    }

    #[tokio::test]
    async fn invalid_command_frames_are_dropped() {
        let (connection, mut cooker) = pair();

        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };

        assert_eq!(read_message(&mut cooker).await, "status");
        write_message(&mut cooker, "Invalid Command").await;
        write_message(&mut cooker, "running").await;

        assert_eq!(task.await.unwrap().unwrap(), "running");
    }

    #[tokio::test(start_paused = true)]
    async fn command_times_out_and_connection_stays_usable() {
        let (connection, mut cooker) = pair();

        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };
        assert_eq!(read_message(&mut cooker).await, "status");
        // Never reply; the clock is paused, so the ceiling elapses instantly.
        assert!(matches!(task.await.unwrap(), Err(Error::Timeout)));

        // A late reply for the timed-out command is discarded, and the next
        // command starts clean.
        write_message(&mut cooker, "stopped").await;
        time::sleep(Duration::from_millis(10)).await;
        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("read temp").await })
        };
        assert_eq!(read_message(&mut cooker).await, "read temp");
        write_message(&mut cooker, "58.0").await;
        assert_eq!(task.await.unwrap().unwrap(), "58.0");
    }

    #[tokio::test]
    async fn remote_close_wakes_pending_sender() {
        let (connection, mut cooker) = pair();

        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };
        assert_eq!(read_message(&mut cooker).await, "status");
        drop(cooker);

        assert!(matches!(task.await.unwrap(), Err(Error::ConnectionClosed)));
        connection.closed().await;
        assert!(matches!(
            connection.send_command("status").await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn corrupt_frame_closes_the_connection() {
        let (connection, mut cooker) = pair();

        let task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.send_command("status").await })
        };
        assert_eq!(read_message(&mut cooker).await, "status");

        let mut frame = codec::encode("stopped").unwrap();
        let checksum = frame.len() - 1;
        frame[checksum] ^= 0xFF;
        frame.push(codec::DELIMITER);
        cooker.write_all(&frame).await.unwrap();
        cooker.flush().await.unwrap();

        assert!(matches!(task.await.unwrap(), Err(Error::ConnectionClosed)));
        connection.closed().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (connection, _cooker) = pair();
        connection.close().await;
        connection.close().await;
        assert!(connection.is_closed());
        assert!(matches!(
            time::timeout(Duration::from_secs(1), connection.closed()).await,
            Ok(())
        ));
    }
}
