//! A scripted cooker for tests.
//!
//! [`CookerSim`] answers the wire protocol from a tiny model of a real unit:
//! it identifies itself, tracks the target temperature, unit and timer it is
//! told to hold, and flips between stopped and running. Tests can inject
//! unsolicited event frames and hang up the socket on demand.

use std::sync::Arc;

use anova_hub_common::codec;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Notify, mpsc};

use super::connection::read_frame;

/// Reads one frame from the cooker side of a stream and decodes it.
pub async fn read_message<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut frame = Vec::new();
    read_frame(stream, &mut frame)
        .await
        .expect("stream closed while waiting for a frame");
    codec::decode(&frame).unwrap()
}

/// Encodes and writes one frame, delimiter included.
pub async fn write_message<S>(stream: &mut S, message: &str)
where
    S: AsyncWrite + Unpin,
{
    let mut frame = codec::encode(message).unwrap();
    frame.push(codec::DELIMITER);
    stream.write_all(&frame).await.unwrap();
    stream.flush().await.unwrap();
}

pub struct CookerSim {
    pub id_card: String,
    pub version: String,
    pub secret_key: String,
    pub fail_handshake: bool,

    status: String,
    current_temp: f64,
    target_temp: f64,
    unit: char,
    timer_minutes: u32,
    timer_running: bool,
    speaker_on: bool,

    events: Option<mpsc::UnboundedReceiver<String>>,
    event_tx: mpsc::UnboundedSender<String>,
    hangup: Arc<Notify>,
}

impl CookerSim {
    pub fn new(id_card: &str) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        Self {
            id_card: id_card.to_string(),
            version: "2.2.1".to_string(),
            secret_key: "0123456789".to_string(),
            fail_handshake: false,
            status: "stopped".to_string(),
            current_temp: 20.0,
            target_temp: 60.0,
            unit: 'c',
            timer_minutes: 0,
            timer_running: false,
            speaker_on: true,
            events: Some(events),
            event_tx,
            hangup: Arc::new(Notify::new()),
        }
    }

    /// Sender for unsolicited frames the sim pushes mid-session.
    pub fn event_injector(&self) -> mpsc::UnboundedSender<String> {
        self.event_tx.clone()
    }

    /// Notifying this handle makes the sim drop its socket.
    pub fn hangup_handle(&self) -> Arc<Notify> {
        self.hangup.clone()
    }

    /// Serves the protocol until the peer goes away or the sim is hung up.
    pub async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut events = self.events.take().expect("sim already running");
        let hangup = self.hangup.clone();
        let mut frame = Vec::new();

        loop {
            frame.clear();
            tokio::select! {
                _ = hangup.notified() => return,
                unsolicited = events.recv() => {
                    if let Some(message) = unsolicited {
                        write_message(&mut write_half, &message).await;
                    }
                }
                read = read_frame(&mut reader, &mut frame) => {
                    if read.is_err() {
                        return;
                    }
                    let Ok(command) = codec::decode(&frame) else { return };
                    match self.respond(&command) {
                        Some(reply) => write_message(&mut write_half, &reply).await,
                        None => return,
                    }
                }
            }
        }
    }

    /// `None` hangs up instead of answering.
    fn respond(&mut self, command: &str) -> Option<String> {
        if self.fail_handshake && command == "get id card" {
            return None;
        }
        let reply = if command == "get id card" {
            format!("anova {}", self.id_card)
        } else if command == "version" {
            self.version.clone()
        } else if command == "get number" {
            self.secret_key.clone()
        } else if command == "status" {
            self.status.clone()
        } else if command == "read temp" {
            format!("{:.1}", self.current_temp)
        } else if command == "read set temp" {
            format!("{:.1}", self.target_temp)
        } else if command == "read unit" {
            self.unit.to_string()
        } else if command == "read timer" {
            format!(
                "{} {}",
                self.timer_minutes,
                if self.timer_running { 1 } else { 0 }
            )
        } else if command == "speaker status" {
            format!("speaker is {}", if self.speaker_on { "on" } else { "off" })
        } else if command == "start" {
            self.status = "running".to_string();
            "ok".to_string()
        } else if command == "stop" {
            self.status = "stopped".to_string();
            "ok".to_string()
        } else if let Some(temp) = command.strip_prefix("set temp ") {
            self.target_temp = temp.parse().unwrap_or(self.target_temp);
            "ok".to_string()
        } else if let Some(unit) = command.strip_prefix("set unit ") {
            self.unit = unit.chars().next().unwrap_or('c');
            "ok".to_string()
        } else if let Some(minutes) = command.strip_prefix("set timer ") {
            self.timer_minutes = minutes.parse().unwrap_or(0);
            minutes.to_string()
        } else if command == "start time" {
            self.timer_running = true;
            "ok".to_string()
        } else if command == "stop time" {
            self.timer_running = false;
            "stop time".to_string()
        } else if command == "clear alarm" {
            "ok".to_string()
        } else {
            "Invalid Command".to_string()
        };
        Some(reply)
    }
}
