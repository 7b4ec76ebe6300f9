//! Test helpers: a scripted VISCA camera and a tally source

#![allow(dead_code)]

use parking_lot::Mutex;
use ptz_tally_control::visca::encode_nibbles;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(5);

/// Focus mode answers for the autofocus inquiry
pub const AF_AUTO: u8 = 0x02;
pub const AF_MANUAL: u8 = 0x03;

pub const ACK: [u8; 3] = [0x90, 0x41, 0xFF];
pub const COMPLETION: [u8; 3] = [0x90, 0x51, 0xFF];

/// Frame matchers
pub fn is_memory_recall(frame: &[u8], position: u8) -> bool {
    frame == [0x81, 0x01, 0x04, 0x3F, 0x02, position, 0xFF]
}

pub fn is_memory_set(frame: &[u8], position: u8) -> bool {
    frame == [0x81, 0x01, 0x04, 0x3F, 0x01, position, 0xFF]
}

pub fn is_lock_on(frame: &[u8]) -> bool {
    frame == [0x81, 0x0A, 0x04, 0x68, 0x02, 0xFF]
}

pub fn is_lock_off(frame: &[u8]) -> bool {
    frame == [0x81, 0x0A, 0x04, 0x68, 0x03, 0xFF]
}

pub fn is_focus_direct(frame: &[u8]) -> bool {
    frame.len() == 9 && frame[..4] == [0x81, 0x01, 0x04, 0x48]
}

pub fn focus_direct(value: u16) -> Vec<u8> {
    let mut frame = vec![0x81, 0x01, 0x04, 0x48];
    frame.extend_from_slice(&encode_nibbles(value));
    frame.push(0xFF);
    frame
}

struct Behaviour {
    focus: u16,
    autofocus: u8,
    held_recall: Option<u8>,
}

/// UDP camera answering like a VISCA-over-IP device
///
/// Inquiries get one data reply, commands an ACK and a completion. The
/// completion of one chosen memory recall can be held back until released.
pub struct MockCamera {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Vec<u8>>,
    history: Vec<Vec<u8>>,
    behaviour: Arc<Mutex<Behaviour>>,
    release: Arc<Notify>,
    task: JoinHandle<()>,
}

impl MockCamera {
    pub async fn start(focus: u16, autofocus: u8) -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, frames) = mpsc::unbounded_channel();
        let behaviour = Arc::new(Mutex::new(Behaviour {
            focus,
            autofocus,
            held_recall: None,
        }));
        let release = Arc::new(Notify::new());

        let task = tokio::spawn(serve(
            socket,
            tx,
            Arc::clone(&behaviour),
            Arc::clone(&release),
        ));

        Self {
            addr,
            frames,
            history: Vec::new(),
            behaviour,
            release,
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn set_focus(&self, focus: u16) {
        self.behaviour.lock().focus = focus;
    }

    /// Withholds the completion of the next recall of `position`
    pub fn hold_recall(&self, position: u8) {
        self.behaviour.lock().held_recall = Some(position);
    }

    pub fn release_recall(&self) {
        self.release.notify_one();
    }

    /// Waits until a frame matching `pred` arrives
    pub async fn wait_for<F>(&mut self, pred: F) -> Vec<u8>
    where
        F: Fn(&[u8]) -> bool,
    {
        loop {
            let frame = timeout(WAIT, self.frames.recv())
                .await
                .expect("timed out waiting for frame")
                .expect("mock camera stopped");
            self.history.push(frame.clone());
            if pred(&frame) {
                return frame;
            }
        }
    }

    /// Every frame received so far, in arrival order
    pub fn frames(&mut self) -> &[Vec<u8>] {
        while let Ok(frame) = self.frames.try_recv() {
            self.history.push(frame);
        }
        &self.history
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: Arc<UdpSocket>,
    frames: mpsc::UnboundedSender<Vec<u8>>,
    behaviour: Arc<Mutex<Behaviour>>,
    release: Arc<Notify>,
) {
    let mut buf = [0u8; 64];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let frame = buf[..len].to_vec();
        let _ = frames.send(frame.clone());

        if frame.get(1) == Some(&0x09) {
            let reply = inquiry_reply(&frame, &behaviour.lock());
            let _ = socket.send_to(&reply, from).await;
            continue;
        }

        let _ = socket.send_to(&ACK, from).await;

        let held = {
            let mut behaviour = behaviour.lock();
            match behaviour.held_recall {
                Some(position) if is_memory_recall(&frame, position) => {
                    behaviour.held_recall = None;
                    true
                }
                _ => false,
            }
        };

        if held {
            let socket = Arc::clone(&socket);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                release.notified().await;
                let _ = socket.send_to(&COMPLETION, from).await;
            });
        } else {
            let _ = socket.send_to(&COMPLETION, from).await;
        }
    }
}

fn inquiry_reply(frame: &[u8], behaviour: &Behaviour) -> Vec<u8> {
    let value_reply = |value: u16| {
        let mut reply = vec![0x90, 0x50];
        reply.extend_from_slice(&encode_nibbles(value));
        reply.push(0xFF);
        reply
    };

    match frame.get(3) {
        Some(0x48) => value_reply(behaviour.focus),
        Some(0x47) => value_reply(0),
        Some(0x38) => vec![0x90, 0x50, behaviour.autofocus, 0xFF],
        _ => vec![0x90, 0x50, 0x02, 0xFF],
    }
}

/// TCP tally source accepting monitor connections
pub struct MockTallySource {
    listener: TcpListener,
}

impl MockTallySource {
    pub async fn start() -> Self {
        Self {
            listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
        }
    }

    /// Listens on a port the monitor is already retrying
    pub async fn bind(port: u16) -> Self {
        Self {
            listener: TcpListener::bind(("127.0.0.1", port)).await.unwrap(),
        }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Accepts the next monitor connection and reads its handshake
    pub async fn accept(&self, camera_count: usize) -> TallyPeer {
        let (mut stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for monitor")
            .unwrap();

        let mut handshake = vec![0u8; 2 + camera_count];
        timeout(WAIT, stream.read_exact(&mut handshake))
            .await
            .expect("timed out waiting for handshake")
            .unwrap();

        TallyPeer { stream, handshake }
    }
}

pub struct TallyPeer {
    stream: TcpStream,
    pub handshake: Vec<u8>,
}

impl TallyPeer {
    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn read_frame(&mut self) -> [u8; 2] {
        let mut frame = [0u8; 2];
        timeout(WAIT, self.stream.read_exact(&mut frame))
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        frame
    }

    /// True once the monitor has closed its side
    pub async fn closed(&mut self) -> bool {
        let mut buf = [0u8; 16];
        loop {
            match timeout(WAIT, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) | Ok(Err(_)) => return true,
                Ok(Ok(_)) => continue,
                Err(_) => return false,
            }
        }
    }
}

/// Collects tally changes reported to a listener
pub fn change_recorder() -> (
    Arc<dyn ptz_tally_control::TallyListener>,
    mpsc::UnboundedReceiver<ptz_tally_control::TallyChange>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener: Arc<dyn ptz_tally_control::TallyListener> =
        Arc::new(move |change: ptz_tally_control::TallyChange| {
            let _ = tx.send(change);
        });
    (listener, rx)
}
