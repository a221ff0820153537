// src/wire/transport.rs
// =============================================================================
// Length-prefixed framing over TCP.
//
// Every frame is a 4-byte big-endian payload length followed by the payload.
// Each frame carries exactly one event (see event.rs).
//
// Two long-running pieces live here:
// - receive_loop: owns the read half of one inbound socket and hands every
//   decoded event to a callback until EOF or the first bad frame.
// - PeerLink: one sender task per peer. Events are queued on a channel and the
//   task writes them one frame at a time, so frames on the same socket never
//   interleave.
// =============================================================================

use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};

use super::{Event, WireError};

/// Frames larger than this are treated as corrupt.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);

    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly between
/// frames. A connection closed in the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

pub async fn write_event<W>(writer: &mut W, event: &Event) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &event.encode()).await
}

pub async fn read_event<R>(reader: &mut R) -> Result<Option<Event>, WireError>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(Event::decode(&payload)?)),
        None => Ok(None),
    }
}

// Reads events from one connection and hands them to `deliver` until the
// connection closes, a frame fails to decode, or `deliver` returns false.
//
// Errors end this loop only. They never reach the caller.
pub async fn receive_loop<R, F>(mut reader: R, remote: String, mut deliver: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(Event) -> bool,
{
    loop {
        match read_event(&mut reader).await {
            Ok(Some(event)) => {
                debug!("Received {} from {}", event, remote);
                if !deliver(event) {
                    debug!("Inbox closed, dropping connection from {}", remote);
                    return;
                }
            }
            Ok(None) => {
                info!("Connection from {} closed", remote);
                return;
            }
            Err(e) => {
                warn!("Closing connection from {}: {}", remote, e);
                return;
            }
        }
    }
}

// What the sender task of a peer is asked to do, in order
#[derive(Debug)]
enum Outbound {
    Event(Event),
    // Answered once everything queued before it has been written or dropped
    Flush(oneshot::Sender<()>),
}

/// The outbound side of one peer connection.
///
/// Cloning a `PeerLink` shares the same sender task.
#[derive(Debug, Clone)]
pub struct PeerLink {
    addr: String,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PeerLink {
    /// Spawns the sender task for `addr` (a `host:port` string).
    ///
    /// The task starts connecting right away and retries up to
    /// `connect_attempts` times, so peers may start in any order.
    pub fn spawn(addr: String, connect_attempts: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(sender_loop(addr.clone(), connect_attempts, rx));
        PeerLink { addr, tx }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Queues an event for this peer. Returns false if the sender task is gone.
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    /// Waits until every event queued so far has been written to the socket,
    /// or given up on.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(Outbound::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

async fn sender_loop(addr: String, connect_attempts: u32, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut stream = connect_with_retry(&addr, connect_attempts).await;

    while let Some(outbound) = rx.recv().await {
        let event = match outbound {
            Outbound::Event(event) => event,
            Outbound::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        if stream.is_none() {
            stream = connect_with_retry(&addr, 1).await;
        }

        let Some(socket) = stream.as_mut() else {
            warn!("Peer {} unreachable, dropping {}", addr, event);
            continue;
        };

        match write_event(socket, &event).await {
            Ok(()) => debug!("Sent {} to {}", event, addr),
            Err(e) => {
                warn!("Failed to send {} to {}: {}", event, addr, e);
                stream = None;
            }
        }
    }

    debug!("Sender for {} stopped", addr);
}

async fn connect_with_retry(addr: &str, attempts: u32) -> Option<TcpStream> {
    for attempt in 1..=attempts.max(1) {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                info!("Connected to peer {}", addr);
                return Some(stream);
            }
            Err(e) => {
                debug!("Connect to {} failed (attempt {}/{}): {}", addr, attempt, attempts, e);
                if attempt < attempts {
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }

    warn!("Could not connect to peer {}", addr);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_frame_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, b"hello").await.unwrap();
        let frame = read_frame(&mut server).await.unwrap();

        assert_eq!(frame, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_length_prefix_is_big_endian() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        write_frame(&mut client, &[7u8; 3]).await.unwrap();
        drop(client);

        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw, vec![0, 0, 0, 3, 7, 7, 7]);
    }

    #[tokio::test]
    async fn test_clean_eof_between_frames() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        assert_eq!(read_frame(&mut server).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0, 0, 0, 10, 1, 2]).await.unwrap();
        drop(client);

        assert!(matches!(read_frame(&mut server).await, Err(WireError::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(WireError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_stops_on_bad_frame() {
        let (mut client, server) = tokio::io::duplex(1024);

        let good = Event::NodeFinished {
            domain: "a.org".to_string(),
        };
        write_event(&mut client, &good).await.unwrap();
        // Unknown tag 42
        write_frame(&mut client, &[0, 0, 0, 42]).await.unwrap();
        write_event(&mut client, &good).await.unwrap();

        let mut received = Vec::new();
        receive_loop(server, "test".to_string(), |event| {
            received.push(event);
            true
        })
        .await;

        // Only the event before the bad frame is delivered
        assert_eq!(received, vec![good]);
    }

    #[tokio::test]
    async fn test_peer_link_delivers_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let link = PeerLink::spawn(addr, 3);
        for i in 0..3 {
            assert!(link.send(Event::TaskComplete {
                domain: format!("d{}", i)
            }));
        }

        let (mut socket, _) = listener.accept().await.unwrap();
        for i in 0..3 {
            let event = read_event(&mut socket).await.unwrap().unwrap();
            assert_eq!(
                event,
                Event::TaskComplete {
                    domain: format!("d{}", i)
                }
            );
        }
    }

    #[tokio::test]
    async fn test_flush_returns_when_peer_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let link = PeerLink::spawn(addr, 1);
        link.send(Event::NodeFinished {
            domain: "a.org".to_string(),
        });

        tokio::time::timeout(Duration::from_secs(10), link.flush())
            .await
            .unwrap();
    }
}
