//! Background reader keeping one buffer ahead of the consumer.
//!
//! Each stream gets a dedicated producer thread so file reads and
//! decoding never block the async pipeline; the handoff is a bounded
//! channel of depth one, so the producer stays at most one packet ahead
//! and stops as soon as the consumer goes away.

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::Result;
use crate::mixer::{MediaStream, StreamPacket};

pub struct PacketSource {
    rx: mpsc::Receiver<Result<StreamPacket>>,
}

impl PacketSource {
    /// Spawns the producer thread. The stream must already be seeked.
    pub fn spawn(mut stream: Box<dyn MediaStream + 'static>) -> PacketSource {
        let (tx, rx) = mpsc::channel(1);
        std::thread::spawn(move || {
            loop {
                match stream.read_next() {
                    Ok(Some(packet)) => {
                        if tx.blocking_send(Ok(packet)).is_err() {
                            trace!("[source] consumer gone, stopping producer");
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.blocking_send(Err(e));
                        break;
                    }
                }
            }
        });
        PacketSource { rx }
    }

    /// Next packet; `None` once the stream is exhausted.
    pub async fn recv(&mut self) -> Result<Option<StreamPacket>> {
        match self.rx.recv().await {
            Some(Ok(packet)) => Ok(Some(packet)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Scripted {
        packets: Vec<StreamPacket>,
        fail_after: Option<usize>,
        sent: usize,
    }

    impl MediaStream for Scripted {
        fn seek(&mut self, _window_start_ms: i64) -> Result<()> {
            Ok(())
        }

        fn offset_ms(&self) -> i64 {
            0
        }

        fn read_next(&mut self) -> Result<Option<StreamPacket>> {
            if let Some(n) = self.fail_after {
                if self.sent == n {
                    return Err(crate::error::ExtractError::InvalidRequest(
                        "scripted failure".into(),
                    ));
                }
            }
            if self.sent >= self.packets.len() {
                return Ok(None);
            }
            let packet = self.packets[self.sent].clone();
            self.sent += 1;
            Ok(Some(packet))
        }
    }

    fn packet(ts: i64) -> StreamPacket {
        StreamPacket {
            timestamp_ns: ts,
            payload: Bytes::from_static(b"x"),
            marker: false,
            track: 0,
        }
    }

    #[tokio::test]
    async fn delivers_in_order_then_closes() {
        let stream = Scripted {
            packets: vec![packet(0), packet(10), packet(20)],
            fail_after: None,
            sent: 0,
        };
        let mut source = PacketSource::spawn(Box::new(stream));
        assert_eq!(source.recv().await.unwrap().unwrap().timestamp_ns, 0);
        assert_eq!(source.recv().await.unwrap().unwrap().timestamp_ns, 10);
        assert_eq!(source.recv().await.unwrap().unwrap().timestamp_ns, 20);
        assert!(source.recv().await.unwrap().is_none());
        assert!(source.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn propagates_producer_errors() {
        let stream = Scripted {
            packets: vec![packet(0)],
            fail_after: Some(1),
            sent: 0,
        };
        let mut source = PacketSource::spawn(Box::new(stream));
        assert!(source.recv().await.unwrap().is_some());
        assert!(source.recv().await.is_err());
    }
}
