use std::collections::VecDeque;
use std::time::Duration;

use bluesense_core::protocol::{PACKET_SIZE, PacketBytes};
use tokio::sync::mpsc;

use super::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("timed out waiting for data from the link")]
    Timeout,
    #[error("link closed")]
    Closed,
}

/// Reassembles link chunks into the fixed-size reads the protocol needs.
///
/// Every read is bounded by `read_timeout` when one is set; bytes that
/// arrived before a timeout stay buffered for the next read.
pub struct ByteStream {
    rx: mpsc::Receiver<Chunk>,
    pending: VecDeque<u8>,
    read_timeout: Option<Duration>,
}

impl ByteStream {
    pub fn new(rx: mpsc::Receiver<Chunk>, read_timeout: Option<Duration>) -> Self {
        Self {
            rx,
            pending: VecDeque::with_capacity(PACKET_SIZE * 4),
            read_timeout,
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout
    }

    pub async fn read_byte(&mut self) -> Result<u8, StreamError> {
        let [byte] = self.read_exact::<1>().await?;
        Ok(byte)
    }

    pub async fn read_packet(&mut self) -> Result<PacketBytes, StreamError> {
        self.read_exact::<PACKET_SIZE>().await
    }

    async fn read_exact<const N: usize>(&mut self) -> Result<[u8; N], StreamError> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fill(N))
                .await
                .map_err(|_| StreamError::Timeout)??,
            None => self.fill(N).await?,
        }

        let mut out = [0u8; N];
        for (slot, byte) in out.iter_mut().zip(self.pending.drain(..N)) {
            *slot = byte;
        }
        Ok(out)
    }

    async fn fill(&mut self, needed: usize) -> Result<(), StreamError> {
        while self.pending.len() < needed {
            let chunk = self.rx.recv().await.ok_or(StreamError::Closed)?;
            self.pending.extend(chunk);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reassembles_packets_across_chunks() {
        let (tx, rx) = mpsc::channel(8);
        let mut stream = ByteStream::new(rx, None);

        tx.send(vec![1, 2, 3]).await.unwrap();
        tx.send((4..=12).collect()).await.unwrap();
        tx.send(vec![13, 14]).await.unwrap();
        drop(tx);

        let packet = stream.read_packet().await.unwrap();
        assert_eq!(packet, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(stream.read_byte().await.unwrap(), 13);
        assert_eq!(stream.read_byte().await.unwrap(), 14);
        assert_eq!(stream.read_byte().await, Err(StreamError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_partial_data() {
        let (tx, rx) = mpsc::channel(8);
        let mut stream = ByteStream::new(rx, Some(Duration::from_secs(15)));

        tx.send(vec![0xAA; PACKET_SIZE - 1]).await.unwrap();
        assert_eq!(stream.read_packet().await, Err(StreamError::Timeout));

        tx.send(vec![0xBB]).await.unwrap();
        let packet = stream.read_packet().await.unwrap();
        assert_eq!(packet[0], 0xAA);
        assert_eq!(packet[PACKET_SIZE - 1], 0xBB);
    }
}
