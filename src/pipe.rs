//! 파일 파이프
//!
//! 디스크 I/O와 네트워크 I/O를 겹치기 위한 더블 버퍼 청크 채널.
//!
//! - 송신측 [`ChunkReader`]: 백그라운드 태스크가 원본을 청크 단위로 읽어 넘겨준다.
//!   시퀀스 번호는 읽은 순서로만 정해진다 (`청크 인덱스 × 청크당 패킷 수 + 오프셋`).
//! - 수신측 [`ChunkWriter`]: 연속된 페이로드를 청크에 모았다가 가득 차면 I/O
//!   태스크로 넘기고, 마지막에 남은 부분 청크를 쓴 뒤 싱크를 닫는다.
//!
//! 빈 청크와 채워진 청크는 각각 용량이 버퍼 수인 채널로 오가므로, 읽기 태스크는
//! 빈 청크가 없으면 기다리고 파이프라인은 채워진 청크가 없으면 기다린다.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{Error, Result};

/// 원본에서 읽은 청크
#[derive(Debug)]
pub struct Chunk {
    /// 읽은 순서 (0부터)
    pub index: u64,
    pub data: BytesMut,
}

/// 송신측 청크 리더
pub struct ChunkReader {
    filled_rx: mpsc::Receiver<Result<Chunk>>,
    empty_tx: mpsc::Sender<BytesMut>,
    current: Option<Chunk>,
    /// 현재 청크 안의 패킷 오프셋
    cursor: usize,
    body_size: usize,
    packets_per_chunk: usize,
    finished: bool,
    task: JoinHandle<()>,
}

impl ChunkReader {
    /// 읽기 태스크 시작. 원본에서 최대 `limit` 바이트까지만 읽는다.
    pub fn spawn<R>(
        source: R,
        limit: u64,
        body_size: usize,
        packets_per_chunk: usize,
        buffers: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let chunk_bytes = body_size * packets_per_chunk;
        let (filled_tx, filled_rx) = mpsc::channel(buffers);
        let (empty_tx, empty_rx) = mpsc::channel(buffers);
        for _ in 0..buffers {
            // 채널 용량과 버퍼 수가 같으므로 실패하지 않는다
            let _ = empty_tx.try_send(BytesMut::with_capacity(chunk_bytes));
        }

        let task = tokio::spawn(read_loop(
            source.take(limit),
            chunk_bytes,
            empty_rx,
            filled_tx,
        ));

        Self {
            filled_rx,
            empty_tx,
            current: None,
            cursor: 0,
            body_size,
            packets_per_chunk,
            finished: false,
            task,
        }
    }

    /// 기다리지 않고 다음 청크를 가져와 본다. 보낼 페이로드가 있으면 `true`.
    pub fn try_fill(&mut self) -> Result<bool> {
        if self.current.is_some() {
            return Ok(true);
        }
        if self.finished {
            return Ok(false);
        }
        match self.filled_rx.try_recv() {
            Ok(chunk) => {
                self.install(chunk?);
                Ok(true)
            }
            Err(TryRecvError::Empty) => Ok(false),
            Err(TryRecvError::Disconnected) => {
                self.finished = true;
                Ok(false)
            }
        }
    }

    /// 채워진 청크가 올 때까지 (또는 원본이 끝날 때까지) 기다린다.
    pub async fn wait_ready(&mut self) -> Result<()> {
        if self.current.is_some() || self.finished {
            return Ok(());
        }
        match self.filled_rx.recv().await {
            Some(chunk) => self.install(chunk?),
            None => self.finished = true,
        }
        Ok(())
    }

    fn install(&mut self, chunk: Chunk) {
        trace!("청크 {} 준비: {} bytes", chunk.index, chunk.data.len());
        self.current = Some(chunk);
        self.cursor = 0;
    }

    /// 다음으로 보낼 (시퀀스 번호, 페이로드)
    pub fn peek(&self) -> Option<(u64, &[u8])> {
        let chunk = self.current.as_ref()?;
        let start = self.cursor * self.body_size;
        if start >= chunk.data.len() {
            return None;
        }
        let end = (start + self.body_size).min(chunk.data.len());
        let seq = chunk.index * self.packets_per_chunk as u64 + self.cursor as u64;
        Some((seq, &chunk.data[start..end]))
    }

    /// `peek`한 페이로드를 소비한다. 청크를 다 쓰면 읽기 태스크에 돌려준다.
    pub fn advance(&mut self) {
        let Some(chunk) = self.current.as_ref() else {
            return;
        };
        self.cursor += 1;
        if self.cursor * self.body_size >= chunk.data.len() {
            if let Some(mut done) = self.current.take() {
                done.data.clear();
                let _ = self.empty_tx.try_send(done.data);
            }
            self.cursor = 0;
        }
    }

    /// 원본을 끝까지 읽었고 남은 청크도 없음
    pub fn is_finished(&self) -> bool {
        self.finished && self.current.is_none()
    }

    /// 읽기 태스크 중단
    pub fn cancel(&mut self) {
        self.task.abort();
    }
}

impl Drop for ChunkReader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn read_loop<R>(
    mut source: R,
    chunk_bytes: usize,
    mut empty_rx: mpsc::Receiver<BytesMut>,
    filled_tx: mpsc::Sender<Result<Chunk>>,
) where
    R: AsyncRead + Unpin,
{
    let mut index = 0u64;
    while let Some(mut buf) = empty_rx.recv().await {
        match fill(&mut source, &mut buf, chunk_bytes).await {
            Ok(0) => break,
            Ok(n) => {
                let last = n < chunk_bytes;
                if filled_tx.send(Ok(Chunk { index, data: buf })).await.is_err() {
                    break;
                }
                index += 1;
                if last {
                    break;
                }
            }
            Err(e) => {
                let _ = filled_tx.send(Err(e)).await;
                break;
            }
        }
    }
    debug!("원본 읽기 종료: {} chunks", index);
}

/// 청크가 가득 차거나 원본이 끝날 때까지 읽는다.
async fn fill<R>(source: &mut R, buf: &mut BytesMut, chunk_bytes: usize) -> Result<usize>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.resize(chunk_bytes, 0);
    let mut filled = 0;
    while filled < chunk_bytes {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(filled)
}

/// 수신측 청크 라이터
pub struct ChunkWriter {
    current: BytesMut,
    packets: usize,
    packets_per_chunk: usize,
    filled_tx: Option<mpsc::Sender<BytesMut>>,
    empty_rx: mpsc::Receiver<BytesMut>,
    task: Option<JoinHandle<Result<u64>>>,
}

impl ChunkWriter {
    /// 쓰기 태스크 시작
    pub fn spawn<W>(sink: W, body_size: usize, packets_per_chunk: usize, buffers: usize) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let chunk_bytes = body_size * packets_per_chunk;
        let buffers = buffers.max(1);
        let (filled_tx, filled_rx) = mpsc::channel(buffers);
        let (empty_tx, empty_rx) = mpsc::channel(buffers);
        // 하나는 `current`로 쓰고 나머지는 빈 청크 채널에 둔다
        for _ in 1..buffers {
            let _ = empty_tx.try_send(BytesMut::with_capacity(chunk_bytes));
        }

        let task = tokio::spawn(write_loop(sink, filled_rx, empty_tx));

        Self {
            current: BytesMut::with_capacity(chunk_bytes),
            packets: 0,
            packets_per_chunk,
            filled_tx: Some(filled_tx),
            empty_rx,
            task: Some(task),
        }
    }

    /// 페이로드 하나를 덧붙인다. 청크가 가득 차면 I/O 태스크로 넘긴다.
    pub async fn push(&mut self, payload: &[u8]) -> Result<()> {
        self.current.extend_from_slice(payload);
        self.packets += 1;
        if self.packets >= self.packets_per_chunk {
            self.flush_chunk().await?;
        }
        Ok(())
    }

    async fn flush_chunk(&mut self) -> Result<()> {
        let full = std::mem::take(&mut self.current);
        self.packets = 0;
        self.send(full).await?;

        self.current = match self.empty_rx.recv().await {
            Some(buf) => buf,
            None => return Err(self.io_failure().await),
        };
        Ok(())
    }

    async fn send(&mut self, chunk: BytesMut) -> Result<()> {
        let Some(tx) = self.filled_tx.as_ref() else {
            return Err(Error::ChannelClosed);
        };
        if tx.send(chunk).await.is_err() {
            return Err(self.io_failure().await);
        }
        Ok(())
    }

    /// I/O 태스크가 먼저 끝났을 때 실제 에러를 꺼낸다.
    async fn io_failure(&mut self) -> Error {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(_)) => Error::ChannelClosed,
                Err(e) => e.into(),
            },
            None => Error::ChannelClosed,
        }
    }

    /// 남은 부분 청크를 쓰고 싱크를 닫는다. 쓴 총 바이트 수를 돌려준다.
    pub async fn finish(mut self) -> Result<u64> {
        if !self.current.is_empty() {
            let last = std::mem::take(&mut self.current);
            self.send(last).await?;
        }
        self.filled_tx = None;

        match self.task.take() {
            Some(task) => task.await?,
            None => Err(Error::ChannelClosed),
        }
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn write_loop<W>(
    mut sink: W,
    mut filled_rx: mpsc::Receiver<BytesMut>,
    empty_tx: mpsc::Sender<BytesMut>,
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(mut chunk) = filled_rx.recv().await {
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
        trace!("청크 기록: {} bytes (누적 {})", chunk.len(), written);

        chunk.clear();
        let _ = empty_tx.send(chunk).await;
    }

    sink.flush().await?;
    sink.shutdown().await?;
    debug!("싱크 닫힘: {} bytes", written);
    Ok(written)
}
