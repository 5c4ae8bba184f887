//! Stream sockets driven by the reactor.

use super::ReactorHandle;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

const READ_CHUNK: usize = 4096;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Connection closed by peer")]
    Eof,

    #[error("Socket I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Socket already closed")]
    Closed,
}

/// Completion callback for one write.
pub type WriteCallback = Box<dyn FnOnce(Result<(), SocketError>)>;

struct WriteOp {
    data: Vec<u8>,
    on_done: Option<WriteCallback>,
}

/// A connected stream.
///
/// Writes are queued and performed in order by a writer task; reads are
/// delivered chunk by chunk once [`start_read`](Self::start_read) is
/// called. Dropping the socket stops reading, flushes queued writes and
/// shuts the write side down.
pub struct Socket {
    reactor: ReactorHandle,
    peer: Option<SocketAddr>,
    reader: Option<OwnedReadHalf>,
    read_task: Option<JoinHandle<()>>,
    writes: Option<mpsc::UnboundedSender<WriteOp>>,
}

impl Socket {
    pub(super) fn new(reactor: ReactorHandle, stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatch = reactor.dispatch();
        reactor.spawn_local(write_loop(writer, rx, dispatch));
        Self {
            reactor,
            peer,
            reader: Some(reader),
            read_task: None,
            writes: Some(tx),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Deliver incoming bytes to `on_read`.
    ///
    /// Ends with one `Err` (`Eof` on orderly close). Reading can be started
    /// once per socket.
    pub fn start_read(
        &mut self,
        mut on_read: impl FnMut(Result<&[u8], SocketError>) + 'static,
    ) -> Result<(), SocketError> {
        let mut reader = self.reader.take().ok_or(SocketError::Closed)?;
        let dispatch = self.reactor.dispatch();
        self.read_task = Some(self.reactor.spawn_local(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => {
                        debug!("Socket reached end of stream");
                        dispatch.run(|| on_read(Err(SocketError::Eof)));
                        return;
                    }
                    Ok(n) => {
                        trace!("Socket read {} bytes", n);
                        dispatch.run(|| on_read(Ok(&buf[..n])));
                    }
                    Err(e) => {
                        warn!("Socket read failed: {}", e);
                        dispatch.run(|| on_read(Err(SocketError::Io(e))));
                        return;
                    }
                }
            }
        }));
        Ok(())
    }

    pub fn stop_read(&mut self) {
        if let Some(task) = self.read_task.take() {
            task.abort();
        }
    }

    /// Queue `data`; `on_done` runs once it was written or failed.
    pub fn write(&self, data: impl Into<Vec<u8>>, on_done: Option<WriteCallback>) {
        let op = WriteOp {
            data: data.into(),
            on_done,
        };
        let rejected = match &self.writes {
            Some(tx) => tx.send(op).err().map(|e| e.0),
            None => Some(op),
        };
        if let Some(op) = rejected
            && let Some(on_done) = op.on_done
        {
            self.reactor.defer(move || on_done(Err(SocketError::Closed)));
        }
    }

    /// Stop reading and close the write side after queued writes drain.
    pub fn close(&mut self) {
        self.stop_read();
        self.reader = None;
        self.writes = None;
    }

    pub fn is_open(&self) -> bool {
        self.writes.is_some()
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    dispatch: std::rc::Rc<super::Dispatch>,
) {
    while let Some(op) = rx.recv().await {
        let result = writer.write_all(&op.data).await;
        let failed = result.is_err();
        if let Some(on_done) = op.on_done {
            let result = result.map_err(SocketError::Io);
            dispatch.run(|| on_done(result));
        } else if let Err(e) = result {
            warn!("Socket write failed: {}", e);
        }
        if failed {
            // Fail everything still queued.
            rx.close();
            while let Some(op) = rx.recv().await {
                if let Some(on_done) = op.on_done {
                    dispatch.run(|| on_done(Err(SocketError::Closed)));
                }
            }
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!("Socket shutdown: {}", e);
    }
}
