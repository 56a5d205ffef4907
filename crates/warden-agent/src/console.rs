use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    sync::{Mutex, mpsc},
    task::JoinHandle,
};

/// Raw output lines waiting for the processor. The producers block when it is full,
/// which only ever slows the pipe readers, never the child itself.
pub const LOG_QUEUE_CAPACITY: usize = 10_000;

pub type ConsoleWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type ConsoleReader = Box<dyn AsyncRead + Send + Unpin>;

/// Receives every non-empty decoded output line of the server.
pub trait LineHandler: Send + Sync + 'static {
    fn handle_line(&self, line: &str);
}

/// Write side of the server console.
///
/// Cloned into notification timers; the supervisor attaches the stdin of each new
/// process and detaches it once the process is gone, so late writers just log.
#[derive(Clone, Default)]
pub struct Console {
    stdin: Arc<Mutex<Option<ConsoleWriter>>>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, stdin: ConsoleWriter) {
        *self.stdin.lock().await = Some(stdin);
    }

    pub async fn detach(&self) -> bool {
        self.stdin.lock().await.take().is_some()
    }

    #[cfg(test)]
    pub async fn is_attached(&self) -> bool {
        self.stdin.lock().await.is_some()
    }

    /// Writes `command` plus a newline and flushes.
    ///
    /// Never fails: a missing or broken stdin almost always means the process has
    /// already exited, which the supervisor notices on its own.
    pub async fn send(&self, command: &str) {
        let command = command.trim_end_matches(['\r', '\n']);
        let mut guard = self.stdin.lock().await;
        let Some(stdin) = guard.as_mut() else {
            tracing::warn!(command, "server process not running; command dropped");
            return;
        };

        tracing::info!(target: "console", "{command}");
        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        if let Err(err) = stdin.write_all(line.as_bytes()).await {
            tracing::error!(error = %err, command, "failed to write to server stdin");
            return;
        }
        if let Err(err) = stdin.flush().await {
            tracing::error!(error = %err, command, "failed to flush server stdin");
        }
    }
}

/// Pumps the child's output streams through a bounded queue into a [`LineHandler`].
///
/// One producer task per stream reads raw lines; a single processor task decodes and
/// dispatches them. The queue closes when every producer has hit end-of-stream, and
/// the processor drains whatever is still queued before it exits.
pub struct ConsoleBridge {
    processor: JoinHandle<u64>,
}

impl ConsoleBridge {
    pub fn spawn(streams: Vec<(&'static str, ConsoleReader)>, handler: Arc<dyn LineHandler>) -> Self {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(LOG_QUEUE_CAPACITY);
        for (name, reader) in streams {
            tokio::spawn(pump(name, reader, tx.clone()));
        }
        drop(tx);

        let processor = tokio::spawn(process(rx, handler));
        Self { processor }
    }

    /// Waits for the processor to drain the queue. Returns the number of lines
    /// dispatched, or `None` if the output did not close within `timeout`.
    pub async fn finish(self, timeout: Duration) -> Option<u64> {
        match tokio::time::timeout(timeout, self.processor).await {
            Ok(Ok(count)) => Some(count),
            Ok(Err(err)) => {
                tracing::error!(error = %err, "console processor task failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "server output still open; leaving console processor running"
                );
                None
            }
        }
    }
}

async fn pump(stream: &'static str, reader: ConsoleReader, tx: mpsc::Sender<Vec<u8>>) {
    let mut reader = BufReader::new(reader);
    loop {
        let mut raw = Vec::new();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(raw).await.is_err() {
                    tracing::error!(stream, "console queue closed; output reader exiting");
                    break;
                }
            }
            Err(err) => {
                tracing::error!(stream, error = %err, "failed to read server output");
                break;
            }
        }
    }
    tracing::warn!(stream, "server output reader finished");
}

async fn process(mut rx: mpsc::Receiver<Vec<u8>>, handler: Arc<dyn LineHandler>) -> u64 {
    let mut dispatched = 0u64;
    while let Some(raw) = rx.recv().await {
        let Some(line) = decode_line(&raw) else {
            continue;
        };
        tracing::info!(target: "server", "{line}");
        handler.handle_line(&line);
        dispatched += 1;
    }
    dispatched
}

/// Lossy UTF-8 decode with surrounding whitespace stripped; `None` for blank lines.
pub fn decode_line(raw: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(raw);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
