use std::io::{self, BufRead, BufReader};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

const LINE_BUFFER: usize = 64;

/// Operator lines read on a dedicated blocking thread and handed to the
/// async side through a channel. `None` from [`ConsoleInput::next_line`]
/// means input ended.
pub struct ConsoleInput {
    lines: mpsc::Receiver<String>,
}

impl ConsoleInput {
    pub fn stdin() -> Self {
        Self::spawn(BufReader::new(io::stdin()))
    }

    /// Read `reader` line by line on its own thread. The thread is detached
    /// so a pending read never holds up process exit.
    pub fn spawn<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let spawned = thread::Builder::new()
            .name("console-input".into())
            .spawn(move || read_lines(reader, tx));
        if let Err(err) = spawned {
            warn!(target = "console", error = %err, "failed to start console reader");
        }
        Self { lines: rx }
    }

    /// Input fed by hand; dropping the sender ends it.
    pub fn channel() -> (mpsc::Sender<String>, Self) {
        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        (tx, Self { lines: rx })
    }

    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

fn read_lines<R: BufRead>(reader: R, tx: mpsc::Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(target = "console", error = %err, "console read failed");
                break;
            }
        }
    }
    debug!(target = "console", "console input ended");
}
