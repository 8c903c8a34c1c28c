//! Operator console: stdin lines, delivered to the dispatcher over a channel.

use std::future::poll_fn;
use std::io::BufRead;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Kill,
}

/// Only `kill` is recognised; case and surrounding whitespace are ignored.
pub fn parse_command(line: &str) -> Option<Command> {
    if line.trim().eq_ignore_ascii_case("kill") {
        Some(Command::Kill)
    } else {
        None
    }
}

/// Sending side; anything that can produce operator lines (stdin, signals, tests).
#[derive(Debug, Clone)]
pub struct ConsoleHandle(mpsc::UnboundedSender<String>);

impl ConsoleHandle {
    /// Returns false once the console is gone.
    pub fn send_line(&self, line: impl Into<String>) -> bool {
        self.0.send(line.into()).is_ok()
    }
}

/// Receiving side, owned by the node. After every handle is dropped (stdin EOF)
/// it simply never becomes ready again.
#[derive(Debug)]
pub struct Console {
    rx: mpsc::UnboundedReceiver<String>,
    eof: bool,
}

impl Console {
    pub fn channel() -> (ConsoleHandle, Console) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConsoleHandle(tx), Console { rx, eof: false })
    }

    pub fn poll_line(&mut self, cx: &mut Context<'_>) -> Poll<String> {
        if self.eof {
            return Poll::Pending;
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(line)) => Poll::Ready(line),
            Poll::Ready(None) => {
                debug!("console closed");
                self.eof = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }

    pub async fn next_line(&mut self) -> String {
        poll_fn(|cx| self.poll_line(cx)).await
    }

    /// Wait until the operator asks for shutdown.
    pub async fn wait_for_kill(&mut self) {
        loop {
            let line = self.next_line().await;
            if parse_command(&line) == Some(Command::Kill) {
                return;
            }
        }
    }
}

/// Feed stdin lines into `handle` from a dedicated thread (not a runtime
/// blocking task, which would hold up runtime shutdown).
pub fn spawn_stdin_reader(handle: ConsoleHandle) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("sensnet-console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if !handle.send_line(line) {
                    break;
                }
            }
        })?;
    Ok(())
}
