//! Interactive PTY shell channel, one dedicated OS thread per shell:
//! request_pty → shell → a `std::thread::spawn` loop alternating
//! non-blocking reads with an `mpsc` command drain.

use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tabmux_core::TabId;
use tokio::sync::mpsc;

use crate::transport::SshTransport;

pub enum ShellCommand {
    Input(Vec<u8>),
    Resize { cols: u32, rows: u32 },
    Close,
}

#[derive(Debug, Clone)]
pub enum ShellEvent {
    Output { tab_id: TabId, bytes: Vec<u8> },
    Closed { tab_id: TabId, reason: String },
}

pub struct ShellHandle {
    sender: mpsc::UnboundedSender<ShellCommand>,
    _thread: std::thread::JoinHandle<()>,
}

impl ShellHandle {
    pub fn send_input(&self, data: Vec<u8>) -> Result<(), tabmux_core::CoreError> {
        self.sender
            .send(ShellCommand::Input(data))
            .map_err(|_| tabmux_core::CoreError::SessionClosed { tab_id: String::new() })
    }

    pub fn resize(&self, cols: u32, rows: u32) -> Result<(), tabmux_core::CoreError> {
        self.sender
            .send(ShellCommand::Resize { cols, rows })
            .map_err(|_| tabmux_core::CoreError::SessionClosed { tab_id: String::new() })
    }

    pub fn close(&self) {
        let _ = self.sender.send(ShellCommand::Close);
    }
}

/// Open an interactive shell over `transport`'s session and spawn the
/// reader/writer thread. `events` receives `ShellEvent`s; the caller
/// forwards them onto the Event Bus.
pub fn open_shell(
    tab_id: TabId,
    transport: std::sync::Arc<SshTransport>,
    cols: u32,
    rows: u32,
    events: std_mpsc::Sender<ShellEvent>,
) -> Result<ShellHandle, tabmux_core::CoreError> {
    let mut session = transport
        .session
        .lock()
        .expect("ssh session mutex poisoned")
        .clone();

    let mut channel = session.channel_session().map_err(|e| tabmux_core::CoreError::SftpOpen {
        tab_id: tab_id.clone(),
        source: Box::new(e),
    })?;
    channel
        .request_pty("xterm", None, Some((cols, rows, 0, 0)))
        .map_err(|e| tabmux_core::CoreError::SftpOpen { tab_id: tab_id.clone(), source: Box::new(e) })?;
    channel
        .shell()
        .map_err(|e| tabmux_core::CoreError::SftpOpen { tab_id: tab_id.clone(), source: Box::new(e) })?;
    session.set_blocking(false);

    let (tx, rx) = mpsc::unbounded_channel::<ShellCommand>();
    let mut rx = rx;
    let tab_for_thread = tab_id.clone();

    let thread = std::thread::spawn(move || {
        let mut buffer = [0u8; 16384];
        let mut running = true;
        let mut idle_count: u32 = 0;
        const MIN_SLEEP_MS: u64 = 1;
        const MAX_SLEEP_MS: u64 = 10;
        const IDLE_THRESHOLD: u32 = 10;
        let mut close_reason = "eof".to_string();

        while running {
            while let Ok(cmd) = rx.try_recv() {
                match cmd {
                    ShellCommand::Input(data) => {
                        if let Err(e) = channel.write_all(&data) {
                            close_reason = e.to_string();
                            running = false;
                            break;
                        }
                        let _ = channel.flush();
                        idle_count = 0;
                    }
                    ShellCommand::Resize { cols, rows } => {
                        let _ = channel.request_pty_size(cols, rows, None, None);
                    }
                    ShellCommand::Close => {
                        let _ = channel.close();
                        let _ = channel.wait_close();
                        close_reason = "closed".to_string();
                        running = false;
                    }
                }
            }

            if !running {
                break;
            }

            match channel.read(&mut buffer) {
                Ok(0) => {
                    idle_count = idle_count.saturating_add(1);
                }
                Ok(n) => {
                    idle_count = 0;
                    let _ = events.send(ShellEvent::Output {
                        tab_id: tab_for_thread.clone(),
                        bytes: buffer[..n].to_vec(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    idle_count = idle_count.saturating_add(1);
                }
                Err(e) => {
                    close_reason = e.to_string();
                    running = false;
                }
            }

            if channel.eof() {
                running = false;
            }

            let sleep_ms = if idle_count > IDLE_THRESHOLD { MAX_SLEEP_MS } else { MIN_SLEEP_MS };
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }

        let _ = events.send(ShellEvent::Closed { tab_id: tab_for_thread, reason: close_reason });
    });

    Ok(ShellHandle { sender: tx, _thread: thread })
}
