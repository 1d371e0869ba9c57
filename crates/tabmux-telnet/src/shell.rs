//! Telnet session reader/writer thread: parses incoming IAC sequences,
//! drives [`NegotiationManager`], and forwards plain data bytes as
//! [`ShellEvent::Output`] — the Telnet analogue of `tabmux-ssh::shell`, one
//! dedicated thread per session running an IAC state machine.

use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tabmux_core::TabId;
use tokio::sync::mpsc;

use crate::negotiation::NegotiationManager;
use crate::protocol::{self, DO, DONT, IAC, SB, SE, WILL, WONT};
use crate::transport::TelnetTransport;
use crate::types::TelnetOption;

pub enum ShellCommand {
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
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

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), tabmux_core::CoreError> {
        self.sender
            .send(ShellCommand::Resize { cols, rows })
            .map_err(|_| tabmux_core::CoreError::SessionClosed { tab_id: String::new() })
    }

    pub fn close(&self) {
        let _ = self.sender.send(ShellCommand::Close);
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ParseState {
    Data,
    SawIac,
    SawCommand(u8),
    AwaitingSubOption,
    SubData { option: u8, data: Vec<u8>, last_was_iac: bool },
}

pub fn open_shell(
    tab_id: TabId,
    transport: std::sync::Arc<TelnetTransport>,
    cols: u16,
    rows: u16,
    events: std_mpsc::Sender<ShellEvent>,
) -> Result<ShellHandle, tabmux_core::CoreError> {
    let stream = transport
        .take_stream()
        .ok_or_else(|| tabmux_core::CoreError::SessionClosed { tab_id: tab_id.clone() })?;

    let (tx, rx) = mpsc::unbounded_channel::<ShellCommand>();
    let mut rx = rx;
    let tab_for_thread = tab_id.clone();

    let thread = std::thread::spawn(move || {
        let mut stream: StdTcpStream = stream;
        let mut negotiation = NegotiationManager::new();
        negotiation.desire_local(TelnetOption::NAWS.code());
        negotiation.desire_local(TelnetOption::TerminalType.code());
        negotiation.accept_remote(TelnetOption::Echo.code());
        negotiation.accept_remote(TelnetOption::SuppressGoAhead.code());
        negotiation.accept_remote(TelnetOption::BinaryTransmission.code());

        let initial = negotiation.initial_negotiation();
        if !initial.is_empty() {
            let _ = stream.write_all(&initial);
        }
        let _ = stream.write_all(&protocol::build_naws(cols, rows));

        let mut parse_state = ParseState::Data;
        let mut pending_output = Vec::new();
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
                        let escaped = protocol::escape_iac(&data);
                        if let Err(e) = stream.write_all(&escaped) {
                            close_reason = e.to_string();
                            running = false;
                            break;
                        }
                        idle_count = 0;
                    }
                    ShellCommand::Resize { cols, rows } => {
                        let frame = protocol::build_naws(cols, rows);
                        let _ = stream.write_all(&frame);
                    }
                    ShellCommand::Close => {
                        let _ = stream.shutdown(std::net::Shutdown::Both);
                        close_reason = "closed".to_string();
                        running = false;
                    }
                }
            }

            if !running {
                break;
            }

            match stream.read(&mut buffer) {
                Ok(0) => {
                    close_reason = "eof".to_string();
                    running = false;
                }
                Ok(n) => {
                    idle_count = 0;
                    for &byte in &buffer[..n] {
                        if let Some(reply) =
                            feed_byte(&mut parse_state, byte, &mut pending_output, &mut negotiation)
                        {
                            let _ = stream.write_all(&reply);
                        }
                    }
                    if !pending_output.is_empty() {
                        let _ = events.send(ShellEvent::Output {
                            tab_id: tab_for_thread.clone(),
                            bytes: std::mem::take(&mut pending_output),
                        });
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    idle_count = idle_count.saturating_add(1);
                }
                Err(e) => {
                    close_reason = e.to_string();
                    running = false;
                }
            }

            let sleep_ms = if idle_count > IDLE_THRESHOLD { MAX_SLEEP_MS } else { MIN_SLEEP_MS };
            std::thread::sleep(Duration::from_millis(sleep_ms));
        }

        let _ = events.send(ShellEvent::Closed { tab_id: tab_for_thread, reason: close_reason });
    });

    Ok(ShellHandle { sender: tx, _thread: thread })
}

/// Advance the IAC parser by one byte. Plain data bytes are appended to
/// `output`; command/option sequences update `negotiation` and may return
/// a reply frame to write back immediately.
fn feed_byte(
    state: &mut ParseState,
    byte: u8,
    output: &mut Vec<u8>,
    negotiation: &mut NegotiationManager,
) -> Option<Vec<u8>> {
    match state {
        ParseState::Data => {
            if byte == IAC {
                *state = ParseState::SawIac;
                None
            } else {
                output.push(byte);
                None
            }
        }
        ParseState::SawIac => match byte {
            IAC => {
                output.push(IAC);
                *state = ParseState::Data;
                None
            }
            SB => {
                *state = ParseState::AwaitingSubOption;
                None
            }
            WILL | WONT | DO | DONT => {
                *state = ParseState::SawCommand(byte);
                None
            }
            _ => {
                *state = ParseState::Data;
                None
            }
        },
        ParseState::SawCommand(cmd) => {
            let cmd = *cmd;
            *state = ParseState::Data;
            let reply = match cmd {
                WILL => negotiation.receive_will(byte),
                WONT => negotiation.receive_wont(byte),
                DO => negotiation.receive_do(byte),
                DONT => negotiation.receive_dont(byte),
                _ => Vec::new(),
            };
            if !reply.is_empty() {
                return Some(reply);
            }
            None
        }
        ParseState::AwaitingSubOption => {
            *state = ParseState::SubData { option: byte, data: Vec::new(), last_was_iac: false };
            None
        }
        ParseState::SubData { option, data, last_was_iac } => {
            if *last_was_iac {
                if byte == SE {
                    let option = *option;
                    let finished = std::mem::take(data);
                    *state = ParseState::Data;
                    const TTYPE_SEND: u8 = 1;
                    if option == TelnetOption::TerminalType.code() && finished.first() == Some(&TTYPE_SEND) {
                        return Some(protocol::build_ttype_is("xterm-256color"));
                    }
                } else if byte == IAC {
                    data.push(IAC);
                    *last_was_iac = false;
                } else {
                    // malformed: IAC followed by neither SE nor IAC; drop back to data
                    *state = ParseState::Data;
                }
            } else if byte == IAC {
                *last_was_iac = true;
            } else {
                data.push(byte);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(bytes: &[u8]) -> (Vec<u8>, Vec<Vec<u8>>) {
        let mut state = ParseState::Data;
        let mut output = Vec::new();
        let mut replies = Vec::new();
        let mut negotiation = NegotiationManager::new();
        negotiation.accept_remote(TelnetOption::Echo.code());
        for &b in bytes {
            if let Some(reply) = feed_byte(&mut state, b, &mut output, &mut negotiation) {
                replies.push(reply);
            }
        }
        (output, replies)
    }

    #[test]
    fn plain_data_passes_through_untouched() {
        let (output, replies) = feed_all(b"hello\r\n");
        assert_eq!(output, b"hello\r\n");
        assert!(replies.is_empty());
    }

    #[test]
    fn escaped_iac_byte_becomes_single_0xff_in_output() {
        let (output, replies) = feed_all(&[b'a', IAC, IAC, b'b']);
        assert_eq!(output, vec![b'a', 0xFF, b'b']);
        assert!(replies.is_empty());
    }

    #[test]
    fn will_echo_triggers_do_reply_and_no_data_output() {
        let (output, replies) = feed_all(&[IAC, WILL, TelnetOption::Echo.code()]);
        assert!(output.is_empty());
        assert_eq!(replies, vec![vec![IAC, DO, TelnetOption::Echo.code()]]);
    }

    #[test]
    fn subnegotiation_is_consumed_without_leaking_into_output() {
        let mut bytes = vec![IAC, SB, TelnetOption::NAWS.code(), 0, 80, 0, 24, IAC, SE];
        bytes.extend_from_slice(b"after");
        let (output, _replies) = feed_all(&bytes);
        assert_eq!(output, b"after");
    }
}
