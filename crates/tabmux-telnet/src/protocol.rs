//! Byte-level Telnet frame building (RFC 854/855).

use crate::types::TelnetOption;

pub const IAC: u8 = 255;
pub const SE: u8 = 240;
pub const SB: u8 = 250;
pub const WILL: u8 = 251;
pub const WONT: u8 = 252;
pub const DO: u8 = 253;
pub const DONT: u8 = 254;

pub const CR: u8 = 13;
pub const LF: u8 = 10;
pub const NUL: u8 = 0;

const SN_IS: u8 = 0;

pub fn build_negotiation(cmd: u8, option: u8) -> Vec<u8> {
    vec![IAC, cmd, option]
}

pub fn build_subnegotiation(option: u8, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + data.len());
    buf.push(IAC);
    buf.push(SB);
    buf.push(option);
    for &b in data {
        buf.push(b);
        if b == IAC {
            buf.push(IAC);
        }
    }
    buf.push(IAC);
    buf.push(SE);
    buf
}

pub fn build_naws(cols: u16, rows: u16) -> Vec<u8> {
    let data = [(cols >> 8) as u8, (cols & 0xFF) as u8, (rows >> 8) as u8, (rows & 0xFF) as u8];
    build_subnegotiation(TelnetOption::NAWS.code(), &data)
}

pub fn build_ttype_is(terminal_type: &str) -> Vec<u8> {
    let mut data = vec![SN_IS];
    data.extend_from_slice(terminal_type.as_bytes());
    build_subnegotiation(TelnetOption::TerminalType.code(), &data)
}

pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_negotiation_will_echo() {
        assert_eq!(build_negotiation(WILL, 1), vec![IAC, WILL, 1]);
    }

    #[test]
    fn build_subneg_escapes_iac_in_data() {
        assert_eq!(build_subnegotiation(99, &[1, 255, 2]), vec![IAC, SB, 99, 1, 255, 255, 2, IAC, SE]);
    }

    #[test]
    fn build_naws_standard() {
        let frame = build_naws(80, 24);
        assert_eq!(frame[2], 31);
        assert_eq!(frame[3], 0);
        assert_eq!(frame[4], 80);
        assert_eq!(frame[5], 0);
        assert_eq!(frame[6], 24);
    }

    #[test]
    fn build_ttype_is_xterm() {
        let frame = build_ttype_is("xterm-256color");
        assert_eq!(frame[3], SN_IS);
        assert_eq!(&frame[4..frame.len() - 2], b"xterm-256color");
    }

    #[test]
    fn escape_iac_with_iac() {
        assert_eq!(escape_iac(&[1, 255, 2]), vec![1, 255, 255, 2]);
    }
}
