//! Telnet command/option byte catalogue and the RFC 1143 Q-states, trimmed
//! to the option set this pool actually negotiates: echo, suppress-go-ahead,
//! terminal type, NAWS.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelnetCommand {
    SE = 240,
    NOP = 241,
    DataMark = 242,
    Break = 243,
    InterruptProcess = 244,
    AbortOutput = 245,
    AreYouThere = 246,
    EraseCharacter = 247,
    EraseLine = 248,
    GoAhead = 249,
    SB = 250,
    WILL = 251,
    WONT = 252,
    DO = 253,
    DONT = 254,
    IAC = 255,
}

impl TelnetCommand {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            240 => Some(Self::SE),
            241 => Some(Self::NOP),
            242 => Some(Self::DataMark),
            243 => Some(Self::Break),
            244 => Some(Self::InterruptProcess),
            245 => Some(Self::AbortOutput),
            246 => Some(Self::AreYouThere),
            247 => Some(Self::EraseCharacter),
            248 => Some(Self::EraseLine),
            249 => Some(Self::GoAhead),
            250 => Some(Self::SB),
            251 => Some(Self::WILL),
            252 => Some(Self::WONT),
            253 => Some(Self::DO),
            254 => Some(Self::DONT),
            255 => Some(Self::IAC),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TelnetOption {
    BinaryTransmission = 0,
    Echo = 1,
    SuppressGoAhead = 3,
    TerminalType = 24,
    NAWS = 31,
    TerminalSpeed = 32,
}

impl TelnetOption {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::BinaryTransmission),
            1 => Some(Self::Echo),
            3 => Some(Self::SuppressGoAhead),
            24 => Some(Self::TerminalType),
            31 => Some(Self::NAWS),
            32 => Some(Self::TerminalSpeed),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QState {
    #[default]
    No,
    Yes,
    WantNo,
    WantYes,
    WantNoOpposite,
    WantYesOpposite,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OptionState {
    pub local: QState,
    pub remote: QState,
}
