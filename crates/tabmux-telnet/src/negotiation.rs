//! RFC 1143 Q-method option negotiation, trimmed to the options this pool
//! actually wants: echo passthrough, suppress-go-ahead, NAWS, terminal type.

use crate::protocol::{self, DO, DONT, IAC, WILL, WONT};
use crate::types::{OptionState, QState};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct NegotiationManager {
    options: HashMap<u8, OptionState>,
    accepted_remote: Vec<u8>,
    desired_local: Vec<u8>,
}

impl NegotiationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept_remote(&mut self, option: u8) {
        if !self.accepted_remote.contains(&option) {
            self.accepted_remote.push(option);
        }
    }

    pub fn desire_local(&mut self, option: u8) {
        if !self.desired_local.contains(&option) {
            self.desired_local.push(option);
        }
    }

    fn state(&mut self, option: u8) -> &mut OptionState {
        self.options.entry(option).or_default()
    }

    pub fn initial_negotiation(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        for opt in self.desired_local.clone() {
            let state = self.state(opt);
            if state.local == QState::No {
                state.local = QState::WantYes;
                out.extend_from_slice(&[IAC, WILL, opt]);
            }
        }
        for opt in self.accepted_remote.clone() {
            let state = self.state(opt);
            if state.remote == QState::No {
                state.remote = QState::WantYes;
                out.extend_from_slice(&[IAC, DO, opt]);
            }
        }
        out
    }

    pub fn receive_will(&mut self, option: u8) -> Vec<u8> {
        let accepted = self.accepted_remote.contains(&option);
        let state = self.state(option);
        match state.remote {
            QState::No => {
                if accepted {
                    state.remote = QState::Yes;
                    protocol::build_negotiation(DO, option)
                } else {
                    protocol::build_negotiation(DONT, option)
                }
            }
            QState::WantYes => {
                state.remote = QState::Yes;
                Vec::new()
            }
            QState::WantNo => {
                state.remote = QState::No;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn receive_wont(&mut self, option: u8) -> Vec<u8> {
        let state = self.state(option);
        let was_enabled = state.remote == QState::Yes;
        state.remote = QState::No;
        if was_enabled {
            protocol::build_negotiation(DONT, option)
        } else {
            Vec::new()
        }
    }

    pub fn receive_do(&mut self, option: u8) -> Vec<u8> {
        let desired = self.desired_local.contains(&option);
        let state = self.state(option);
        match state.local {
            QState::No => {
                if desired {
                    state.local = QState::Yes;
                    protocol::build_negotiation(WILL, option)
                } else {
                    protocol::build_negotiation(WONT, option)
                }
            }
            QState::WantYes => {
                state.local = QState::Yes;
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn receive_dont(&mut self, option: u8) -> Vec<u8> {
        let state = self.state(option);
        let was_enabled = state.local == QState::Yes;
        state.local = QState::No;
        if was_enabled {
            protocol::build_negotiation(WONT, option)
        } else {
            Vec::new()
        }
    }

    pub fn is_remote_enabled(&self, option: u8) -> bool {
        self.options.get(&option).map_or(false, |s| s.remote == QState::Yes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TelnetOption;

    #[test]
    fn accepted_option_is_enabled_on_will() {
        let mut mgr = NegotiationManager::new();
        mgr.accept_remote(TelnetOption::Echo.code());
        let response = mgr.receive_will(TelnetOption::Echo.code());
        assert_eq!(response, protocol::build_negotiation(DO, TelnetOption::Echo.code()));
        assert!(mgr.is_remote_enabled(TelnetOption::Echo.code()));
    }

    #[test]
    fn unaccepted_option_is_refused_on_will() {
        let mut mgr = NegotiationManager::new();
        let response = mgr.receive_will(200);
        assert_eq!(response, protocol::build_negotiation(DONT, 200));
        assert!(!mgr.is_remote_enabled(200));
    }

    #[test]
    fn initial_negotiation_sends_desired_and_accepted() {
        let mut mgr = NegotiationManager::new();
        mgr.desire_local(TelnetOption::NAWS.code());
        mgr.accept_remote(TelnetOption::Echo.code());
        let bytes = mgr.initial_negotiation();
        assert!(bytes.windows(3).any(|w| w == [IAC, WILL, TelnetOption::NAWS.code()]));
        assert!(bytes.windows(3).any(|w| w == [IAC, DO, TelnetOption::Echo.code()]));
    }
}
