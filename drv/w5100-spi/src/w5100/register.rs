// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! W5100 memory map.
//!
//! ```text
//! 0x0000  common registers
//! 0x0030  reserved
//! 0x0400  socket registers, 0x100 per socket
//! 0x0800  reserved
//! 0x4000  tx memory (8KiB)
//! 0x6000  rx memory (8KiB)
//! 0x8000
//! ```

pub(crate) const SOCKET_REGISTER_BASE: u16 = 0x0400;
pub(crate) const SOCKET_REGISTER_STRIDE: u16 = 0x0100;
pub(crate) const TX_MEMORY_BASE: u16 = 0x4000;
pub(crate) const RX_MEMORY_BASE: u16 = 0x6000;
pub(crate) const MEMORY_SIZE: u16 = 0x2000;

/// Chip-wide registers.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Register {
    Mr,   // Mode
    Gar,  // Gateway IP address
    Subr, // Subnet mask
    Shar, // MAC ("source hardware address")
    Sipr, // IP address ("source IP address")
    Rmsr, // RX memory size
    Tmsr, // TX memory size
}

impl Register {
    #[cfg(test)]
    pub(crate) const ALL: [Register; 7] = [
        Register::Mr,
        Register::Gar,
        Register::Subr,
        Register::Shar,
        Register::Sipr,
        Register::Rmsr,
        Register::Tmsr,
    ];

    pub(crate) const fn addr(self) -> u16 {
        match self {
            Register::Mr => 0x0000,
            Register::Gar => 0x0001,
            Register::Subr => 0x0005,
            Register::Shar => 0x0009,
            Register::Sipr => 0x000f,
            Register::Rmsr => 0x001a,
            Register::Tmsr => 0x001b,
        }
    }

    pub(crate) const fn len(self) -> u16 {
        match self {
            Register::Mr | Register::Rmsr | Register::Tmsr => 1,
            Register::Gar | Register::Subr | Register::Sipr => 4,
            Register::Shar => 6,
        }
    }
}

/// Registers repeated in every socket's window.
///
/// This is the whole window; the driver does not program all of it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) enum SocketRegister {
    Mr,    // socket N mode
    Cr,    // socket N command
    Ir,    // socket N interrupt
    Sr,    // socket N status
    Port,  // socket N source port
    Dhar,  // socket N destination MAC
    Dipr,  // socket N destination IP
    Dport, // socket N destination port
    Mssr,  // socket N maximum segment size
    Proto, // socket N protocol number in IP raw mode
    Tos,   // socket N IP type of service
    Ttl,   // socket N IP time to live
    TxFsr, // socket N transmit free size
    TxRd,  // socket N transmit read pointer
    TxWr,  // socket N transmit write pointer
    RxRsr, // socket N received size
    RxRd,  // socket N read pointer
}

impl SocketRegister {
    #[cfg(test)]
    pub(crate) const ALL: [SocketRegister; 17] = [
        SocketRegister::Mr,
        SocketRegister::Cr,
        SocketRegister::Ir,
        SocketRegister::Sr,
        SocketRegister::Port,
        SocketRegister::Dhar,
        SocketRegister::Dipr,
        SocketRegister::Dport,
        SocketRegister::Mssr,
        SocketRegister::Proto,
        SocketRegister::Tos,
        SocketRegister::Ttl,
        SocketRegister::TxFsr,
        SocketRegister::TxRd,
        SocketRegister::TxWr,
        SocketRegister::RxRsr,
        SocketRegister::RxRd,
    ];

    pub(crate) const fn offset(self) -> u16 {
        match self {
            SocketRegister::Mr => 0x00,
            SocketRegister::Cr => 0x01,
            SocketRegister::Ir => 0x02,
            SocketRegister::Sr => 0x03,
            SocketRegister::Port => 0x04,
            SocketRegister::Dhar => 0x06,
            SocketRegister::Dipr => 0x0c,
            SocketRegister::Dport => 0x10,
            SocketRegister::Mssr => 0x12,
            SocketRegister::Proto => 0x14,
            SocketRegister::Tos => 0x15,
            SocketRegister::Ttl => 0x16,
            SocketRegister::TxFsr => 0x20,
            SocketRegister::TxRd => 0x22,
            SocketRegister::TxWr => 0x24,
            SocketRegister::RxRsr => 0x26,
            SocketRegister::RxRd => 0x28,
        }
    }

    pub(crate) const fn len(self) -> u16 {
        match self {
            SocketRegister::Mr
            | SocketRegister::Cr
            | SocketRegister::Ir
            | SocketRegister::Sr
            | SocketRegister::Proto
            | SocketRegister::Tos
            | SocketRegister::Ttl => 1,
            SocketRegister::Dhar => 6,
            SocketRegister::Dipr => 4,
            SocketRegister::Port
            | SocketRegister::Dport
            | SocketRegister::Mssr
            | SocketRegister::TxFsr
            | SocketRegister::TxRd
            | SocketRegister::TxWr
            | SocketRegister::RxRsr
            | SocketRegister::RxRd => 2,
        }
    }

    pub(crate) const fn addr(self, index: u8) -> u16 {
        SOCKET_REGISTER_BASE
            + index as u16 * SOCKET_REGISTER_STRIDE
            + self.offset()
    }
}
