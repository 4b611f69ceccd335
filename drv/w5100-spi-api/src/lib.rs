// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface types shared by the W5100 driver and the boards that host it.
//!
//! Board code implements [`Transport`] for whatever SPI peripheral the chip
//! hangs off of; the driver consumes it and reports failures as
//! [`W5100Error`].

#![no_std]

use core::fmt;

pub use embedded_hal::spi::{Mode, MODE_0};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum W5100Error {
    ResetFailed,
    OpenFailed,
    PeerClosed,
    InvalidSlot,
    InvalidProtocol(u8),
    InvalidPort,
    InvalidAddress,
    NotInInitState,
    Timeout,
    BadSocketState(u8),
    UnknownSocketStatus(u8),
    Transport(TransportError),
}

impl From<TransportError> for W5100Error {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl fmt::Display for W5100Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResetFailed => f.write_str("chip did not come out of reset"),
            Self::OpenFailed => f.write_str("socket did not open"),
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::InvalidSlot => f.write_str("socket slot out of range"),
            Self::InvalidProtocol(p) => {
                write!(f, "unsupported socket protocol {:#04x}", p)
            }
            Self::InvalidPort => f.write_str("destination port is zero"),
            Self::InvalidAddress => {
                f.write_str("destination address is not a unicast peer")
            }
            Self::NotInInitState => f.write_str("socket is not in INIT state"),
            Self::Timeout => f.write_str("gave up polling the chip"),
            Self::BadSocketState(s) => {
                write!(f, "unexpected socket status {:#04x}", s)
            }
            Self::UnknownSocketStatus(s) => {
                write!(f, "unknown socket status {:#04x}", s)
            }
            Self::Transport(err) => write!(f, "transport error: {:?}", err),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    /// The SPI peripheral failed the byte exchange.
    Bus,
    /// Driving the chip-select line failed.
    ChipSelect,
    /// The transport cannot run with the requested settings.
    UnsupportedSettings,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// How the SPI peripheral must be set up before talking to the chip.
// `spi::Mode` has no `Debug` impl in embedded-hal 0.2.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SpiSettings {
    pub mode: Mode,
    pub bit_order: BitOrder,
    /// SCK divider relative to the peripheral clock; smaller is faster.
    pub clock_divider: u8,
}

/// SPI mode 0, MSB first, at the fastest divider the W5100 tolerates.
pub const W5100_SPI_SETTINGS: SpiSettings = SpiSettings {
    mode: MODE_0,
    bit_order: BitOrder::MsbFirst,
    clock_divider: 4,
};

/// Single-byte full-duplex SPI access with manual chip select.
///
/// The driver brackets every 4-byte frame with `select()`/`deselect()` and
/// calls `configure()` exactly once, before any traffic.
pub trait Transport {
    fn configure(
        &mut self,
        settings: &SpiSettings,
    ) -> Result<(), TransportError>;

    fn select(&mut self) -> Result<(), TransportError>;

    fn deselect(&mut self) -> Result<(), TransportError>;

    /// Clocks `byte` out and returns the byte clocked in at the same time.
    fn transfer(&mut self, byte: u8) -> Result<u8, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn configure(
        &mut self,
        settings: &SpiSettings,
    ) -> Result<(), TransportError> {
        (**self).configure(settings)
    }

    fn select(&mut self) -> Result<(), TransportError> {
        (**self).select()
    }

    fn deselect(&mut self) -> Result<(), TransportError> {
        (**self).deselect()
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, TransportError> {
        (**self).transfer(byte)
    }
}
