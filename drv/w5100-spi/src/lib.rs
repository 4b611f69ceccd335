// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the WIZnet W5100 TCP/IP offload chip in SPI mode.
//!
//! The chip runs the network stack itself; we move bytes in and out of its
//! per-socket ring buffers and drive each socket through the chip's
//! command/status handshake. Everything is polled.
//!
//! ```ignore
//! let w5100 = W5100::new(transport, Config::new(MAC))?;
//! w5100.set_ip_address([192, 168, 1, 15])?;
//!
//! let server = TcpSocket::open(&w5100, 0, 8080)?.listen()?.accept()?;
//! let mut buf = [0; 32];
//! let n = server.read(&mut buf)?;
//! server.write(&buf[..n])?;
//! server.close()?;
//! ```

#![cfg_attr(not(test), no_std)]

mod hal;
mod tcp;
mod w5100;

#[cfg(test)]
mod sim;

pub use drv_w5100_spi_api::{
    BitOrder, SpiSettings, Transport, TransportError, W5100Error,
    W5100_SPI_SETTINGS,
};

pub use crate::hal::HalTransport;
pub use crate::tcp::{Established, Init, Listening, TcpSocket};
pub use crate::w5100::{
    Command, Config, Interrupt, NetworkConfig, PollLimit, Protocol, Recv,
    Ring, Socket, SocketConfig, SocketFlags, Status, MAX_SOCKETS, W5100,
};
