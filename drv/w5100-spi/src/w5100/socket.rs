// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::register::{SocketRegister, RX_MEMORY_BASE, TX_MEMORY_BASE};
use super::{Poller, W5100};
use bitflags::bitflags;
use drv_w5100_spi_api::{Transport, W5100Error};
use log::{info, warn};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    // Main status codes
    Closed = 0x00,
    Init = 0x13,
    Listen = 0x14,
    Established = 0x17,
    CloseWait = 0x1c,
    Udp = 0x22,
    IpRaw = 0x32,
    MacRaw = 0x42,
    Pppoe = 0x5f,

    // Ephemeral status codes
    SynSent = 0x15,
    SynRecv = 0x16,
    FinWait = 0x18,
    Closing = 0x1a,
    TimeWait = 0x1b,
    LastAck = 0x1d,
    ArpTcp = 0x11, // datasheet doesn't say which ARP value goes with which protocol; this is a guess.
    ArpUdp = 0x21,
    ArpIcmp = 0x31,
}

impl Status {
    /// The remote end is gone (or was never there), so an empty RX buffer
    /// will stay empty.
    pub fn peer_closed(self) -> bool {
        matches!(self, Status::Listen | Status::Closed | Status::CloseWait)
    }
}

#[derive(Copy, Clone, Debug, FromPrimitive, PartialEq, Eq)]
#[repr(u8)]
pub enum Protocol {
    Tcp = 0x01,
    Udp = 0x02,
    IpRaw = 0x03,
    MacRaw = 0x04,
    Pppoe = 0x05,
}

impl From<Protocol> for u8 {
    fn from(protocol: Protocol) -> Self {
        protocol as u8
    }
}

bitflags! {
    /// Option bits OR'd into the socket mode register next to the protocol.
    pub struct SocketFlags: u8 {
        // UDP only
        const MULTICAST = 0x80;
        // RESERVED: 0x40
        const NO_DELAYED_ACK = 0x20; // TCP; see datasheet
        const IGMP_VERSION = 0x20; // If UDP and MULTICAST, 0 = IGMP v2, 1 = IGMP v1
    }
}

bitflags! {
    /// Socket interrupt register; bits clear when written as 1.
    pub struct Interrupt: u8 {
        const SEND_OK = 0x10;
        const TIMEOUT = 0x08;
        const RECV = 0x04;
        const DISCON = 0x02;
        const CON = 0x01;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Open = 0x01,
    Listen = 0x02,
    Connect = 0x04,
    Disconnect = 0x08,
    Close = 0x10,
    Send = 0x20,
    SendMac = 0x21,
    SendKeep = 0x22,
    Recv = 0x40,
}

/// One socket's slice of TX or RX memory.
///
/// Pointers into the ring are free-running 16-bit values; only the
/// physical address is masked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Ring {
    base: u16,
    size: u16,
}

impl Ring {
    pub(crate) const fn new(base: u16, size: u16) -> Self {
        Self { base, size }
    }

    pub const fn base(&self) -> u16 {
        self.base
    }

    pub const fn size(&self) -> u16 {
        self.size
    }

    pub const fn mask(&self) -> u16 {
        self.size - 1
    }

    pub const fn wrap_address(&self, ptr: u16) -> u16 {
        self.base + (ptr & self.mask())
    }

    /// Splits a `len` byte transfer starting at `ptr` into the part that
    /// fits before the end of the ring and the part that wraps to its
    /// start.
    pub const fn split(&self, ptr: u16, len: u16) -> (u16, u16) {
        let to_end = self.size - (ptr & self.mask());
        if len > to_end {
            (to_end, len - to_end)
        } else {
            (len, 0)
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SocketLayout {
    tx: Ring,
    rx: Ring,
}

impl SocketLayout {
    pub(crate) fn new(index: u8, buf_size: u16) -> Self {
        let index = u16::from(index);
        Self {
            tx: Ring::new(TX_MEMORY_BASE + index * buf_size, buf_size),
            rx: Ring::new(RX_MEMORY_BASE + index * buf_size, buf_size),
        }
    }
}

/// Outcome of [`Socket::recv`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recv {
    /// This many bytes were copied out and acknowledged to the chip.
    Data(usize),
    /// Nothing buffered, but the connection is still up.
    WouldBlock,
    /// Nothing buffered and the peer has gone away.
    EndOfStream,
}

/// Handle to one of the chip's sockets.
///
/// Holds no state of its own beyond derived addresses; everything else
/// lives in the socket's register window.
pub struct Socket<'a, T> {
    device: &'a W5100<T>,
    index: u8,
    layout: SocketLayout,
}

impl<'a, T: Transport> Socket<'a, T> {
    pub(crate) fn new(
        device: &'a W5100<T>,
        index: u8,
        layout: SocketLayout,
    ) -> Self {
        Self {
            device,
            index,
            layout,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn tx_ring(&self) -> Ring {
        self.layout.tx
    }

    pub fn rx_ring(&self) -> Ring {
        self.layout.rx
    }

    pub fn status(&self) -> Result<Status, W5100Error> {
        let status_raw = self.read_reg_u8(SocketRegister::Sr)?;
        Status::from_u8(status_raw)
            .ok_or(W5100Error::UnknownSocketStatus(status_raw))
    }

    pub fn interrupts(&self) -> Result<Interrupt, W5100Error> {
        self.read_reg_u8(SocketRegister::Ir)
            .map(Interrupt::from_bits_truncate)
    }

    pub fn clear_interrupts(&self, which: Interrupt) -> Result<(), W5100Error> {
        self.write_reg_u8(SocketRegister::Ir, which.bits())
    }

    pub(crate) fn set_mode(
        &self,
        protocol: Protocol,
        flags: SocketFlags,
    ) -> Result<(), W5100Error> {
        self.write_reg_u8(SocketRegister::Mr, protocol as u8 | flags.bits())
    }

    pub(crate) fn set_source_port(&self, port: u16) -> Result<(), W5100Error> {
        self.write_reg_u16(SocketRegister::Port, port)
    }

    pub(crate) fn poller(&self) -> Poller {
        self.device.poller()
    }

    /// Issues `command` and waits for the chip to accept it, which it
    /// signals by clearing the command register.
    pub(crate) fn execute(&self, command: Command) -> Result<(), W5100Error> {
        self.write_reg_u8(SocketRegister::Cr, command as u8)?;
        let mut poll = self.poller();
        while self.read_reg_u8(SocketRegister::Cr)? != 0 {
            poll.tick()?;
        }
        Ok(())
    }

    /// Puts a freshly opened TCP socket into passive (server) mode.
    pub fn listen(&self) -> Result<(), W5100Error> {
        if self.status()? != Status::Init {
            return Err(W5100Error::NotInInitState);
        }
        self.execute(Command::Listen)?;
        info!("socket {} listening", self.index);
        Ok(())
    }

    /// Starts an active open to `address:port`. Returns once the chip has
    /// taken the command; poll [`Socket::status`] for `Established`.
    pub fn connect(&self, address: [u8; 4], port: u16) -> Result<(), W5100Error> {
        if port == 0 {
            return Err(W5100Error::InvalidPort);
        }
        if address == [0x00; 4] || address == [0xff; 4] {
            return Err(W5100Error::InvalidAddress);
        }

        self.write_reg_raw(SocketRegister::Dipr, &address)?;
        self.write_reg_u16(SocketRegister::Dport, port)?;
        self.execute(Command::Connect)?;
        info!(
            "socket {} connecting to {}.{}.{}.{}:{}",
            self.index, address[0], address[1], address[2], address[3], port
        );
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), W5100Error> {
        self.execute(Command::Disconnect)
    }

    pub fn close(&self) -> Result<(), W5100Error> {
        self.execute(Command::Close)?;
        self.write_reg_u8(SocketRegister::Ir, 0xff)
    }

    pub fn send_keepalive(&self) -> Result<(), W5100Error> {
        self.execute(Command::SendKeep)
    }

    /// Queues up to one TX buffer's worth of `data` and waits for the chip
    /// to report it sent. Anything past the buffer size is not attempted;
    /// callers that need everything delivered must loop.
    ///
    /// Returns `Ok(0)` if the connection went away first, in which case the
    /// socket has been closed if the chip dropped it mid-send.
    pub fn send(&self, data: &[u8]) -> Result<usize, W5100Error> {
        if data.is_empty() {
            return Ok(0);
        }
        let tx = self.layout.tx;
        let len = usize::min(data.len(), usize::from(tx.size())) as u16;
        let data = &data[..usize::from(len)];

        let mut poll = self.poller();
        loop {
            let free = self.tx_free_size()?;
            match self.status()? {
                Status::Established | Status::CloseWait => (),
                other => {
                    warn!("socket {}: send aborted in {:?}", self.index, other);
                    return Ok(0);
                }
            }
            if free >= len {
                break;
            }
            poll.tick()?;
        }

        let tx_pointer = self.read_reg_u16(SocketRegister::TxWr)?;
        self.write_ring(tx, tx_pointer, data)?;

        // update write pointer and inform device we've inserted data
        self.write_reg_u16(SocketRegister::TxWr, tx_pointer.wrapping_add(len))?;
        self.execute(Command::Send)?;

        let mut poll = self.poller();
        while !self.interrupts()?.contains(Interrupt::SEND_OK) {
            if self.status()? == Status::Closed {
                warn!("socket {}: closed while sending", self.index);
                self.close()?;
                return Ok(0);
            }
            poll.tick()?;
        }
        self.clear_interrupts(Interrupt::SEND_OK)?;

        Ok(usize::from(len))
    }

    /// Copies buffered data into `out` and acknowledges it to the chip.
    ///
    /// The received size is checked before the status, so a connection that
    /// closes between the two reads reports `WouldBlock` once more before
    /// `EndOfStream`.
    pub fn recv(&self, out: &mut [u8]) -> Result<Recv, W5100Error> {
        let nready = self.received_size()?;
        if nready == 0 {
            return if self.status()?.peer_closed() {
                Ok(Recv::EndOfStream)
            } else {
                Ok(Recv::WouldBlock)
            };
        }

        let nready = usize::min(out.len(), usize::from(nready));
        if nready == 0 {
            return Ok(Recv::Data(0));
        }
        let out = &mut out[..nready];
        let len = nready as u16;

        let rd_pointer = self.read_reg_u16(SocketRegister::RxRd)?;
        self.read_ring(self.layout.rx, rd_pointer, out)?;

        // update read pointer and inform device we've consumed data
        self.write_reg_u16(SocketRegister::RxRd, rd_pointer.wrapping_add(len))?;
        self.execute(Command::Recv)?;
        Ok(Recv::Data(nready))
    }

    // The chip updates the size registers asynchronously, so a value only
    // counts once two reads in a row agree.
    fn tx_free_size(&self) -> Result<u16, W5100Error> {
        let mut poll = self.poller();
        loop {
            let first = self.read_reg_u16(SocketRegister::TxFsr)?;
            if first == 0 {
                return Ok(0);
            }
            if self.read_reg_u16(SocketRegister::TxFsr)? == first {
                return Ok(first);
            }
            poll.tick()?;
        }
    }

    fn received_size(&self) -> Result<u16, W5100Error> {
        let mut poll = self.poller();
        loop {
            let first = self.read_reg_u16(SocketRegister::RxRsr)?;
            if first == 0 {
                return Ok(0);
            }
            let second = self.read_reg_u16(SocketRegister::RxRsr)?;
            if first == second || self.status()?.peer_closed() {
                return Ok(second);
            }
            poll.tick()?;
        }
    }

    fn write_ring(
        &self,
        ring: Ring,
        ptr: u16,
        data: &[u8],
    ) -> Result<(), W5100Error> {
        let (to_end, _) = ring.split(ptr, data.len() as u16);
        let (head, tail) = data.split_at(usize::from(to_end));
        self.device.write_raw(ring.wrap_address(ptr), head)?;
        self.device.write_raw(ring.base(), tail)
    }

    fn read_ring(
        &self,
        ring: Ring,
        ptr: u16,
        out: &mut [u8],
    ) -> Result<(), W5100Error> {
        let (to_end, _) = ring.split(ptr, out.len() as u16);
        let (head, tail) = out.split_at_mut(usize::from(to_end));
        self.device.read_raw(ring.wrap_address(ptr), head)?;
        self.device.read_raw(ring.base(), tail)
    }

    fn write_reg_u8(
        &self,
        reg: SocketRegister,
        val: u8,
    ) -> Result<(), W5100Error> {
        self.device.write_u8(reg.addr(self.index), val)
    }

    fn write_reg_u16(
        &self,
        reg: SocketRegister,
        val: u16,
    ) -> Result<(), W5100Error> {
        self.device.write_u16(reg.addr(self.index), val)
    }

    fn write_reg_raw(
        &self,
        reg: SocketRegister,
        data: &[u8],
    ) -> Result<(), W5100Error> {
        debug_assert_eq!(data.len(), usize::from(reg.len()));
        self.device.write_raw(reg.addr(self.index), data)
    }

    fn read_reg_u8(&self, reg: SocketRegister) -> Result<u8, W5100Error> {
        self.device.read_u8(reg.addr(self.index))
    }

    fn read_reg_u16(&self, reg: SocketRegister) -> Result<u16, W5100Error> {
        self.device.read_u16(reg.addr(self.index))
    }
}
