// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitflags::bitflags;
use core::cell::{Cell, RefCell};
use drv_w5100_spi_api::{Transport, W5100Error, W5100_SPI_SETTINGS};
use log::{debug, info};
use num_traits::FromPrimitive;

pub(crate) mod register;
mod socket;
mod spi_stream;

use self::register::{Register, MEMORY_SIZE};
use self::socket::SocketLayout;
use self::spi_stream::SpiStream;

pub use self::socket::{
    Command, Interrupt, Protocol, Recv, Ring, Socket, SocketFlags, Status,
};

/// The chip has a fixed pool of four sockets; smaller partitions use a
/// prefix of it.
pub const MAX_SOCKETS: usize = 4;

// There is a total of 8KiB tx and 8KiB rx buffer space. We support:
//  1 socket with 8KiB tx/rx
//  2 sockets with 4KiB tx/rx each
//  4 sockets with 2KiB tx/rx each
// Asymmetric tx/rx and giving more space to socket 0 are supported by the
// hardware, but not us.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SocketConfig {
    OneSocket8KiB,
    TwoSockets4KiB,
    FourSockets2KiB,
}

impl SocketConfig {
    pub const fn max_sockets(self) -> u8 {
        match self {
            SocketConfig::OneSocket8KiB => 1,
            SocketConfig::TwoSockets4KiB => 2,
            SocketConfig::FourSockets2KiB => 4,
        }
    }

    pub const fn buffer_size(self) -> u16 {
        MEMORY_SIZE / self.max_sockets() as u16
    }

    // See RMSR docs in W5100 datasheet; two bits per socket.
    const fn memory_size_mask(self) -> u8 {
        match self {
            SocketConfig::OneSocket8KiB => 0x03,
            SocketConfig::TwoSockets4KiB => 0x0a,
            SocketConfig::FourSockets2KiB => 0x55,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NetworkConfig {
    Static {
        ip: [u8; 4],
        subnet: [u8; 4],
        gateway: [u8; 4],
    },
}

/// Upper bound on every busy-wait loop the driver runs against the chip.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PollLimit {
    /// Spin until the chip answers, however long that takes.
    Unbounded,
    /// Give up with [`W5100Error::Timeout`] after this many polls.
    Iterations(u32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub mac: [u8; 6],
    pub network: Option<NetworkConfig>,
    pub socket_config: SocketConfig,
    /// First port handed out when a socket is opened with port 0.
    pub ephemeral_port_start: u16,
    pub poll_limit: PollLimit,
}

impl Config {
    pub const fn new(mac: [u8; 6]) -> Self {
        Self {
            mac,
            network: None,
            socket_config: SocketConfig::FourSockets2KiB,
            ephemeral_port_start: 2000,
            poll_limit: PollLimit::Iterations(100_000),
        }
    }
}

pub(crate) struct Poller {
    remaining: Option<u32>,
}

impl Poller {
    fn new(limit: PollLimit) -> Self {
        let remaining = match limit {
            PollLimit::Unbounded => None,
            PollLimit::Iterations(n) => Some(n),
        };
        Self { remaining }
    }

    /// Accounts for one more trip around a polling loop.
    pub(crate) fn tick(&mut self) -> Result<(), W5100Error> {
        if let Some(remaining) = &mut self.remaining {
            if *remaining == 0 {
                return Err(W5100Error::Timeout);
            }
            *remaining -= 1;
        }
        core::hint::spin_loop();
        Ok(())
    }
}

/// A W5100 on the other end of `T`.
///
/// All register traffic goes through this value, one complete SPI frame at
/// a time. It is deliberately `!Sync`; sockets borrow it, so several
/// [`Socket`] handles may be live at once on one thread.
pub struct W5100<T> {
    transport: RefCell<T>,
    socket_config: SocketConfig,
    poll_limit: PollLimit,
    ephemeral_port_start: u16,
    next_ephemeral_port: Cell<u16>,
    sockets: [Option<SocketLayout>; MAX_SOCKETS],
}

impl<T: Transport> W5100<T> {
    /// Configures the transport, resets the chip, partitions its buffers,
    /// programs addresses from `config` and closes every socket.
    pub fn new(mut transport: T, config: Config) -> Result<Self, W5100Error> {
        transport.configure(&W5100_SPI_SETTINGS)?;

        let mut sockets = [None; MAX_SOCKETS];
        let socket_config = config.socket_config;
        for (index, slot) in sockets
            .iter_mut()
            .enumerate()
            .take(usize::from(socket_config.max_sockets()))
        {
            *slot = Some(SocketLayout::new(
                index as u8,
                socket_config.buffer_size(),
            ));
        }

        let this = Self {
            transport: RefCell::new(transport),
            socket_config,
            poll_limit: config.poll_limit,
            ephemeral_port_start: config.ephemeral_port_start,
            next_ephemeral_port: Cell::new(config.ephemeral_port_start),
            sockets,
        };
        this.reset_raw()?;
        this.configure_socket_buffers()?;
        this.set_mac_address(config.mac)?;
        if let Some(network) = &config.network {
            this.set_network_config(network)?;
        }
        for slot in 0..socket_config.max_sockets() {
            this.socket(slot)?.close()?;
        }

        info!(
            "w5100 ready: {} socket(s) with {} byte buffers",
            socket_config.max_sockets(),
            socket_config.buffer_size()
        );
        Ok(this)
    }

    pub fn socket_config(&self) -> SocketConfig {
        self.socket_config
    }

    pub fn max_sockets(&self) -> u8 {
        self.socket_config.max_sockets()
    }

    pub fn set_network_config(
        &self,
        network_config: &NetworkConfig,
    ) -> Result<(), W5100Error> {
        match network_config {
            NetworkConfig::Static {
                ip,
                subnet,
                gateway,
            } => {
                self.set_ip_address(*ip)?;
                self.set_subnet_mask(*subnet)?;
                self.set_gateway(*gateway)?;
            }
        }
        Ok(())
    }

    pub fn mac_address(&self) -> Result<[u8; 6], W5100Error> {
        let mut mac = [0; 6];
        self.read_reg(Register::Shar, &mut mac)?;
        Ok(mac)
    }

    pub fn set_mac_address(&self, mac: [u8; 6]) -> Result<(), W5100Error> {
        self.write_reg(Register::Shar, &mac)?;
        debug!(
            "mac = [{:#x}, {:#x}, {:#x}, {:#x}, {:#x}, {:#x}]",
            mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
        );
        Ok(())
    }

    pub fn ip_address(&self) -> Result<[u8; 4], W5100Error> {
        self.read_addr(Register::Sipr)
    }

    pub fn set_ip_address(&self, ip: [u8; 4]) -> Result<(), W5100Error> {
        self.write_reg(Register::Sipr, &ip)?;
        debug!("ip = [{}, {}, {}, {}]", ip[0], ip[1], ip[2], ip[3]);
        Ok(())
    }

    pub fn gateway(&self) -> Result<[u8; 4], W5100Error> {
        self.read_addr(Register::Gar)
    }

    pub fn set_gateway(&self, gateway: [u8; 4]) -> Result<(), W5100Error> {
        self.write_reg(Register::Gar, &gateway)?;
        debug!(
            "gateway = [{}, {}, {}, {}]",
            gateway[0], gateway[1], gateway[2], gateway[3]
        );
        Ok(())
    }

    pub fn subnet_mask(&self) -> Result<[u8; 4], W5100Error> {
        self.read_addr(Register::Subr)
    }

    pub fn set_subnet_mask(&self, subnet: [u8; 4]) -> Result<(), W5100Error> {
        self.write_reg(Register::Subr, &subnet)?;
        debug!(
            "subnet = [{}, {}, {}, {}]",
            subnet[0], subnet[1], subnet[2], subnet[3]
        );
        Ok(())
    }

    /// Returns a handle to `slot` without touching the hardware.
    pub fn socket(&self, slot: u8) -> Result<Socket<'_, T>, W5100Error> {
        let layout = self
            .sockets
            .get(usize::from(slot))
            .copied()
            .flatten()
            .ok_or(W5100Error::InvalidSlot)?;
        Ok(Socket::new(self, slot, layout))
    }

    /// Binds `slot` to `protocol`, closing whatever was using it first.
    ///
    /// A `port` of 0 picks the next ephemeral port.
    pub fn open_socket(
        &self,
        slot: u8,
        protocol: impl Into<u8>,
        port: u16,
        flags: SocketFlags,
    ) -> Result<Socket<'_, T>, W5100Error> {
        let socket = self.socket(slot)?;
        let protocol = protocol.into();
        let protocol = Protocol::from_u8(protocol)
            .ok_or(W5100Error::InvalidProtocol(protocol))?;

        socket.close()?;
        socket.set_mode(protocol, flags)?;
        let port = self.assign_port(port);
        socket.set_source_port(port)?;
        socket.execute(Command::Open)?;

        info!("socket {} opened: {:?} on port {}", slot, protocol, port);
        Ok(socket)
    }

    fn assign_port(&self, port: u16) -> u16 {
        if port != 0 {
            return port;
        }
        let port = self.next_ephemeral_port.get();
        let next = match port.wrapping_add(1) {
            0 => self.ephemeral_port_start,
            next => next,
        };
        self.next_ephemeral_port.set(next);
        port
    }

    pub(crate) fn poller(&self) -> Poller {
        Poller::new(self.poll_limit)
    }

    fn reset_raw(&self) -> Result<(), W5100Error> {
        self.write_reg(Register::Mr, &[Mode::RESET.bits()])?;

        // Wait until Mr register is reset
        let mut poll = self.poller();
        let mut attempts = 0u32;
        loop {
            let mr = self.read_u8(Register::Mr.addr())?;
            if mr == Mode::empty().bits() {
                debug!("reset done after {} polls", attempts);
                return self.confirm_reset();
            }
            poll.tick().map_err(|_| W5100Error::ResetFailed)?;
            attempts += 1;
        }
    }

    fn confirm_reset(&self) -> Result<(), W5100Error> {
        // attempt to read/write MR; this serves as a sanity check on our SPI
        // setup and presence of the device.
        for mode in [
            Mode::PING_BLOCK,
            Mode::PING_BLOCK | Mode::ADDRESS_AUTO_INCREMENT,
            Mode::empty(),
        ] {
            self.write_reg(Register::Mr, &[mode.bits()])?;
            if self.read_u8(Register::Mr.addr())? != mode.bits() {
                return Err(W5100Error::ResetFailed);
            }
        }
        Ok(())
    }

    fn configure_socket_buffers(&self) -> Result<(), W5100Error> {
        let mask = self.socket_config.memory_size_mask();
        self.write_reg(Register::Rmsr, &[mask])?;
        self.write_reg(Register::Tmsr, &[mask])?;

        let rx = self.read_u8(Register::Rmsr.addr())?;
        let tx = self.read_u8(Register::Tmsr.addr())?;
        debug!("socket config: {:#x} rx, {:#x} tx", rx, tx);
        Ok(())
    }

    fn read_addr(&self, reg: Register) -> Result<[u8; 4], W5100Error> {
        let mut out = [0; 4];
        self.read_reg(reg, &mut out)?;
        Ok(out)
    }

    fn write_reg(&self, reg: Register, data: &[u8]) -> Result<(), W5100Error> {
        debug_assert_eq!(data.len(), usize::from(reg.len()));
        self.write_raw(reg.addr(), data)
    }

    fn read_reg(&self, reg: Register, out: &mut [u8]) -> Result<(), W5100Error> {
        debug_assert_eq!(out.len(), usize::from(reg.len()));
        self.read_raw(reg.addr(), out)
    }

    pub(crate) fn write_u8(&self, addr: u16, val: u8) -> Result<(), W5100Error> {
        self.exchange_raw(&SpiStream::write(addr, val)).map(|_| ())
    }

    pub(crate) fn write_u16(
        &self,
        addr: u16,
        val: u16,
    ) -> Result<(), W5100Error> {
        self.write_raw(addr, &val.to_be_bytes())
    }

    // One stream per byte at consecutive addresses.
    pub(crate) fn write_raw(
        &self,
        addr: u16,
        data: &[u8],
    ) -> Result<(), W5100Error> {
        let mut cmd = SpiStream::write(addr, 0);
        for &b in data {
            cmd.set_data(b);
            self.exchange_raw(&cmd)?;
            cmd.increment_addr();
        }
        Ok(())
    }

    pub(crate) fn read_u8(&self, addr: u16) -> Result<u8, W5100Error> {
        self.exchange_raw(&SpiStream::read(addr))
    }

    pub(crate) fn read_u16(&self, addr: u16) -> Result<u16, W5100Error> {
        let mut out = [0; 2];
        self.read_raw(addr, &mut out)?;
        Ok(u16::from_be_bytes(out))
    }

    pub(crate) fn read_raw(
        &self,
        addr: u16,
        out: &mut [u8],
    ) -> Result<(), W5100Error> {
        let mut cmd = SpiStream::read(addr);
        for b in out {
            *b = self.exchange_raw(&cmd)?;
            cmd.increment_addr();
        }
        Ok(())
    }

    fn exchange_raw(&self, cmd: &SpiStream) -> Result<u8, W5100Error> {
        let mut transport = self.transport.borrow_mut();

        // W5100 requires us to assert/deassert CS around each 32-bit stream;
        // the byte clocked in with the data byte is the read result.
        transport.select()?;
        let result = cmd
            .as_bytes()
            .iter()
            .try_fold(0, |_, &b| transport.transfer(b));
        transport.deselect()?;
        Ok(result?)
    }
}

bitflags! {
    struct Mode: u8 {
        const RESET = 0x80;
        const PING_BLOCK = 0x10;
        //const PPPOE = 0x08; // not supported
        const ADDRESS_AUTO_INCREMENT = 0x02; // indirect bus only, but we use it in `confirm_reset()`
        //const INDIRECT_BUS = 0x01; // not supported over SPI
    }
}
