// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level model of a W5100 behind a [`Transport`], for host tests.
//!
//! Frames are decoded exactly as the chip would see them on the wire, so
//! tests exercise the same byte traffic real hardware gets. Commands
//! complete instantly (unless stalled) and `SEND` on a linked socket lands
//! in its peer's RX ring.

use crate::w5100::register::{
    Register, SocketRegister, RX_MEMORY_BASE, SOCKET_REGISTER_BASE,
    SOCKET_REGISTER_STRIDE, TX_MEMORY_BASE,
};
use crate::w5100::{Command, Interrupt, Status, MAX_SOCKETS};
use drv_w5100_spi_api::{SpiSettings, Transport, TransportError};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;

const MEMORY_END: usize = 0x8000;

#[derive(Copy, Clone, Default)]
struct SimSocket {
    peer: Option<u8>,
    start_pointer: u16,
    rx_wr: u16,
    rx_acked: u16,
}

pub(crate) struct SimState {
    pub(crate) mem: Vec<u8>,
    pub(crate) frames: Vec<[u8; 4]>,
    /// `(socket, command)` for every command the chip accepted.
    pub(crate) commands: Vec<(u8, u8)>,
    /// Bytes each socket put on the wire.
    pub(crate) sent: [Vec<u8>; MAX_SOCKETS],
    pub(crate) configured: usize,
    pub(crate) settings: Option<SpiSettings>,
    pub(crate) resets: usize,
    pub(crate) selected: bool,

    pub(crate) stall_reset: bool,
    /// Number of Mr reads that still report RST set.
    pub(crate) reset_busy_reads: u32,
    pub(crate) stall_commands: bool,
    pub(crate) fail_transfers: bool,
    pub(crate) withhold_send_ok: bool,
    /// Socket whose connection drops instead of completing a `SEND`.
    pub(crate) drop_on_send: Option<u8>,
    /// After this many reads of a TX free size register, set it to the
    /// given value.
    pub(crate) free_space_after_reads: Option<(u32, u16)>,

    sockets: [SimSocket; MAX_SOCKETS],
    partial: Vec<u8>,
}

#[derive(Clone)]
pub(crate) struct SimChip(Rc<RefCell<SimState>>);

impl SimChip {
    pub(crate) fn new() -> Self {
        Self(Rc::new(RefCell::new(SimState {
            mem: vec![0; MEMORY_END],
            frames: Vec::new(),
            commands: Vec::new(),
            sent: Default::default(),
            configured: 0,
            settings: None,
            resets: 0,
            selected: false,
            stall_reset: false,
            reset_busy_reads: 0,
            stall_commands: false,
            fail_transfers: false,
            withhold_send_ok: false,
            drop_on_send: None,
            free_space_after_reads: None,
            sockets: [SimSocket::default(); MAX_SOCKETS],
            partial: Vec::with_capacity(4),
        })))
    }

    pub(crate) fn state(&self) -> RefMut<'_, SimState> {
        self.0.borrow_mut()
    }

    /// Wires two sockets back to back, as if connected to each other.
    pub(crate) fn link(&self, a: u8, b: u8) {
        let mut state = self.state();
        state.sockets[usize::from(a)].peer = Some(b);
        state.sockets[usize::from(b)].peer = Some(a);
    }
}

fn socket_reg_addr(n: u8, reg: SocketRegister) -> usize {
    usize::from(reg.addr(n))
}

impl SimState {
    pub(crate) fn socket_reg_u8(&self, n: u8, reg: SocketRegister) -> u8 {
        self.mem[socket_reg_addr(n, reg)]
    }

    pub(crate) fn socket_reg_u16(&self, n: u8, reg: SocketRegister) -> u16 {
        let addr = socket_reg_addr(n, reg);
        u16::from_be_bytes([self.mem[addr], self.mem[addr + 1]])
    }

    pub(crate) fn set_socket_reg_u8(
        &mut self,
        n: u8,
        reg: SocketRegister,
        val: u8,
    ) {
        self.mem[socket_reg_addr(n, reg)] = val;
    }

    pub(crate) fn set_socket_reg_u16(
        &mut self,
        n: u8,
        reg: SocketRegister,
        val: u16,
    ) {
        let addr = socket_reg_addr(n, reg);
        self.mem[addr..addr + 2].copy_from_slice(&val.to_be_bytes());
    }

    pub(crate) fn set_status(&mut self, n: u8, status: Status) {
        self.set_socket_reg_u8(n, SocketRegister::Sr, status as u8);
    }

    /// Value the socket's TX and RX pointers take on its next `OPEN`.
    pub(crate) fn set_start_pointer(&mut self, n: u8, ptr: u16) {
        self.sockets[usize::from(n)].start_pointer = ptr;
    }

    /// Data arriving from the network for socket `n`.
    pub(crate) fn deliver(&mut self, n: u8, data: &[u8]) {
        let (base, size) = self.ring(RX_MEMORY_BASE, n);
        let mut wr = self.sockets[usize::from(n)].rx_wr;
        for &b in data {
            self.mem[usize::from(base + (wr & (size - 1)))] = b;
            wr = wr.wrapping_add(1);
        }
        self.sockets[usize::from(n)].rx_wr = wr;
        let rsr = self.socket_reg_u16(n, SocketRegister::RxRsr);
        self.set_socket_reg_u16(
            n,
            SocketRegister::RxRsr,
            rsr + data.len() as u16,
        );
    }

    // Sizes come from TMSR (tx and rx are always programmed alike here):
    // two bits per socket, 1KiB << bits.
    fn ring(&self, region: u16, n: u8) -> (u16, u16) {
        let tmsr = self.mem[usize::from(Register::Tmsr.addr())];
        let size_of = |i: u8| 1024u16 << ((tmsr >> (2 * i)) & 0x03);
        let base = region + (0..n).map(size_of).sum::<u16>();
        (base, size_of(n))
    }

    fn read(&mut self, addr: u16) -> u8 {
        if addr == Register::Mr.addr() && self.reset_busy_reads > 0 {
            self.reset_busy_reads -= 1;
            return 0x80;
        }
        if let Some((reads, value)) = self.free_space_after_reads {
            let fsr = (0..MAX_SOCKETS as u8)
                .find(|&n| SocketRegister::TxFsr.addr(n) == addr);
            if let Some(n) = fsr {
                if reads == 0 {
                    self.set_socket_reg_u16(n, SocketRegister::TxFsr, value);
                    self.free_space_after_reads = None;
                } else {
                    self.free_space_after_reads = Some((reads - 1, value));
                }
            }
        }
        self.mem.get(usize::from(addr)).copied().unwrap_or(0)
    }

    fn write(&mut self, addr: u16, val: u8) {
        if addr == Register::Mr.addr() && val & 0x80 != 0 {
            self.reset();
            return;
        }

        let socket_region = SOCKET_REGISTER_BASE
            ..SOCKET_REGISTER_BASE + MAX_SOCKETS as u16 * SOCKET_REGISTER_STRIDE;
        if socket_region.contains(&addr) {
            let n = ((addr - SOCKET_REGISTER_BASE) / SOCKET_REGISTER_STRIDE) as u8;
            let offset = (addr - SOCKET_REGISTER_BASE) % SOCKET_REGISTER_STRIDE;
            let slot = usize::from(addr);
            if offset == SocketRegister::Cr.offset() {
                self.mem[slot] = val;
                if !self.stall_commands {
                    self.command(n, val);
                    self.mem[slot] = 0;
                }
                return;
            }
            if offset == SocketRegister::Ir.offset() {
                self.mem[slot] &= !val;
                return;
            }
        }

        if let Some(b) = self.mem.get_mut(usize::from(addr)) {
            *b = val;
        }
    }

    fn reset(&mut self) {
        self.resets += 1;
        let mr = usize::from(Register::Mr.addr());
        if self.stall_reset {
            self.mem[mr] = 0x80;
            return;
        }
        for b in &mut self.mem[..0x0800] {
            *b = 0;
        }
        self.mem[usize::from(Register::Rmsr.addr())] = 0x55;
        self.mem[usize::from(Register::Tmsr.addr())] = 0x55;
    }

    fn command(&mut self, n: u8, cmd: u8) {
        self.commands.push((n, cmd));
        let status = self.socket_reg_u8(n, SocketRegister::Sr);
        let i = usize::from(n);

        if cmd == Command::Open as u8 {
            let status = match self.socket_reg_u8(n, SocketRegister::Mr) & 0x0f {
                0x01 => Status::Init,
                0x02 => Status::Udp,
                0x03 => Status::IpRaw,
                0x04 => Status::MacRaw,
                0x05 => Status::Pppoe,
                _ => Status::Closed,
            };
            let (_, size) = self.ring(TX_MEMORY_BASE, n);
            let start = self.sockets[i].start_pointer;
            self.set_status(n, status);
            self.set_socket_reg_u8(n, SocketRegister::Ir, 0);
            self.set_socket_reg_u16(n, SocketRegister::TxFsr, size);
            self.set_socket_reg_u16(n, SocketRegister::TxRd, start);
            self.set_socket_reg_u16(n, SocketRegister::TxWr, start);
            self.set_socket_reg_u16(n, SocketRegister::RxRsr, 0);
            self.set_socket_reg_u16(n, SocketRegister::RxRd, start);
            self.sockets[i].rx_wr = start;
            self.sockets[i].rx_acked = start;
        } else if cmd == Command::Listen as u8 {
            if status == Status::Init as u8 {
                self.set_status(n, Status::Listen);
            }
        } else if cmd == Command::Connect as u8 {
            if status == Status::Init as u8 {
                self.set_status(n, Status::SynSent);
            }
        } else if cmd == Command::Disconnect as u8 {
            if status == Status::Established as u8 {
                self.set_status(n, Status::FinWait);
            } else if status == Status::CloseWait as u8 {
                self.set_status(n, Status::Closed);
            }
        } else if cmd == Command::Close as u8 {
            self.set_status(n, Status::Closed);
        } else if cmd == Command::Send as u8 {
            self.transmit(n);
        } else if cmd == Command::Recv as u8 {
            let rd = self.socket_reg_u16(n, SocketRegister::RxRd);
            let consumed = rd.wrapping_sub(self.sockets[i].rx_acked);
            let rsr = self.socket_reg_u16(n, SocketRegister::RxRsr);
            self.set_socket_reg_u16(n, SocketRegister::RxRsr, rsr - consumed);
            self.sockets[i].rx_acked = rd;
        }
    }

    fn transmit(&mut self, n: u8) {
        let (base, size) = self.ring(TX_MEMORY_BASE, n);
        let mut rd = self.socket_reg_u16(n, SocketRegister::TxRd);
        let wr = self.socket_reg_u16(n, SocketRegister::TxWr);
        let mut bytes = Vec::new();
        while rd != wr {
            bytes.push(self.mem[usize::from(base + (rd & (size - 1)))]);
            rd = rd.wrapping_add(1);
        }
        self.set_socket_reg_u16(n, SocketRegister::TxRd, wr);
        self.sent[usize::from(n)].extend_from_slice(&bytes);

        if self.drop_on_send == Some(n) {
            self.set_status(n, Status::Closed);
            return;
        }
        if !self.withhold_send_ok {
            let ir = self.socket_reg_u8(n, SocketRegister::Ir);
            self.set_socket_reg_u8(
                n,
                SocketRegister::Ir,
                ir | Interrupt::SEND_OK.bits(),
            );
        }
        if let Some(peer) = self.sockets[usize::from(n)].peer {
            self.deliver(peer, &bytes);
        }
    }
}

impl Transport for SimChip {
    fn configure(
        &mut self,
        settings: &SpiSettings,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        state.configured += 1;
        state.settings = Some(*settings);
        Ok(())
    }

    fn select(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        assert!(!state.selected, "chip select asserted twice");
        state.selected = true;
        state.partial.clear();
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        assert!(state.selected, "chip select released while idle");
        if !state.fail_transfers {
            assert_eq!(state.partial.len(), 4, "incomplete frame");
        }
        state.selected = false;
        Ok(())
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, TransportError> {
        let mut state = self.state();
        assert!(state.selected, "transfer without chip select");
        if state.fail_transfers {
            return Err(TransportError::Bus);
        }
        state.partial.push(byte);
        if state.partial.len() < 4 {
            // the chip echoes back 0x00, 0x01, 0x02 while taking the header
            return Ok(state.partial.len() as u8 - 1);
        }

        let frame = [
            state.partial[0],
            state.partial[1],
            state.partial[2],
            state.partial[3],
        ];
        state.frames.push(frame);
        let addr = u16::from_be_bytes([frame[1], frame[2]]);
        match frame[0] {
            0x0f => Ok(state.read(addr)),
            0xf0 => {
                state.write(addr, frame[3]);
                Ok(0x03)
            }
            op => panic!("bad opcode {:#x}", op),
        }
    }
}
