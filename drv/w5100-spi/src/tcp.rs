// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! TCP sockets whose connection state is tracked in the type.

use crate::w5100::{Protocol, Recv, Socket, SocketFlags, Status, W5100};
use core::marker::PhantomData;
use drv_w5100_spi_api::{Transport, W5100Error};
use log::{trace, warn};

#[derive(Copy, Clone, Debug, PartialEq)]
enum Trace {
    Opened(u8),
    Listening(u8),
    Connecting(u8),
    Accepted(u8),
    Connected(u8),
    Disconnect(u8),
    PeerClosed(u8),
    StartRead(u8, usize),
    Read(u8, usize),
    StartWrite(u8, usize),
    Write(u8, usize),
    Close(u8),
    Error(u8),
}

fn record(event: Trace) {
    trace!("tcp: {:?}", event);
}

pub struct TcpSocket<'a, T, State> {
    socket: Socket<'a, T>,
    marker: PhantomData<State>,
}

impl<'a, T: Transport> TcpSocket<'a, T, Init> {
    pub fn open(
        device: &'a W5100<T>,
        slot: u8,
        source_port: u16,
    ) -> Result<Self, W5100Error> {
        let socket = device.open_socket(
            slot,
            Protocol::Tcp,
            source_port,
            SocketFlags::empty(),
        )?;

        match socket.status()? {
            Status::Init => {
                record(Trace::Opened(socket.index()));
                Ok(Self {
                    socket,
                    marker: PhantomData,
                })
            }
            _ => {
                socket.close()?;
                Err(W5100Error::OpenFailed)
            }
        }
    }

    pub fn listen(self) -> Result<TcpSocket<'a, T, Listening>, W5100Error> {
        if let Err(err) = self.socket.listen() {
            return self.fail(err);
        }
        match self.socket.status()? {
            Status::Listen => {
                record(Trace::Listening(self.socket.index()));
                Ok(self.new_state())
            }
            other => self.fail(W5100Error::BadSocketState(other as u8)),
        }
    }

    /// Active open; waits out the handshake.
    pub fn connect(
        self,
        address: [u8; 4],
        port: u16,
    ) -> Result<TcpSocket<'a, T, Established>, W5100Error> {
        if let Err(err) = self.socket.connect(address, port) {
            return self.fail(err);
        }
        record(Trace::Connecting(self.socket.index()));
        let socket = self.wait_established(|s| s == Status::SynSent)?;
        record(Trace::Connected(socket.socket.index()));
        Ok(socket)
    }
}

impl<'a, T: Transport> TcpSocket<'a, T, Listening> {
    pub fn accept(self) -> Result<TcpSocket<'a, T, Established>, W5100Error> {
        let socket = self.wait_established(|s| {
            matches!(s, Status::Listen | Status::SynRecv)
        })?;
        record(Trace::Accepted(socket.socket.index()));
        Ok(socket)
    }
}

impl<'a, T: Transport> TcpSocket<'a, T, Established> {
    pub fn close(self) -> Result<(), W5100Error> {
        record(Trace::Disconnect(self.socket.index()));
        self.socket.disconnect()?;

        // Writing `Disconnect` puts us into `FinWait` until our peer closes
        // their side; close now rather than waiting on them.
        self.close_raw()
    }

    // Returns number of bytes written.
    pub fn write(&self, buf: &[u8]) -> Result<usize, W5100Error> {
        // Make sure we're still connected
        match self.socket.status()? {
            Status::Established => (), // what we expect to be
            Status::CloseWait => {
                // peer requested close
                record(Trace::PeerClosed(self.socket.index()));
                return self.fail(W5100Error::PeerClosed);
            }
            other => {
                return self.fail(W5100Error::BadSocketState(other as u8));
            }
        }

        record(Trace::StartWrite(self.socket.index(), buf.len()));
        match self.socket.send(buf) {
            Ok(0) if !buf.is_empty() => self.fail(W5100Error::PeerClosed),
            Ok(n) => {
                record(Trace::Write(self.socket.index(), n));
                Ok(n)
            }
            Err(err) => self.fail(err),
        }
    }

    // Returns number of bytes read; 0 if peer has closed the connection.
    pub fn read(&self, out: &mut [u8]) -> Result<usize, W5100Error> {
        record(Trace::StartRead(self.socket.index(), out.len()));
        let mut poll = self.socket.poller();
        loop {
            match self.socket.recv(out)? {
                Recv::Data(n) => {
                    record(Trace::Read(self.socket.index(), n));
                    return Ok(n);
                }
                Recv::EndOfStream => {
                    record(Trace::PeerClosed(self.socket.index()));
                    return Ok(0);
                }
                // Running out of polls here leaves the connection open.
                Recv::WouldBlock => poll.tick()?,
            }
        }
    }
}

impl<'a, T: Transport, S> TcpSocket<'a, T, S> {
    pub fn index(&self) -> u8 {
        self.socket.index()
    }

    pub fn status(&self) -> Result<Status, W5100Error> {
        self.socket.status()
    }

    fn wait_established(
        self,
        pending: impl Fn(Status) -> bool,
    ) -> Result<TcpSocket<'a, T, Established>, W5100Error> {
        let mut poll = self.socket.poller();
        loop {
            match self.socket.status() {
                Ok(Status::Established) => return Ok(self.new_state()),
                Ok(status) if pending(status) => {
                    if let Err(err) = poll.tick() {
                        return self.fail(err);
                    }
                }
                Ok(other) => {
                    return self.fail(W5100Error::BadSocketState(other as u8))
                }
                Err(err) => return self.fail(err),
            }
        }
    }

    fn fail<U>(&self, error: W5100Error) -> Result<U, W5100Error> {
        warn!("socket {}: {}", self.socket.index(), error);
        record(Trace::Error(self.socket.index()));
        self.close_raw()?;
        Err(error)
    }

    fn close_raw(&self) -> Result<(), W5100Error> {
        record(Trace::Close(self.socket.index()));
        self.socket.close()
    }

    fn new_state<U>(self) -> TcpSocket<'a, T, U> {
        TcpSocket {
            socket: self.socket,
            marker: PhantomData,
        }
    }
}

// Phantom types for current socket state
pub enum Init {}
pub enum Listening {}
pub enum Established {}
