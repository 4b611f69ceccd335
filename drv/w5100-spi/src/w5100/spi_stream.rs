// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// See W5100 datasheet section 6.3.2; each read/write is a 32-bit stream
// containing a 1-byte opcode, 2-byte address, and 1-byte data. There is no
// burst mode: multi-byte accesses are one stream per byte.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct SpiStream([u8; 4]);

impl SpiStream {
    pub(crate) const OP_WRITE: u8 = 0xf0;
    pub(crate) const OP_READ: u8 = 0x0f;

    pub(crate) fn write(addr: u16, data: u8) -> Self {
        let [hi, lo] = addr.to_be_bytes();
        Self([Self::OP_WRITE, hi, lo, data])
    }

    // The data byte of a read is a dummy; the chip answers during it.
    pub(crate) fn read(addr: u16) -> Self {
        let [hi, lo] = addr.to_be_bytes();
        Self([Self::OP_READ, hi, lo, 0])
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub(crate) fn addr(&self) -> u16 {
        u16::from_be_bytes([self.0[1], self.0[2]])
    }

    pub(crate) fn set_data(&mut self, val: u8) {
        self.0[3] = val;
    }

    // Wraps at 0xffff, which is well past the end of the chip's memory.
    pub(crate) fn increment_addr(&mut self) {
        let [hi, lo] = self.addr().wrapping_add(1).to_be_bytes();
        self.0[1] = hi;
        self.0[2] = lo;
    }
}
