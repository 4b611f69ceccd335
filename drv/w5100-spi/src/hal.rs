// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`Transport`] over an `embedded-hal` blocking SPI bus and a GPIO chip
//! select.

use drv_w5100_spi_api::{BitOrder, Mode, SpiSettings, Transport, TransportError};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// The bus must already be clocked and set to `mode` by the HAL; we can only
/// check that it matches what the chip wants.
pub struct HalTransport<SPI, CS> {
    spi: SPI,
    cs: CS,
    mode: Mode,
}

impl<SPI, CS> HalTransport<SPI, CS> {
    pub fn new(spi: SPI, cs: CS, mode: Mode) -> Self {
        Self { spi, cs, mode }
    }

    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }
}

impl<SPI, CS> Transport for HalTransport<SPI, CS>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
{
    fn configure(
        &mut self,
        settings: &SpiSettings,
    ) -> Result<(), TransportError> {
        // embedded-hal buses are MSB first
        if settings.mode != self.mode || settings.bit_order != BitOrder::MsbFirst
        {
            return Err(TransportError::UnsupportedSettings);
        }
        // Idle with the chip deselected.
        self.deselect()
    }

    fn select(&mut self) -> Result<(), TransportError> {
        self.cs.set_low().map_err(|_| TransportError::ChipSelect)
    }

    fn deselect(&mut self) -> Result<(), TransportError> {
        self.cs.set_high().map_err(|_| TransportError::ChipSelect)
    }

    fn transfer(&mut self, byte: u8) -> Result<u8, TransportError> {
        let mut buf = [byte];
        let rx = self
            .spi
            .transfer(&mut buf)
            .map_err(|_| TransportError::Bus)?;
        rx.first().copied().ok_or(TransportError::Bus)
    }
}
