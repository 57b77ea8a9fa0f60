//! ILI9341 240x320 TFT controller on the 9-bit serial interface.
//!
//! In 9-bit mode the data/command selection travels as bit 8 of every word, so pixel traffic
//! needs no pin toggling. The D/C pin is still driven low for standalone commands.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::interrupt::InterruptLine;
use crate::regs::Registers;
use crate::spi::{self, ChipSelect, Spi, TransferRequest};

pub const WIDTH: u16 = 240;
pub const HEIGHT: u16 = 320;

/// Marks a word as parameter or pixel data rather than a command.
pub const DATA_BIT: u16 = 1 << 8;

pub mod command {
    pub const ENTER_SLEEP_MODE: u8 = 0x10;
    pub const SLEEP_OUT: u8 = 0x11;
    pub const DISPLAY_OFF: u8 = 0x28;
    pub const DISPLAY_ON: u8 = 0x29;
    pub const COLUMN_ADDRESS_SET: u8 = 0x2A;
    pub const PAGE_ADDRESS_SET: u8 = 0x2B;
    pub const MEMORY_WRITE: u8 = 0x2C;
    pub const MEMORY_WRITE_CONTINUE: u8 = 0x3C;
}

const RESET_PULSE_MS: u32 = 10;
const RESET_SETTLE_MS: u32 = 150;
const SLEEP_SETTLE_MS: u32 = 150;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    Spi(spi::Error),
    /// The reset or D/C pin could not be driven.
    Pin,
}

impl From<spi::Error> for Error {
    fn from(value: spi::Error) -> Self {
        Error::Spi(value)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Spi(e) => write!(f, "spi: {e}"),
            Error::Pin => write!(f, "control pin failure"),
        }
    }
}

fn data(cs: ChipSelect, byte: u8) -> spi::ControlWord {
    cs.word(false, DATA_BIT | byte as u16)
}

fn push_color(request: &mut TransferRequest, cs: ChipSelect, color: u16) -> Result<(), spi::Error> {
    let [hi, lo] = color.to_be_bytes();
    request.push(data(cs, hi))?;
    request.push(data(cs, lo))
}

/// Append the 10 words selecting the column range `x0..=x1` and page range `y0..=y1`.
pub fn address_window(
    request: &mut TransferRequest,
    cs: ChipSelect,
    x0: u16,
    y0: u16,
    x1: u16,
    y1: u16,
) -> Result<(), spi::Error> {
    for (cmd, start, end) in [(command::COLUMN_ADDRESS_SET, x0, x1), (command::PAGE_ADDRESS_SET, y0, y1)] {
        let [start_hi, start_lo] = start.to_be_bytes();
        let [end_hi, end_lo] = end.to_be_bytes();
        request.extend_from_slice(&[
            cs.word(false, cmd as u16),
            data(cs, start_hi),
            data(cs, start_lo),
            data(cs, end_hi),
            data(cs, end_lo),
        ])?;
    }
    Ok(())
}

/// ILI9341 display driver.
pub struct Ili9341<'a, R, L, DC, RST, D> {
    spi: &'a Spi<R, L>,
    cs: ChipSelect,
    dc: DC,
    rst: RST,
    delay: D,
}

impl<'a, R, L, DC, RST, D> Ili9341<'a, R, L, DC, RST, D>
where
    R: Registers,
    L: InterruptLine,
    DC: OutputPin,
    RST: OutputPin,
    D: DelayNs,
{
    pub fn new(spi: &'a Spi<R, L>, cs: ChipSelect, dc: DC, rst: RST, delay: D) -> Self {
        Self {
            spi,
            cs,
            dc,
            rst,
            delay,
        }
    }

    /// Hardware reset followed by wake up.
    pub async fn init(&mut self) -> Result<(), Error> {
        self.reset()?;
        self.exit_standby().await
    }

    pub fn reset(&mut self) -> Result<(), Error> {
        self.rst.set_high().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.rst.set_low().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(RESET_PULSE_MS);
        self.rst.set_high().map_err(|_| Error::Pin)?;
        self.delay.delay_ms(RESET_SETTLE_MS);
        Ok(())
    }

    pub async fn exit_standby(&mut self) -> Result<(), Error> {
        self.send_command(command::SLEEP_OUT).await?;
        self.delay.delay_ms(SLEEP_SETTLE_MS);
        self.send_command(command::DISPLAY_ON).await
    }

    pub async fn enter_standby(&mut self) -> Result<(), Error> {
        self.send_command(command::DISPLAY_OFF).await?;
        self.delay.delay_ms(SLEEP_SETTLE_MS);
        self.send_command(command::ENTER_SLEEP_MODE).await
    }

    /// Send a parameterless command.
    pub async fn send_command(&mut self, cmd: u8) -> Result<(), Error> {
        self.dc.set_low().map_err(|_| Error::Pin)?;
        let request = TransferRequest::from_words(&[self.cs.word(true, cmd as u16)])?;
        self.spi.transceive(request).await?;
        Ok(())
    }

    /// Set one pixel to an RGB565 `color`. Coordinates off screen are ignored.
    pub async fn draw_pixel(&mut self, x: u16, y: u16, color: u16) -> Result<(), Error> {
        if x >= WIDTH || y >= HEIGHT {
            return Ok(());
        }

        let mut request = TransferRequest::new();
        address_window(&mut request, self.cs, x, y, x, y)?;
        request.push(self.cs.word(false, command::MEMORY_WRITE as u16))?;
        push_color(&mut request, self.cs, color)?;
        request.mark_last();

        self.spi.transceive(request).await?;
        Ok(())
    }

    /// Draw `h` pixels down from `(x, y)`, clipped to the screen.
    pub async fn draw_vline(&mut self, x: u16, y: u16, h: u16, color: u16) -> Result<(), Error> {
        if x >= WIDTH || y >= HEIGHT || h == 0 {
            return Ok(());
        }
        let h = h.min(HEIGHT - y);

        let mut request = TransferRequest::new();
        address_window(&mut request, self.cs, x, y, x, y + h - 1)?;
        request.push(self.cs.word(false, command::MEMORY_WRITE as u16))?;

        let mut remaining = h;
        while remaining > 0 {
            while remaining > 0 && request.remaining_capacity() >= 2 {
                push_color(&mut request, self.cs, color)?;
                remaining -= 1;
            }
            request.mark_last();
            self.spi.transceive(core::mem::take(&mut request)).await?;

            if remaining > 0 {
                request.push(self.cs.word(false, command::MEMORY_WRITE_CONTINUE as u16))?;
            }
        }

        Ok(())
    }
}
