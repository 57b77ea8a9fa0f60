//! [embedded_hal_async::spi::SpiDevice] over the transfer engine.

use embedded_hal::delay::DelayNs;
use embedded_hal_async::spi::{ErrorType, Operation, SpiDevice};

use super::{ChipSelect, Error, ReceiveBuffer, Spi, TransferRequest, TRANSFER_CAPACITY};
use crate::interrupt::InterruptLine;
use crate::regs::Registers;

/// One device on the bus, addressed through a fixed chip select.
///
/// Each operation is split into transfers of at most [TRANSFER_CAPACITY] words and the final word
/// of the transaction carries the last-transfer flag. The engine is held for the whole
/// transaction. Configure the chip select with `keep_asserted` so it stays low in between.
pub struct Device<'a, R, L, D> {
    spi: &'a Spi<R, L>,
    chip_select: ChipSelect,
    delay: D,
}

impl<'a, R: Registers, L: InterruptLine, D: DelayNs> Device<'a, R, L, D> {
    pub fn new(spi: &'a Spi<R, L>, chip_select: ChipSelect, delay: D) -> Self {
        Self {
            spi,
            chip_select,
            delay,
        }
    }

    pub fn chip_select(&self) -> ChipSelect {
        self.chip_select
    }

    /// Send `len` words taken from `tx`, zero padded, as one transfer.
    async fn exchange(&self, tx: &[u8], len: usize, is_last: bool) -> Result<ReceiveBuffer, Error> {
        let mut request = TransferRequest::new();
        for i in 0..len {
            let payload = tx.get(i).copied().unwrap_or(0);
            request.push(self.chip_select.word(false, payload as u16))?;
        }
        if is_last {
            request.mark_last();
        }

        self.spi.run(request, core::future::pending::<()>()).await
    }

    /// Full-duplex exchange of `max(tx.len(), rx.len())` words.
    async fn exchange_into(&self, tx: &[u8], rx: &mut [u8], ends_transaction: bool) -> Result<(), Error> {
        let total = tx.len().max(rx.len());

        for start in (0..total).step_by(TRANSFER_CAPACITY) {
            let end = (start + TRANSFER_CAPACITY).min(total);
            let received = self
                .exchange(window(tx, start, end), end - start, ends_transaction && end == total)
                .await?;

            let dst_end = end.min(rx.len());
            let dst_start = start.min(dst_end);
            for (dst, word) in rx[dst_start..dst_end].iter_mut().zip(received.iter()) {
                *dst = *word as u8;
            }
        }

        Ok(())
    }
}

fn window(buf: &[u8], start: usize, end: usize) -> &[u8] {
    let end = end.min(buf.len());
    &buf[start.min(end)..end]
}

fn words(op: &Operation<'_, u8>) -> usize {
    match op {
        Operation::Read(buf) => buf.len(),
        Operation::Write(buf) => buf.len(),
        Operation::Transfer(read, write) => read.len().max(write.len()),
        Operation::TransferInPlace(buf) => buf.len(),
        Operation::DelayNs(_) => 0,
    }
}

impl<R, L, D> ErrorType for Device<'_, R, L, D> {
    type Error = Error;
}

impl<R: Registers, L: InterruptLine, D: DelayNs> SpiDevice<u8> for Device<'_, R, L, D> {
    async fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let last = operations.iter().rposition(|op| words(op) > 0);

        let _bus = self.spi.lock.lock().await;

        for (i, op) in operations.iter_mut().enumerate() {
            let ends_transaction = last == Some(i);
            match op {
                Operation::Read(read) => self.exchange_into(&[], read, ends_transaction).await?,
                Operation::Write(write) => self.exchange_into(write, &mut [], ends_transaction).await?,
                Operation::Transfer(read, write) => self.exchange_into(write, read, ends_transaction).await?,
                Operation::TransferInPlace(buf) => {
                    let len = buf.len();
                    for start in (0..len).step_by(TRANSFER_CAPACITY) {
                        let end = (start + TRANSFER_CAPACITY).min(len);
                        let received = self
                            .exchange(&buf[start..end], end - start, ends_transaction && end == len)
                            .await?;
                        for (dst, word) in buf[start..end].iter_mut().zip(received.iter()) {
                            *dst = *word as u8;
                        }
                    }
                }
                Operation::DelayNs(ns) => self.delay.delay_ns(*ns),
            }
        }

        Ok(())
    }
}
