//! Transmit words and transfer buffers.
//!
//! The controller runs with variable peripheral select (`SPI_MR.PS`), so every word handed to the
//! PDC carries its own chip select and last-transfer flag next to the payload:
//!
//! ```text
//!  31      25  24        23  20 19  16 15             0
//! +----------+----------+------+------+----------------+
//! |    0     | LASTXFER |  0   | PCS  |    payload     |
//! +----------+----------+------+------+----------------+
//! ```

use core::ops::Deref;

use super::Error;

/// Maximum number of words in one transfer.
pub const TRANSFER_CAPACITY: usize = 64;

const LASTXFER: u32 = 1 << 24;
const PCS_SHIFT: u32 = 16;

/// One 32-bit word of the transmit stream.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControlWord(u32);

impl ControlWord {
    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn payload(self) -> u16 {
        self.0 as u16
    }

    pub const fn is_last(self) -> bool {
        self.0 & LASTXFER != 0
    }

    /// Copy of this word with the last-transfer flag set.
    pub const fn last(self) -> Self {
        Self(self.0 | LASTXFER)
    }
}

impl From<ControlWord> for u32 {
    fn from(value: ControlWord) -> Self {
        value.0
    }
}

/// Peripheral chip select line.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChipSelect {
    Cs0,
    Cs1,
    Cs2,
    Cs3,
}

impl ChipSelect {
    pub const ALL: [ChipSelect; 4] = [ChipSelect::Cs0, ChipSelect::Cs1, ChipSelect::Cs2, ChipSelect::Cs3];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// PCS field value driving NPCSn low and the lower-numbered lines high.
    const fn pcs(self) -> u32 {
        match self {
            ChipSelect::Cs0 => 0b0000,
            ChipSelect::Cs1 => 0b0001,
            ChipSelect::Cs2 => 0b0011,
            ChipSelect::Cs3 => 0b0111,
        }
    }

    /// Encode `payload` for this chip select.
    pub const fn word(self, is_last: bool, payload: u16) -> ControlWord {
        let bits = (self.pcs() << PCS_SHIFT) | payload as u32;
        if is_last {
            ControlWord(bits | LASTXFER)
        } else {
            ControlWord(bits)
        }
    }
}

impl TryFrom<u8> for ChipSelect {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ChipSelect::Cs0),
            1 => Ok(ChipSelect::Cs1),
            2 => Ok(ChipSelect::Cs2),
            3 => Ok(ChipSelect::Cs3),
            n => Err(Error::InvalidChipSelect(n)),
        }
    }
}

/// Encode one transmit word from a raw chip select index.
pub fn word(is_last: bool, chip_select: u8, payload: u16) -> Result<ControlWord, Error> {
    Ok(ChipSelect::try_from(chip_select)?.word(is_last, payload))
}

/// Words to transmit plus an optional callback run from the completion interrupt.
#[derive(Clone, Debug, Default)]
pub struct TransferRequest {
    pub(super) words: heapless::Vec<ControlWord, TRANSFER_CAPACITY>,
    pub(super) callback: Option<fn()>,
}

impl TransferRequest {
    pub const fn new() -> Self {
        Self {
            words: heapless::Vec::new(),
            callback: None,
        }
    }

    pub fn from_words(words: &[ControlWord]) -> Result<Self, Error> {
        let mut request = Self::new();
        request.extend_from_slice(words)?;
        Ok(request)
    }

    /// Run `callback` in interrupt context once the transfer completes, before the waiting task
    /// is resumed.
    pub fn with_callback(mut self, callback: fn()) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn push(&mut self, word: ControlWord) -> Result<(), Error> {
        self.words.push(word).map_err(|_| Error::TransferTooLong {
            len: self.words.len() + 1,
            capacity: TRANSFER_CAPACITY,
        })
    }

    pub fn extend_from_slice(&mut self, words: &[ControlWord]) -> Result<(), Error> {
        self.words.extend_from_slice(words).map_err(|_| Error::TransferTooLong {
            len: self.words.len() + words.len(),
            capacity: TRANSFER_CAPACITY,
        })
    }

    /// Set the last-transfer flag on the final word, if any.
    pub fn mark_last(&mut self) {
        if let Some(w) = self.words.last_mut() {
            *w = w.last();
        }
    }

    pub fn words(&self) -> &[ControlWord] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        TRANSFER_CAPACITY - self.words.len()
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.callback = None;
    }
}

/// Words received during a transfer, one per transmitted word, in order.
///
/// Only the low 16 bits (`SPI_RDR.RD`) of each word carry data.
#[derive(Clone, Debug)]
pub struct ReceiveBuffer {
    pub(super) words: [u32; TRANSFER_CAPACITY],
    pub(super) len: usize,
}

impl ReceiveBuffer {
    pub(super) const fn zeroed(len: usize) -> Self {
        Self {
            words: [0; TRANSFER_CAPACITY],
            len,
        }
    }

    /// Received payload of word `index`.
    pub fn payload(&self, index: usize) -> Option<u16> {
        self.get(index).map(|w| *w as u16)
    }
}

impl Deref for ReceiveBuffer {
    type Target = [u32];

    fn deref(&self) -> &Self::Target {
        &self.words[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chip_select_routing() {
        assert_eq!(word(false, 0, 0).unwrap().bits(), 0);
        assert_eq!(word(false, 1, 0).unwrap().bits(), 1 << 16);
        assert_eq!(word(false, 2, 0).unwrap().bits(), 3 << 16);
        assert_eq!(word(false, 3, 0).unwrap().bits(), 7 << 16);
    }

    #[test]
    fn last_flag_and_payload() {
        assert_eq!(word(true, 0, 0xABCD).unwrap().bits(), (1 << 24) | 0xABCD);
        assert_eq!(word(true, 1, 0x2C).unwrap().bits(), (1 << 24) | (1 << 16) | 0x2C);
        assert_eq!(word(true, 3, 0xFFFF).unwrap().bits(), 0x0107_FFFF);
        assert_eq!(word(false, 2, 0x0100).unwrap().bits(), 0x0003_0100);
    }

    #[test]
    fn typed_and_raw_encoders_agree() {
        for (i, cs) in ChipSelect::ALL.into_iter().enumerate() {
            for last in [false, true] {
                assert_eq!(cs.word(last, 0x1234), word(last, i as u8, 0x1234).unwrap());
            }
        }
    }

    #[test]
    fn invalid_chip_select() {
        assert_eq!(word(true, 4, 0), Err(Error::InvalidChipSelect(4)));
        assert_eq!(word(false, 255, 1), Err(Error::InvalidChipSelect(255)));
    }

    #[test]
    fn request_capacity() {
        let mut request = TransferRequest::new();
        for i in 0..TRANSFER_CAPACITY {
            request.push(ChipSelect::Cs0.word(false, i as u16)).unwrap();
        }
        assert_eq!(request.remaining_capacity(), 0);
        assert_eq!(
            request.push(ChipSelect::Cs0.word(true, 0)),
            Err(Error::TransferTooLong {
                len: TRANSFER_CAPACITY + 1,
                capacity: TRANSFER_CAPACITY
            })
        );
    }

    #[test]
    fn mark_last_touches_final_word_only() {
        let mut request =
            TransferRequest::from_words(&[ChipSelect::Cs1.word(false, 1), ChipSelect::Cs1.word(false, 2)]).unwrap();
        request.mark_last();

        assert!(!request.words()[0].is_last());
        assert!(request.words()[1].is_last());
        assert_eq!(request.words()[1].payload(), 2);
    }

    #[test]
    fn receive_buffer_exposes_transfer_length() {
        let mut rx = ReceiveBuffer::zeroed(3);
        rx.words[2] = 0x0001_00FF;
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.payload(2), Some(0x00FF));
        assert_eq!(rx.payload(3), None);
    }
}
