//! Register map mock used to test the drivers without hardware.

use std::collections::{HashMap, HashSet, VecDeque};

use super::{BusError, RegisterTransport};

/// A single bus transaction recorded by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    WriteByte(u8, u8),
    WriteBlock(u8, Vec<u8>),
}

/// A device register file.
///
/// Reads return the register file contents unless a value has been queued for that register with
/// [`MockTransport::queue_read`], in which case queued values are consumed first. Writes update the
/// register file and are recorded in order.
///
/// Byte addressed devices (MPU9250) store a word as two sequential registers, see
/// [`MockTransport::set_pair`]. Word addressed devices (INA219) hold 16 bits behind each pointer,
/// see [`MockTransport::set_word`].
pub struct MockTransport {
    pub regs: [u8; 256],

    /// 16 bit registers, served by `read_word` ahead of the byte file
    words: HashMap<u8, [u8; 2]>,

    queued: HashMap<u8, VecDeque<u8>>,
    failing: HashSet<u8>,
    pub writes: Vec<Transaction>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            regs: [0; 256],
            words: HashMap::new(),
            queued: HashMap::new(),
            failing: HashSet::new(),
            writes: Vec::new(),
        }
    }

    /// Set a register in the file.
    pub fn set(&mut self, reg: u8, value: u8) {
        self.regs[reg as usize] = value;
    }

    /// Set two sequential registers in the file in bus order.
    pub fn set_pair(&mut self, reg: u8, first: u8, second: u8) {
        self.set(reg, first);
        self.set(reg.wrapping_add(1), second);
    }

    /// Set a 16 bit register in bus order, leaving the neighbouring pointer untouched.
    pub fn set_word(&mut self, reg: u8, first: u8, second: u8) {
        self.words.insert(reg, [first, second]);
    }

    /// Queue a value to be returned by the next read of a register.
    pub fn queue_read(&mut self, reg: u8, value: u8) {
        self.queued.entry(reg).or_default().push_back(value);
    }

    /// Make every access to the register fail.
    pub fn fail(&mut self, reg: u8) {
        self.failing.insert(reg);
    }

    /// Stop failing accesses to the register.
    pub fn heal(&mut self, reg: u8) {
        self.failing.remove(&reg);
    }

    /// Position of the first recorded write matching the transaction.
    pub fn position(&self, t: &Transaction) -> Option<usize> {
        self.writes.iter().position(|w| w == t)
    }

    fn check(&self, reg: u8) -> Result<(), BusError> {
        if self.failing.contains(&reg) {
            Err(BusError::Read { reg, msg: "injected failure".into() })
        }
        else {
            Ok(())
        }
    }

    fn next(&mut self, reg: u8) -> u8 {
        match self.queued.get_mut(&reg).and_then(|q| q.pop_front()) {
            Some(v) => v,
            None => self.regs[reg as usize]
        }
    }
}

impl RegisterTransport for MockTransport {
    fn read_byte(&mut self, reg: u8) -> Result<u8, BusError> {
        self.check(reg)?;
        Ok(self.next(reg))
    }

    fn read_word(&mut self, reg: u8) -> Result<u16, BusError> {
        self.check(reg)?;
        if let Some([lo, hi]) = self.words.get(&reg) {
            return Ok(u16::from_le_bytes([*lo, *hi]))
        }
        let lo = self.next(reg);
        let hi = self.next(reg.wrapping_add(1));
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn write_byte(&mut self, reg: u8, value: u8) -> Result<(), BusError> {
        if self.failing.contains(&reg) {
            return Err(BusError::Write { reg, msg: "injected failure".into() })
        }
        self.regs[reg as usize] = value;
        self.writes.push(Transaction::WriteByte(reg, value));
        Ok(())
    }

    fn write_block(&mut self, reg: u8, bytes: &[u8]) -> Result<(), BusError> {
        if self.failing.contains(&reg) {
            return Err(BusError::Write { reg, msg: "injected failure".into() })
        }
        if let (Some(word), [first, second]) = (self.words.get_mut(&reg), bytes) {
            *word = [*first, *second];
        }
        else {
            for (i, b) in bytes.iter().enumerate() {
                self.regs[reg.wrapping_add(i as u8) as usize] = *b;
            }
        }
        self.writes.push(Transaction::WriteBlock(reg, bytes.to_vec()));
        Ok(())
    }
}
