//! The register bank backing the controllable server.
//!
//! One 16-bit cell per mapped register. All accesses go through a single lock,
//! which is what gives `set_bit`/`clear_bit` their per-register
//! read-modify-write atomicity with respect to the mirror task and the Modbus
//! front end.

use std::pin::pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

use crate::registers::{ADDRESSES, BitIndex, RegisterIndex};

pub struct RegisterBank {
    cells: Mutex<[u16; ADDRESSES.len()]>,
    generation: AtomicU64,
    update_notify: Notify,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self {
            cells: Mutex::new([0; ADDRESSES.len()]),
            generation: AtomicU64::new(0),
            update_notify: Notify::new(),
        }
    }

    pub fn get(&self, register: RegisterIndex) -> u16 {
        let cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells[register.0]
    }

    pub fn set(&self, register: RegisterIndex, value: u16) {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        cells[register.0] = value;
    }

    /// Sets or clears exactly one bit, leaving the remaining fifteen intact.
    pub fn set_bit(&self, register: RegisterIndex, bit: BitIndex, value: bool) {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        if value {
            cells[register.0] |= bit.mask();
        } else {
            cells[register.0] &= !bit.mask();
        }
    }

    pub fn clear_bit(&self, register: RegisterIndex, bit: BitIndex) {
        self.set_bit(register, bit, false);
    }

    pub fn get_bit(&self, register: RegisterIndex, bit: BitIndex) -> bool {
        self.get(register) & bit.mask() != 0
    }

    /// Runs `mutate` over the whole cell array under a single lock
    /// acquisition. The mirror task uses this so one pass is atomic with
    /// respect to every other accessor.
    pub(crate) fn with_cells<R>(&self, mutate: impl FnOnce(&mut [u16; ADDRESSES.len()]) -> R) -> R {
        let mut cells = self.cells.lock().unwrap_or_else(|e| e.into_inner());
        mutate(&mut cells)
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Called by the mirror task at the end of every pass.
    pub(crate) fn complete_pass(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.update_notify.notify_waiters();
    }

    /// Waits until the pass counter moves past `generation`.
    pub async fn wait_past(&self, generation: u64) {
        loop {
            let mut notified = pin!(self.update_notify.notified());
            notified.as_mut().enable();
            if self.generation() > generation {
                return;
            }
            notified.await;
        }
    }
}

impl Default for RegisterBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(name: &str) -> RegisterIndex {
        RegisterIndex::from_name(name).unwrap()
    }

    #[test]
    fn whole_register_get_set() {
        let bank = RegisterBank::new();
        bank.set(reg("REG_TEST"), 0x1234);
        assert_eq!(bank.get(reg("REG_TEST")), 0x1234);
        bank.set(reg("REG_TEST"), 0);
        assert_eq!(bank.get(reg("REG_TEST")), 0);
    }

    #[test]
    fn setting_a_bit_leaves_the_rest_alone() {
        let bank = RegisterBank::new();
        bank.set_bit(reg("REG_TEST"), BitIndex::new(3).unwrap(), true);
        assert_eq!(bank.get(reg("REG_TEST")), 0x08);

        bank.set(reg("REG_TEST"), 0xAAAA);
        bank.set_bit(reg("REG_TEST"), BitIndex::new(1).unwrap(), false);
        assert_eq!(bank.get(reg("REG_TEST")), 0xAAA8);
    }

    #[test]
    fn clear_bit_is_set_bit_false() {
        let bank = RegisterBank::new();
        bank.set(reg("REG_TEST"), 0xAAAA);
        bank.clear_bit(reg("REG_TEST"), BitIndex::new(1).unwrap());
        assert_eq!(bank.get(reg("REG_TEST")), 0xAAA8);
        assert!(!bank.get_bit(reg("REG_TEST"), BitIndex::new(2).unwrap()));
        assert!(bank.get_bit(reg("REG_TEST"), BitIndex::new(3).unwrap()));
    }

    #[test]
    fn bit_ops_touch_only_the_named_register() {
        let bank = RegisterBank::new();
        bank.set(reg("REG_MODE"), 0xFFFF);
        bank.set_bit(reg("REG_TEST"), BitIndex::new(0).unwrap(), true);
        assert_eq!(bank.get(reg("REG_MODE")), 0xFFFF);
        bank.clear_bit(reg("REG_MODE"), BitIndex::new(7).unwrap());
        assert_eq!(bank.get(reg("REG_TEST")), 0x01);
        assert_eq!(bank.get(reg("REG_MODE")), 0xFF7F);
    }

    #[tokio::test]
    async fn wait_past_observes_completed_passes() {
        let bank = std::sync::Arc::new(RegisterBank::new());
        let start = bank.generation();
        let waiter = tokio::spawn({
            let bank = std::sync::Arc::clone(&bank);
            async move { bank.wait_past(start).await }
        });
        bank.complete_pass();
        waiter.await.unwrap();
        assert_eq!(bank.generation(), start + 1);
    }
}
