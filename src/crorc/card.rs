use thiserror::Error;

use crate::parameters::{GeneratorPattern, ResetLevel};

/// Hardware-programming failure, carrying the offending register value
/// where one exists.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardError {
    #[error("firmware ID register reserved field is {rfid:#010x}, expected 0x2 in bits 24-31")]
    FirmwareMismatch { rfid: u32 },
    #[error("{command} did not complete (status {status:#010x})")]
    CommandTimeout {
        command: &'static str,
        status: u32,
    },
    #[error("optical link is down (status {status:#010x})")]
    LinkDown { status: u32 },
    #[error("RX free FIFO not empty before start (status {status:#010x})")]
    FreeFifoNotEmpty { status: u32 },
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

/// Memory-mapped window into the card's register space.
///
/// Registers are addressed by 32-bit index. All accesses are
/// single-word and volatile; implementations sit directly on a mapped
/// PCI BAR.
pub trait Bar {
    fn read_register(&self, index: usize) -> u32;
    fn write_register(&mut self, index: usize, value: u32);
}

/// `Bar` over an already mapped register window.
///
/// Backs `CardOps` implementations on the real card (the window is the
/// mmap of BAR 0) and register-level tests (the window is plain host
/// memory the test writes into).
pub struct MemoryBar {
    base: *mut u32,
    registers: usize,
}

// Register windows are process-global mappings; only the raw pointer
// makes this !Send.
unsafe impl Send for MemoryBar {}

impl MemoryBar {
    /// # Safety
    /// `base` must point to `registers` mapped 32-bit registers that
    /// stay valid for the lifetime of the value.
    pub unsafe fn new(base: *mut u32, registers: usize) -> Self {
        Self { base, registers }
    }
}

impl Bar for MemoryBar {
    fn read_register(&self, index: usize) -> u32 {
        assert!(index < self.registers, "register index out of range");
        unsafe { std::ptr::read_volatile(self.base.add(index)) }
    }

    fn write_register(&mut self, index: usize, value: u32) {
        assert!(index < self.registers, "register index out of range");
        unsafe { std::ptr::write_volatile(self.base.add(index), value) }
    }
}

/// DIU link configuration discovered at arming time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiuConfig {
    /// Link hardware generation; negative means no DIU plugged.
    pub version: i32,
}

/// Which DDL endpoint a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlTarget {
    Diu,
    Siu,
}

/// The register-programming collaborator the DMA engine drives.
///
/// All operations are synchronous. The engine calls them in the arming,
/// priming, stop and reset sequences; it never touches registers
/// directly except through `push_rx_free_fifo` during the hot loop.
pub trait CardOps {
    /// Probe the DIU hardware generation. Must be called before any
    /// link command.
    fn init_diu_version(&mut self) -> Result<DiuConfig, CardError>;

    /// Reset card state at the given level; higher levels imply the
    /// lower ones plus a SIU reset.
    fn reset(&mut self, level: ResetLevel, diu: &DiuConfig) -> Result<(), CardError>;

    fn arm_ddl(&mut self, target: DdlTarget, diu: &DiuConfig) -> Result<(), CardError>;

    /// Point the card at the ready-FIFO ring and start the receiver.
    fn start_data_receiver(&mut self, ready_fifo_bus_address: u64) -> Result<(), CardError>;

    fn stop_data_receiver(&mut self) -> Result<(), CardError>;

    /// Hand one free page to the card: `words` 32-bit words of room at
    /// `bus_address`, reported back through ring slot `slot_index`.
    fn push_rx_free_fifo(
        &mut self,
        bus_address: u64,
        words: u32,
        slot_index: usize,
    ) -> Result<(), CardError>;

    fn arm_data_generator(
        &mut self,
        initial_value: u32,
        initial_word: u32,
        pattern: GeneratorPattern,
        data_size: usize,
        seed: u32,
    ) -> Result<(), CardError>;

    /// `max_events == None` generates until stopped.
    fn start_data_generator(&mut self, max_events: Option<u32>) -> Result<(), CardError>;

    fn stop_data_generator(&mut self) -> Result<(), CardError>;

    /// Issue the RDYRX trigger command.
    fn start_trigger(&mut self, diu: &DiuConfig) -> Result<(), CardError>;

    /// Issue the EOBTR trigger command.
    fn stop_trigger(&mut self, diu: &DiuConfig) -> Result<(), CardError>;

    fn set_loopback_internal(&mut self) -> Result<(), CardError>;

    fn set_loopback_siu(&mut self, diu: &DiuConfig) -> Result<(), CardError>;

    fn assert_link_up(&mut self) -> Result<(), CardError>;

    fn siu_command(&mut self, op: u32) -> Result<u32, CardError>;

    fn diu_command(&mut self, op: u32) -> Result<u32, CardError>;

    /// The RX free FIFO must be empty before priming a new ring.
    fn assert_free_fifo_empty(&mut self) -> Result<(), CardError>;

    fn read_register(&mut self, index: usize) -> u32;

    fn serial(&mut self) -> Option<i32>;

    fn firmware_info(&mut self) -> Result<String, CardError>;
}
