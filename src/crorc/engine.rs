use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::buffer::BufferView;
use crate::crorc::card::{CardOps, DdlTarget, DiuConfig};
use crate::crorc::fifo::{FIFO_QUEUE_MAX, READYFIFO_ENTRIES, ReadyFifo, SlotState};
use crate::error::RocError;
use crate::parameters::{GeneratorPattern, LoopbackMode, ResetLevel};
use crate::superpage::{SuperpageEntry, SuperpageQueue};

/// Byte offset of the event-size word group inside the SDH preamble of
/// every DMA page.
const SDH_EVENT_SIZE_OFFSET: usize = 16;

/// Settle time after each hardware reset.
const RESET_SETTLE_INTERVAL: Duration = Duration::from_millis(100);

/// Longest wait for the last primer page before giving up on the check.
const INITIAL_ARRIVAL_WAIT: Duration = Duration::from_millis(10);

const INITIAL_ARRIVAL_POLL: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaState {
    Stopped,
    /// `start_dma` ran; hardware traffic begins on the first
    /// `fill_superpages` that finds a superpage to prime the ring with.
    PendingStart,
    Running,
}

/// Data-generator arming values carried from the channel parameters.
pub struct GeneratorConfig {
    pub pattern: GeneratorPattern,
    pub data_size: usize,
    pub initial_value: u32,
    pub initial_word: u32,
    pub seed: u32,
    /// `None` generates until stopped.
    pub max_events: Option<u32>,
}

impl GeneratorConfig {
    pub fn from_parameters(parameters: &crate::parameters::Parameters) -> Self {
        Self {
            pattern: parameters.generator_pattern,
            data_size: parameters.generator_data_size,
            initial_value: 1,
            initial_word: 0,
            seed: 0,
            max_events: None,
        }
    }
}

pub struct EngineConfig {
    pub page_size: usize,
    pub reset_level: ResetLevel,
    pub loopback: LoopbackMode,
    pub generator: Option<GeneratorConfig>,
    pub rdyrx_enabled: bool,
}

/// The DMA superpage engine.
///
/// Owns the hardware ring bookkeeping, the ready-FIFO view and the
/// superpage queue, and ties them together:
///
/// - bounded ring: `fifo_size <= FIFO_QUEUE_MAX <= READYFIFO_ENTRIES`
/// - oldest first: slot `fifo_back` belongs to the oldest unfilled
///   superpage, and arrivals are consumed strictly in ring order
/// - conservation: pushed pages minus received pages equals `fifo_size`
///
/// Strictly single-threaded: the client thread drives everything through
/// `fill`, which performs at most one push phase and one arrival phase.
pub struct DmaEngine {
    card: Box<dyn CardOps>,
    fifo: ReadyFifo,
    fifo_bus_address: u64,
    queue: SuperpageQueue,
    buffer: BufferView,
    page_size: usize,
    /// Ring index of the oldest unread descriptor.
    fifo_back: usize,
    /// Outstanding descriptors.
    fifo_size: usize,
    state: DmaState,
    reset_level: ResetLevel,
    loopback: LoopbackMode,
    generator: Option<GeneratorConfig>,
    rdyrx_enabled: bool,
    diu: Option<DiuConfig>,
}

impl DmaEngine {
    pub fn new(
        card: Box<dyn CardOps>,
        fifo: ReadyFifo,
        fifo_bus_address: u64,
        buffer: BufferView,
        queue: SuperpageQueue,
        config: EngineConfig,
    ) -> Self {
        Self {
            card,
            fifo,
            fifo_bus_address,
            queue,
            buffer,
            page_size: config.page_size,
            fifo_back: 0,
            fifo_size: 0,
            state: DmaState::Stopped,
            reset_level: config.reset_level,
            loopback: config.loopback,
            generator: config.generator,
            rdyrx_enabled: config.rdyrx_enabled,
            diu: None,
        }
    }

    pub fn state(&self) -> DmaState {
        self.state
    }

    /// Outstanding descriptors in the hardware ring.
    pub fn fifo_size(&self) -> usize {
        self.fifo_size
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn push_entry(&mut self, entry: SuperpageEntry) -> Result<(), RocError> {
        self.queue.add(entry)
    }

    pub fn transfer_queue_available(&self) -> usize {
        self.queue.available()
    }

    pub fn ready_queue_size(&self) -> usize {
        self.queue.filled_len()
    }

    pub fn front_filled(&self) -> Option<&crate::superpage::Superpage> {
        self.queue.front_filled()
    }

    pub fn pop_filled(&mut self) -> Option<crate::superpage::Superpage> {
        self.queue.pop_filled()
    }

    /// `start_dma`: no hardware traffic yet; the ring is armed on the
    /// first `fill` that finds a superpage waiting. Superpages pushed
    /// before this call stay queued.
    pub fn start(&mut self) -> Result<(), RocError> {
        if self.state != DmaState::Stopped {
            warn!("DMA already started");
            return Ok(());
        }
        self.fifo_back = 0;
        self.fifo_size = 0;
        self.fifo.reset_all();
        // Superpages queued before the start stay queued; only in-flight
        // accounting from a previous run is discarded.
        self.queue.reset_transfer_progress();
        self.state = DmaState::PendingStart;
        Ok(())
    }

    /// `stop_dma`: best effort, always completes. Card errors during
    /// stop are logged and swallowed. Filled superpages stay poppable.
    pub fn stop(&mut self) -> Result<(), RocError> {
        if self.state == DmaState::Stopped {
            return Ok(());
        }
        if self.generator.is_some() {
            if let Err(e) = self.card.stop_data_generator() {
                warn!("stopping data generator failed: {e}");
            }
        } else if self.rdyrx_enabled {
            if let Some(diu) = self.diu {
                if let Err(e) = self.card.stop_trigger(&diu) {
                    warn!("end-of-burst trigger failed: {e}");
                }
            }
        }
        if let Err(e) = self.card.stop_data_receiver() {
            warn!("stopping data receiver failed: {e}");
        }
        self.state = DmaState::Stopped;
        Ok(())
    }

    /// `reset_channel`. Permitted in any state; `Nothing` is a no-op.
    pub fn reset(&mut self, level: ResetLevel) -> Result<(), RocError> {
        if level == ResetLevel::Nothing {
            return Ok(());
        }
        let diu = self.diu_config()?;
        if let Err(e) = self.card.reset(level, &diu) {
            warn!(
                "channel reset failed (level {level:?}, loopback {}): {e}",
                self.loopback
            );
            return Err(e.into());
        }
        thread::sleep(RESET_SETTLE_INTERVAL);
        if level == ResetLevel::InternalDiuSiu {
            // The deep reset drops the optical link; re-arm both
            // endpoints and let them settle.
            self.card.arm_ddl(DdlTarget::Diu, &diu)?;
            self.card.arm_ddl(DdlTarget::Siu, &diu)?;
            thread::sleep(RESET_SETTLE_INTERVAL);
        }
        Ok(())
    }

    fn diu_config(&mut self) -> Result<DiuConfig, RocError> {
        if let Some(diu) = self.diu {
            return Ok(diu);
        }
        let diu = self.card.init_diu_version()?;
        self.diu = Some(diu);
        Ok(diu)
    }

    /// The engine tick: at most one push phase and one arrival phase.
    pub fn fill(&mut self) -> Result<(), RocError> {
        match self.state {
            DmaState::Stopped => Ok(()),
            DmaState::PendingStart => {
                if self.queue.pushing_is_empty() {
                    return Ok(());
                }
                self.start_pending_dma()
            }
            DmaState::Running => {
                self.push_phase()?;
                self.arrival_phase()
            }
        }
    }

    /// Deferred start: arm the card, prime the ring with exactly one
    /// full ring of pages from the first superpage, start the data
    /// source, and credit the primed pages.
    fn start_pending_dma(&mut self) -> Result<(), RocError> {
        if let Some(entry) = self.queue.front_pushing_mut() {
            if entry.max_pages < READYFIFO_ENTRIES {
                return Err(RocError::Parameter(
                    "first superpage cannot hold a full descriptor ring",
                ));
            }
        } else {
            return Ok(());
        }

        let diu = self.diu_config()?;
        self.card.reset(self.reset_level, &diu)?;
        thread::sleep(RESET_SETTLE_INTERVAL);
        self.fifo.reset_all();
        self.card.assert_free_fifo_empty()?;
        self.card.start_data_receiver(self.fifo_bus_address)?;

        if let Some(generator) = &self.generator {
            match self.loopback {
                LoopbackMode::Internal => self.card.set_loopback_internal()?,
                LoopbackMode::Siu => {
                    self.card.set_loopback_siu(&diu)?;
                    self.card.assert_link_up()?;
                }
                LoopbackMode::None | LoopbackMode::Diu | LoopbackMode::Rorc => {}
            }
            self.card.arm_data_generator(
                generator.initial_value,
                generator.initial_word,
                generator.pattern,
                generator.data_size,
                generator.seed,
            )?;
        } else {
            // Real detector data: bring up both DDL endpoints before
            // any trigger command can go out.
            self.card.arm_ddl(DdlTarget::Diu, &diu)?;
            self.card.arm_ddl(DdlTarget::Siu, &diu)?;
            self.card.assert_link_up()?;
        }

        let page_size = self.page_size;
        if let Some(entry) = self.queue.front_pushing_mut() {
            for slot in 0..READYFIFO_ENTRIES {
                let bus = entry.bus_address + (entry.pushed_pages * page_size) as u64;
                self.card
                    .push_rx_free_fifo(bus, (page_size / 4) as u32, slot)?;
                entry.pushed_pages += 1;
            }
        }

        if let Some(generator) = &self.generator {
            self.card.start_data_generator(generator.max_events)?;
        } else if self.rdyrx_enabled {
            self.card.start_trigger(&diu)?;
        }

        // The card should fill the whole primed ring promptly; poll the
        // last slot, bounded, before crediting.
        let deadline = Instant::now() + INITIAL_ARRIVAL_WAIT;
        loop {
            if matches!(
                self.fifo.slot_state(READYFIFO_ENTRIES - 1),
                SlotState::Arrived { .. }
            ) {
                break;
            }
            if Instant::now() >= deadline {
                warn!("last initial page did not arrive within the primer wait");
                break;
            }
            thread::sleep(INITIAL_ARRIVAL_POLL);
        }
        self.fifo.reset_all();
        self.fifo_back = 0;
        self.fifo_size = 0;

        if let Some(entry) = self.queue.front_pushing_mut() {
            entry.superpage.received += READYFIFO_ENTRIES * page_size;
            if entry.superpage.received == entry.superpage.size {
                entry.superpage.ready = true;
            }
            if entry.is_fully_pushed() {
                self.queue.mark_front_pushed();
            }
        }
        self.queue.move_ready_to_filled();

        debug!("deferred DMA start complete");
        self.state = DmaState::Running;
        Ok(())
    }

    /// Hand free pages of the front pushing superpage to the card, as
    /// many as free ring slots and the superpage allow.
    fn push_phase(&mut self) -> Result<(), RocError> {
        let free_slots = FIFO_QUEUE_MAX - self.fifo_size;
        let page_size = self.page_size;
        let Some(entry) = self.queue.front_pushing_mut() else {
            return Ok(());
        };
        let unpushed = entry.max_pages - entry.pushed_pages;
        for _ in 0..free_slots.min(unpushed) {
            let slot = (self.fifo_back + self.fifo_size) % READYFIFO_ENTRIES;
            let bus = entry.bus_address + (entry.pushed_pages * page_size) as u64;
            self.card
                .push_rx_free_fifo(bus, (page_size / 4) as u32, slot)?;
            self.fifo_size += 1;
            entry.pushed_pages += 1;
        }
        if entry.is_fully_pushed() {
            self.queue.mark_front_pushed();
        }
        Ok(())
    }

    /// Harvest arrivals in ring order, never skipping ahead of
    /// `fifo_back`.
    fn arrival_phase(&mut self) -> Result<(), RocError> {
        let page_size = self.page_size;
        let buffer = self.buffer;
        self.queue.move_ready_to_filled();
        while self.fifo_size > 0 {
            let slot = self.fifo_back;
            let (length, error) = match self.fifo.slot_state(slot) {
                // In-order arrival: nothing past this slot can have
                // landed either.
                SlotState::Empty | SlotState::Partial => break,
                SlotState::Arrived { length, error } => (length, error),
                SlotState::Unexpected => return self.fail(slot),
            };
            if error {
                return self.fail(slot);
            }
            let Some(entry) = self.queue.front_arrivals_mut() else {
                break;
            };
            if entry.superpage.received == entry.superpage.size {
                // Completed but the ready side is full; hold the
                // descriptor until the client pops.
                break;
            }
            patch_event_size(
                buffer,
                entry.superpage.offset + entry.superpage.received,
                length,
            );
            self.fifo.reset_slot(slot);
            self.fifo_size -= 1;
            self.fifo_back = (self.fifo_back + 1) % READYFIFO_ENTRIES;
            entry.superpage.received += page_size;
            if entry.superpage.received == entry.superpage.size {
                entry.superpage.ready = true;
            }
            self.queue.move_ready_to_filled();
        }
        Ok(())
    }

    /// Fail the channel on a malformed descriptor. The queue and ring
    /// are discarded; the client must reset and start again.
    fn fail(&mut self, index: usize) -> Result<(), RocError> {
        let status = self.fifo.status(index);
        let length = self.fifo.length(index);
        self.state = DmaState::Stopped;
        self.queue.clear();
        self.fifo_back = 0;
        self.fifo_size = 0;
        Err(RocError::DataArrival {
            status,
            length,
            index,
        })
    }
}

/// Write the event size into the SDH of an arrived page.
///
/// The current firmware leaves the SDH event-size field unset; drop this
/// once a firmware version that fills it in is establishable.
fn patch_event_size(buffer: BufferView, page_offset: usize, length: u32) {
    if buffer.ptr.is_null() {
        return;
    }
    unsafe {
        let sdh = buffer.ptr.add(page_offset + SDH_EVENT_SIZE_OFFSET).cast::<u32>();
        ptr::write_volatile(sdh, 0);
        ptr::write_volatile(sdh.add(1), 0);
        ptr::write_volatile(sdh.add(2), 0);
        ptr::write_volatile(sdh.add(3), length);
    }
}
