//! End-to-end channel scenarios against a scripted card.
//!
//! The card is simulated at the `CardOps` seam: pushes into the RX free
//! FIFO are recorded, and (unless disabled) each push immediately writes
//! the matching arrival descriptor into the ready-FIFO memory, the way
//! the real card's DMA engine reports completions.

use std::cell::RefCell;
use std::ptr;
use std::rc::Rc;

use rocdma::buffer::{BufferView, DmaBuffer, alloc_dma_buffer};
use rocdma::channel::{CardType, DmaChannel};
use rocdma::crorc::CrorcChannel;
use rocdma::crorc::card::{CardError, CardOps, DdlTarget, DiuConfig};
use rocdma::crorc::fifo::{READYFIFO_BYTES, READYFIFO_ENTRIES, ReadyFifoEntry};
use rocdma::error::RocError;
use rocdma::parameters::{GeneratorPattern, Parameters, ResetLevel};
use rocdma::pci::{CardId, PciAddress};
use rocdma::superpage::Superpage;

const MIB: usize = 1024 * 1024;
const PAGE: usize = 8 * 1024;
const PAGE_WORDS: u32 = (PAGE / 4) as u32;

/// Status word of a clean whole arrival.
const STATUS_OK: i32 = 0x82;

#[derive(Default)]
struct CardState {
    /// (bus_address, words, slot) per free-FIFO push.
    pushes: Vec<(u64, u32, usize)>,
    resets: Vec<ResetLevel>,
    ddl_arms: Vec<DdlTarget>,
    receiver_starts: usize,
    receiver_stops: usize,
    generator_starts: usize,
    generator_stops: usize,
    /// When false the simulated card never reports arrivals.
    arrivals_enabled: bool,
}

struct TestCard {
    fifo_base: *mut u8,
    state: Rc<RefCell<CardState>>,
    /// Write this status instead of `STATUS_OK` for the given push index.
    inject: Option<(usize, i32)>,
}

impl TestCard {
    fn write_arrival(&self, slot: usize, status: i32, length: u32) {
        unsafe {
            let entry = self.fifo_base.cast::<ReadyFifoEntry>().add(slot);
            ptr::write_volatile(&raw mut (*entry).length, length);
            ptr::write_volatile(&raw mut (*entry).status, status);
        }
    }
}

impl CardOps for TestCard {
    fn init_diu_version(&mut self) -> Result<DiuConfig, CardError> {
        Ok(DiuConfig { version: 1 })
    }

    fn reset(&mut self, level: ResetLevel, _diu: &DiuConfig) -> Result<(), CardError> {
        self.state.borrow_mut().resets.push(level);
        Ok(())
    }

    fn arm_ddl(&mut self, target: DdlTarget, _diu: &DiuConfig) -> Result<(), CardError> {
        self.state.borrow_mut().ddl_arms.push(target);
        Ok(())
    }

    fn start_data_receiver(&mut self, _ready_fifo_bus_address: u64) -> Result<(), CardError> {
        self.state.borrow_mut().receiver_starts += 1;
        Ok(())
    }

    fn stop_data_receiver(&mut self) -> Result<(), CardError> {
        self.state.borrow_mut().receiver_stops += 1;
        Ok(())
    }

    fn push_rx_free_fifo(
        &mut self,
        bus_address: u64,
        words: u32,
        slot_index: usize,
    ) -> Result<(), CardError> {
        let (index, arrive) = {
            let mut state = self.state.borrow_mut();
            let index = state.pushes.len();
            state.pushes.push((bus_address, words, slot_index));
            (index, state.arrivals_enabled)
        };
        if arrive {
            let status = match self.inject {
                Some((at, status)) if at == index => status,
                _ => STATUS_OK,
            };
            self.write_arrival(slot_index, status, words);
        }
        Ok(())
    }

    fn arm_data_generator(
        &mut self,
        _initial_value: u32,
        _initial_word: u32,
        _pattern: GeneratorPattern,
        _data_size: usize,
        _seed: u32,
    ) -> Result<(), CardError> {
        Ok(())
    }

    fn start_data_generator(&mut self, _max_events: Option<u32>) -> Result<(), CardError> {
        self.state.borrow_mut().generator_starts += 1;
        Ok(())
    }

    fn stop_data_generator(&mut self) -> Result<(), CardError> {
        self.state.borrow_mut().generator_stops += 1;
        Ok(())
    }

    fn start_trigger(&mut self, _diu: &DiuConfig) -> Result<(), CardError> {
        Ok(())
    }

    fn stop_trigger(&mut self, _diu: &DiuConfig) -> Result<(), CardError> {
        Ok(())
    }

    fn set_loopback_internal(&mut self) -> Result<(), CardError> {
        Ok(())
    }

    fn set_loopback_siu(&mut self, _diu: &DiuConfig) -> Result<(), CardError> {
        Ok(())
    }

    fn assert_link_up(&mut self) -> Result<(), CardError> {
        Ok(())
    }

    fn siu_command(&mut self, _op: u32) -> Result<u32, CardError> {
        Ok(0)
    }

    fn diu_command(&mut self, _op: u32) -> Result<u32, CardError> {
        Ok(0)
    }

    fn assert_free_fifo_empty(&mut self) -> Result<(), CardError> {
        Ok(())
    }

    fn read_register(&mut self, _index: usize) -> u32 {
        0
    }

    fn serial(&mut self) -> Option<i32> {
        Some(12345)
    }

    fn firmware_info(&mut self) -> Result<String, CardError> {
        Ok("2.20:2014-12-2".to_string())
    }
}

struct Rig {
    channel: CrorcChannel,
    state: Rc<RefCell<CardState>>,
    buffer: DmaBuffer,
}

fn test_parameters() -> Parameters {
    let address = PciAddress::new(0x42, 0, 0).unwrap();
    Parameters::new(CardId::Address(address), 0)
}

/// Rig with a real client buffer of `buffer_size` bytes.
fn make_rig(buffer_size: usize, arrivals_enabled: bool, inject: Option<(usize, i32)>) -> Rig {
    let mut buffer = alloc_dma_buffer(buffer_size);
    let view = BufferView {
        ptr: buffer.as_mut_ptr(),
        bus_address: buffer.as_mut_ptr() as u64,
        size: buffer_size,
    };
    let mut fifo_memory = alloc_dma_buffer(READYFIFO_BYTES);
    let fifo_ptr = fifo_memory.as_mut_ptr();
    let state = Rc::new(RefCell::new(CardState {
        arrivals_enabled,
        ..CardState::default()
    }));
    let card = TestCard {
        fifo_base: fifo_ptr,
        state: Rc::clone(&state),
        inject,
    };
    let channel = CrorcChannel::new(
        &test_parameters(),
        Box::new(card),
        fifo_memory,
        fifo_ptr as u64,
        view,
    )
    .expect("channel construction should succeed");
    Rig {
        channel,
        state,
        buffer,
    }
}

/// Rig with a DMA window but no memory behind it, for validation tests
/// that never run DMA.
fn make_window_rig(window: usize) -> Rig {
    let view = BufferView {
        ptr: ptr::null_mut(),
        bus_address: 0,
        size: window,
    };
    let mut fifo_memory = alloc_dma_buffer(READYFIFO_BYTES);
    let fifo_ptr = fifo_memory.as_mut_ptr();
    let state = Rc::new(RefCell::new(CardState {
        arrivals_enabled: true,
        ..CardState::default()
    }));
    let card = TestCard {
        fifo_base: fifo_ptr,
        state: Rc::clone(&state),
        inject: None,
    };
    let channel = CrorcChannel::new(
        &test_parameters(),
        Box::new(card),
        fifo_memory,
        fifo_ptr as u64,
        view,
    )
    .expect("channel construction should succeed");
    Rig {
        channel,
        state,
        buffer: alloc_dma_buffer(0),
    }
}

#[test]
fn cold_start_fills_one_superpage() {
    let mut rig = make_rig(MIB, true, None);
    let channel = &mut rig.channel;

    channel.push_superpage(Superpage::new(0, MIB)).unwrap();
    channel.start_dma().unwrap();
    channel.fill_superpages().unwrap();

    assert_eq!(channel.ready_queue_size(), 1);
    let superpage = channel.pop_superpage().unwrap();
    assert_eq!(superpage.offset, 0);
    assert_eq!(superpage.size, MIB);
    assert_eq!(superpage.received, MIB);
    assert!(superpage.ready);

    // The primer handed exactly one full ring of pages, in offset order.
    let state = rig.state.borrow();
    assert_eq!(state.pushes.len(), READYFIFO_ENTRIES);
    let base = rig.buffer.as_ptr() as u64;
    for (i, &(bus, words, slot)) in state.pushes.iter().enumerate() {
        assert_eq!(bus, base + (i * PAGE) as u64);
        assert_eq!(words, PAGE_WORDS);
        assert_eq!(slot, i);
    }
    assert_eq!(state.receiver_starts, 1);
    assert_eq!(state.generator_starts, 1);
    assert_eq!(channel.fifo_size(), 0);
}

#[test]
fn superpages_fill_and_pop_in_push_order() {
    let mut rig = make_rig(3 * MIB, true, None);
    let channel = &mut rig.channel;

    for i in 0..3 {
        channel.push_superpage(Superpage::new(i * MIB, MIB)).unwrap();
    }
    channel.start_dma().unwrap();
    for _ in 0..10 {
        channel.fill_superpages().unwrap();
        if channel.ready_queue_size() == 3 {
            break;
        }
    }
    assert_eq!(channel.ready_queue_size(), 3);

    let peeked = channel.get_superpage().unwrap();
    for i in 0..3 {
        let superpage = channel.pop_superpage().unwrap();
        if i == 0 {
            assert_eq!(peeked, superpage);
        }
        assert_eq!(superpage.offset, i * MIB);
        assert!(superpage.ready);
        assert_eq!(superpage.received, MIB);
    }
    assert!(matches!(
        channel.pop_superpage(),
        Err(RocError::QueueEmpty)
    ));

    // The second superpage went through the arrival path, so its pages
    // carry the SDH event-size patch: words [0, 0, 0, length] at byte
    // offset 16 of each page.
    let sdh = &rig.buffer[MIB + 16..MIB + 32];
    let words: Vec<u32> = sdh
        .chunks_exact(4)
        .map(|c| u32::from_ne_bytes(c.try_into().unwrap()))
        .collect();
    assert_eq!(words, vec![0, 0, 0, PAGE_WORDS]);
}

#[test]
fn push_validation() {
    let mut rig = make_window_rig(256 * MIB);
    let channel = &mut rig.channel;

    // Not a 1 MiB multiple.
    assert!(matches!(
        channel.push_superpage(Superpage::new(0, 512 * 1024)),
        Err(RocError::Parameter(_))
    ));
    // Misaligned offset.
    assert!(matches!(
        channel.push_superpage(Superpage::new(3, MIB)),
        Err(RocError::Alignment(_))
    ));
    // Beyond the DMA window.
    assert!(matches!(
        channel.push_superpage(Superpage::new(255 * MIB, 2 * MIB)),
        Err(RocError::OutOfRange { .. })
    ));

    // Back-pressure: the push that fails with QueueFull is exactly the
    // one issued with no slack left.
    for i in 0..128 {
        assert!(channel.transfer_queue_available() > 0);
        channel.push_superpage(Superpage::new(i * MIB, MIB)).unwrap();
    }
    assert_eq!(channel.transfer_queue_available(), 0);
    assert!(matches!(
        channel.push_superpage(Superpage::new(128 * MIB, MIB)),
        Err(RocError::QueueFull)
    ));
}

#[test]
fn error_bit_fails_the_channel() {
    // Push index 128 is the first page of the second superpage, which
    // lands in ring slot 0 after the primer consumed the first ring.
    let bad_status = 0x80000082u32 as i32;
    let mut rig = make_rig(2 * MIB, true, Some((128, bad_status)));
    let channel = &mut rig.channel;

    channel.push_superpage(Superpage::new(0, MIB)).unwrap();
    channel.push_superpage(Superpage::new(MIB, MIB)).unwrap();
    channel.start_dma().unwrap();
    channel.fill_superpages().unwrap();
    assert_eq!(channel.ready_queue_size(), 1);
    channel.pop_superpage().unwrap();

    let err = channel.fill_superpages().unwrap_err();
    match err {
        RocError::DataArrival {
            status,
            length,
            index,
        } => {
            assert_eq!(status, bad_status);
            assert_eq!(length, PAGE_WORDS);
            assert_eq!(index, 0);
        }
        other => panic!("expected DataArrival, got {other:?}"),
    }
    // The failed superpage was not delivered.
    assert_eq!(channel.ready_queue_size(), 0);
}

#[test]
fn ring_stays_bounded_without_arrivals() {
    let mut rig = make_rig(2 * MIB, false, None);
    let channel = &mut rig.channel;

    channel.push_superpage(Superpage::new(0, MIB)).unwrap();
    channel.push_superpage(Superpage::new(MIB, MIB)).unwrap();
    channel.start_dma().unwrap();

    // Primer credits its ring even though nothing arrived (it warns);
    // the second superpage's pages then sit outstanding.
    channel.fill_superpages().unwrap();
    assert_eq!(channel.ready_queue_size(), 1);
    for _ in 0..5 {
        channel.fill_superpages().unwrap();
        assert_eq!(channel.fifo_size(), READYFIFO_ENTRIES);
    }
    // Conservation: 256 pages pushed, 128 credited, 128 outstanding.
    assert_eq!(rig.state.borrow().pushes.len(), 256);
    assert_eq!(channel.ready_queue_size(), 1);
}

#[test]
fn stop_is_idempotent() {
    let mut rig = make_rig(MIB, true, None);
    let channel = &mut rig.channel;

    channel.push_superpage(Superpage::new(0, MIB)).unwrap();
    channel.start_dma().unwrap();
    channel.fill_superpages().unwrap();

    channel.stop_dma().unwrap();
    {
        let state = rig.state.borrow();
        assert_eq!(state.generator_stops, 1);
        assert_eq!(state.receiver_stops, 1);
    }
    channel.stop_dma().unwrap();
    {
        let state = rig.state.borrow();
        assert_eq!(state.generator_stops, 1);
        assert_eq!(state.receiver_stops, 1);
    }

    // Filled superpages stay poppable after stop.
    assert_eq!(channel.ready_queue_size(), 1);
    assert!(channel.pop_superpage().is_ok());
}

#[test]
fn reset_levels() {
    let mut rig = make_rig(MIB, true, None);
    let channel = &mut rig.channel;

    // Nothing is a no-op: no card traffic at all.
    channel.reset_channel(ResetLevel::Nothing).unwrap();
    assert!(rig.state.borrow().resets.is_empty());

    channel.reset_channel(ResetLevel::Internal).unwrap();
    assert_eq!(rig.state.borrow().resets, vec![ResetLevel::Internal]);
    // An internal reset leaves the link alone.
    assert!(rig.state.borrow().ddl_arms.is_empty());

    channel.reset_channel(ResetLevel::InternalDiuSiu).unwrap();
    assert_eq!(
        rig.state.borrow().resets,
        vec![ResetLevel::Internal, ResetLevel::InternalDiuSiu]
    );
    // The deep reset re-arms both DDL endpoints.
    assert_eq!(
        rig.state.borrow().ddl_arms,
        vec![DdlTarget::Diu, DdlTarget::Siu]
    );
}

#[test]
fn deferred_start_waits_for_a_superpage() {
    let mut rig = make_rig(MIB, true, None);
    let channel = &mut rig.channel;

    channel.start_dma().unwrap();
    // No superpage yet: the tick must not touch the card.
    channel.fill_superpages().unwrap();
    assert!(rig.state.borrow().pushes.is_empty());
    assert_eq!(rig.state.borrow().receiver_starts, 0);

    channel.push_superpage(Superpage::new(0, MIB)).unwrap();
    channel.fill_superpages().unwrap();
    assert_eq!(channel.ready_queue_size(), 1);
}

#[test]
fn channel_identity() {
    let rig = make_rig(MIB, true, None);
    let channel = &rig.channel;
    assert_eq!(channel.card_type(), CardType::Crorc);
    assert_eq!(channel.serial(), Some(12345));
    assert_eq!(channel.firmware_info().as_deref(), Some("2.20:2014-12-2"));
    assert_eq!(channel.temperature(), None);
    assert_eq!(channel.pci_address(), PciAddress::new(0x42, 0, 0).unwrap());
}

#[test]
fn crorc_rejects_bad_construction_parameters() {
    let mut parameters = test_parameters();
    parameters.channel_number = 6;
    assert!(matches!(
        make_channel_with(parameters),
        Err(RocError::Parameter(_))
    ));

    let mut parameters = test_parameters();
    parameters.dma_page_size = 4 * 1024;
    assert!(matches!(
        make_channel_with(parameters),
        Err(RocError::Parameter(_))
    ));
}

fn make_channel_with(parameters: Parameters) -> Result<CrorcChannel, RocError> {
    let mut fifo_memory = alloc_dma_buffer(READYFIFO_BYTES);
    let fifo_ptr = fifo_memory.as_mut_ptr();
    let card = TestCard {
        fifo_base: fifo_ptr,
        state: Rc::new(RefCell::new(CardState::default())),
        inject: None,
    };
    CrorcChannel::new(
        &parameters,
        Box::new(card),
        fifo_memory,
        fifo_ptr as u64,
        BufferView::null(),
    )
}
