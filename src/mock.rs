//! Software doubles for the DMA hardware
//!
//! [`MockAllocator`] hands out page aligned host memory under made-up
//! physical addresses. [`MockController`] is a DMA register block in host
//! memory. An [`Engine`] runs on a thread and executes control block chains
//! from the controller, the way the DMA controller would. Data requests are
//! always ready, so paced transfers run as fast as unpaced ones.

extern crate std;

use core::{
    marker::PhantomData,
    ptr::{self, NonNull},
    sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize, Ordering},
};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    boxed::Box,
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    vec::Vec,
};

use crate::{
    address::{
        round_up_to_page, BusAddress, PhysicalAddress, PAGE_SIZE, PERIPHERAL_BUS_BASE,
        UNCACHED_ALIAS,
    },
    clock::{ClockConfig, Pacer},
    control_block::ControlBlock,
    memory::{Allocator, DmaBuffer},
    ral::dma::{CONTROLLER_CHANNELS, CS, DEBUG, DEBUG_ERRORS, ENABLE_ALL, TI},
    Dma, Error, Result,
};

/// Physical address of the first mock allocation
const FIRST_PHYSICAL: u32 = 0x0010_0000;
/// Bytes between channel register blocks
const CHANNEL_STRIDE: usize = 0x100;
/// Word offset of the ENABLE register in the controller block
const ENABLE_WORD: usize = 0xFF0 / 4;
/// Word offset, in a channel block, of the DEBUG value the hardware last
/// latched; unused by the real register map
const LATCHED_DEBUG_WORD: usize = 0xF0 / 4;
/// Bus writes kept for inspection; looping chains would grow forever
const MAX_LOGGED_WRITES: usize = 1 << 20;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Region {
    physical: u32,
    host: usize,
    len: usize,
}

#[derive(Default)]
struct MemoryMap {
    regions: Vec<Region>,
}

impl MemoryMap {
    /// Host pointer for `len` bytes at `physical`, if one allocation holds them all
    fn resolve(&self, physical: u32, len: usize) -> Option<*mut u8> {
        self.regions
            .iter()
            .find(|region| {
                physical >= region.physical
                    && (physical - region.physical) as usize + len <= region.len
            })
            .map(|region| (region.host + (physical - region.physical) as usize) as *mut u8)
    }
}

type SharedMap = Arc<Mutex<MemoryMap>>;

/// An allocator of host memory with fake physical addresses
///
/// Allocations are separated by an unmapped page, so an engine running
/// past the end of a buffer faults instead of corrupting its neighbour.
pub struct MockAllocator {
    map: SharedMap,
    next: AtomicU32,
    remaining: AtomicUsize,
}

impl MockAllocator {
    /// An allocator without a size limit
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// An allocator that fails once `bytes` have been handed out in total
    pub fn with_capacity(bytes: usize) -> Self {
        MockAllocator {
            map: SharedMap::default(),
            next: AtomicU32::new(FIRST_PHYSICAL),
            remaining: AtomicUsize::new(bytes),
        }
    }

    /// Number of live buffers
    pub fn live_buffers(&self) -> usize {
        lock(&self.map).regions.len()
    }
}

impl Default for MockAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator for MockAllocator {
    type Buffer = MockBuffer;

    fn allocate(&self, size: usize) -> Result<MockBuffer> {
        let failed = Error::AllocationFailed { size };
        let len = round_up_to_page(size);
        if len == 0 {
            return Err(failed);
        }
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(len)
            })
            .map_err(|_| failed)?;
        let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|_| failed)?;
        // Safety: layout has a nonzero size.
        let host = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(failed)?;
        let physical = self
            .next
            .fetch_add((len + PAGE_SIZE) as u32, Ordering::SeqCst);
        lock(&self.map).regions.push(Region {
            physical,
            host: host.as_ptr() as usize,
            len,
        });
        Ok(MockBuffer {
            physical: PhysicalAddress(physical),
            host,
            layout,
            map: Arc::clone(&self.map),
        })
    }
}

/// A buffer from a [`MockAllocator`]
pub struct MockBuffer {
    physical: PhysicalAddress,
    host: NonNull<u8>,
    layout: Layout,
    map: SharedMap,
}

// Safety: host memory is page aligned, contiguous, and never moves.
unsafe impl DmaBuffer for MockBuffer {
    fn physical_address(&self) -> PhysicalAddress {
        self.physical
    }
    fn as_bytes(&self) -> &[u8] {
        // Safety: the allocation is live and `layout.size()` bytes long.
        unsafe { core::slice::from_raw_parts(self.host.as_ptr(), self.layout.size()) }
    }
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and we have exclusive access.
        unsafe { core::slice::from_raw_parts_mut(self.host.as_ptr(), self.layout.size()) }
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        // The engine only touches memory while holding the map lock.
        let mut map = lock(&self.map);
        map.regions
            .retain(|region| region.physical != self.physical.raw());
        // Safety: allocated with this layout in `allocate`.
        unsafe { dealloc(self.host.as_ptr(), self.layout) };
    }
}

/// A channel register, as a word offset into the channel block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    Cs = 0,
    ConblkAd = 1,
    Ti = 2,
    SourceAd = 3,
    DestAd = 4,
    TxfrLen = 5,
    Stride = 6,
    NextConbk = 7,
    Debug = 8,
}

#[repr(C, align(4096))]
struct Page([u32; PAGE_SIZE / 4]);

/// Raw register access shared by the controller and the engine thread
#[derive(Clone, Copy)]
struct Registers {
    controller: usize,
    channel15: usize,
}

impl Registers {
    fn channel_word(self, index: usize, word: usize) -> *mut u32 {
        let base = if index == CONTROLLER_CHANNELS {
            self.channel15
        } else {
            self.controller + index * CHANNEL_STRIDE
        };
        (base as *mut u32).wrapping_add(word)
    }

    fn word(self, index: usize, register: Register) -> *mut u32 {
        self.channel_word(index, register as usize)
    }

    fn read(self, index: usize, register: Register) -> u32 {
        // Safety: the controller outlives every user of these pointers.
        unsafe { ptr::read_volatile(self.word(index, register)) }
    }

    fn write(self, index: usize, register: Register, value: u32) {
        // Safety: as above.
        unsafe { ptr::write_volatile(self.word(index, register), value) }
        if register == Register::Debug {
            // Safety: as above.
            unsafe { ptr::write_volatile(self.channel_word(index, LATCHED_DEBUG_WORD), value) }
        }
    }

    /// Applies a driver write to DEBUG: the error bits are write 1 to
    /// clear, the rest are read only
    ///
    /// A driver write that stores the latched value again goes unnoticed.
    fn latch_debug(self, index: usize) {
        // Safety: as above.
        let latched = unsafe { ptr::read_volatile(self.channel_word(index, LATCHED_DEBUG_WORD)) };
        let written = self.read(index, Register::Debug);
        if written != latched {
            self.write(index, Register::Debug, latched & !(written & DEBUG_ERRORS));
        }
    }

    fn set(self, index: usize, register: Register, bits: u32) {
        self.write(index, register, self.read(index, register) | bits);
    }

    /// Applies pending driver writes, and completes a pending reset;
    /// returns `true` if there was one
    fn settle(self, index: usize) -> bool {
        self.latch_debug(index);
        if self.read(index, Register::Cs) & CS::RESET::mask == 0 {
            return false;
        }
        self.write(index, Register::Cs, 0);
        self.write(index, Register::ConblkAd, 0);
        true
    }
}

/// DMA registers in host memory
///
/// Channels 7 to 15 report themselves as lite, and every channel is
/// enabled, like on the real controller.
pub struct MockController {
    controller: NonNull<Page>,
    channel15: NonNull<Page>,
}

impl MockController {
    /// A controller with every channel idle
    pub fn new() -> Self {
        let controller = MockController {
            controller: NonNull::from(Box::leak(Box::new(Page([0; PAGE_SIZE / 4])))),
            channel15: NonNull::from(Box::leak(Box::new(Page([0; PAGE_SIZE / 4])))),
        };
        for index in 7..=15 {
            controller.write(index, Register::Debug, DEBUG::LITE::mask);
        }
        controller.set_enable(ENABLE_ALL);
        controller
    }

    fn registers(&self) -> Registers {
        Registers {
            controller: self.controller.as_ptr() as usize,
            channel15: self.channel15.as_ptr() as usize,
        }
    }

    /// Creates a driver over these registers
    ///
    /// # Safety
    ///
    /// The driver must not outlive the controller.
    pub unsafe fn dma(&self) -> Dma {
        Dma::new(
            self.controller.as_ptr() as *const (),
            self.channel15.as_ptr() as *const (),
        )
    }

    /// Reads a register of channel `index`
    pub fn read(&self, index: usize, register: Register) -> u32 {
        self.registers().read(index, register)
    }

    /// Writes a register of channel `index`
    pub fn write(&self, index: usize, register: Register, value: u32) {
        self.registers().write(index, register, value)
    }

    /// Writes the ENABLE register
    pub fn set_enable(&self, value: u32) {
        // Safety: ENABLE is inside the controller page.
        unsafe {
            ptr::write_volatile(
                (self.controller.as_ptr() as *mut u32).add(ENABLE_WORD),
                value,
            )
        }
    }

    /// Applies pending debug writes and resets, as the hardware does right away
    pub fn settle(&self) {
        for index in 0..=CONTROLLER_CHANNELS {
            self.registers().settle(index);
        }
    }

    /// Starts executing chains from `allocator`'s memory
    pub fn start_engine(&self, allocator: &MockAllocator) -> Engine<'_> {
        let stop = Arc::new(AtomicBool::new(false));
        let bus = Arc::new(Mutex::new(Bus::default()));
        let thread = {
            let registers = self.registers();
            let map = Arc::clone(&allocator.map);
            let bus = Arc::clone(&bus);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    for index in 0..=CONTROLLER_CHANNELS {
                        step(registers, &map, &bus, index);
                    }
                    thread::yield_now();
                }
            })
        };
        Engine {
            stop,
            thread: Some(thread),
            bus,
            _controller: PhantomData,
        }
    }
}

impl Default for MockController {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        // Safety: both pages were leaked from boxes in `new`.
        unsafe {
            drop(Box::from_raw(self.controller.as_ptr()));
            drop(Box::from_raw(self.channel15.as_ptr()));
        }
    }
}

/// Peripheral registers as seen by the engine
#[derive(Default)]
struct Bus {
    writes: Vec<(u32, u32)>,
    reads: HashMap<u32, VecDeque<u32>>,
}

impl Bus {
    fn read(&mut self, address: u32) -> u32 {
        self.reads
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .unwrap_or(0)
    }

    fn write(&mut self, address: u32, value: u32) {
        if self.writes.len() < MAX_LOGGED_WRITES {
            self.writes.push((address, value));
        }
    }
}

/// A software DMA controller running on its own thread
///
/// Dropping the engine stops the thread.
pub struct Engine<'c> {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    bus: Arc<Mutex<Bus>>,
    _controller: PhantomData<&'c MockController>,
}

impl Engine<'_> {
    /// Peripheral register writes so far, as bus address and value
    pub fn writes(&self) -> Vec<(u32, u32)> {
        lock(&self.bus).writes.clone()
    }

    /// Forgets the logged writes
    pub fn clear_writes(&self) {
        lock(&self.bus).writes.clear();
    }

    /// Values the next reads of `register` return, in order; 0 afterwards
    pub fn queue_reads(&self, register: BusAddress, values: impl IntoIterator<Item = u32>) {
        lock(&self.bus)
            .reads
            .entry(register.raw())
            .or_default()
            .extend(values);
    }
}

impl Drop for Engine<'_> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Executes at most one control block of channel `index`
fn step(registers: Registers, map: &Mutex<MemoryMap>, bus: &Mutex<Bus>, index: usize) {
    if registers.settle(index) {
        return;
    }
    let cs = registers.read(index, Register::Cs);
    if cs & CS::ACTIVE::mask == 0 || registers.read(index, Register::Debug) & DEBUG_ERRORS != 0 {
        return;
    }
    let address = registers.read(index, Register::ConblkAd);
    if address == 0 {
        registers.write(index, Register::Cs, (cs & !CS::ACTIVE::mask) | CS::END::mask);
        return;
    }
    fence(Ordering::Acquire);

    let map = lock(map);
    let Some(block) = map
        .resolve(address & !UNCACHED_ALIAS, ControlBlock::SIZE)
        // Safety: resolve checked the span; any bit pattern is a valid block.
        .map(|host| unsafe { ptr::read_unaligned(host as *const ControlBlock) })
    else {
        fault(registers, index);
        return;
    };
    registers.write(index, Register::Ti, block.transfer_info.0);
    registers.write(index, Register::SourceAd, block.source);
    registers.write(index, Register::DestAd, block.destination);
    registers.write(index, Register::TxfrLen, block.length);
    registers.write(index, Register::Stride, block.stride);
    registers.write(index, Register::NextConbk, block.next);
    if execute(&map, bus, &block).is_none() {
        fault(registers, index);
        return;
    }
    drop(map);

    if registers.read(index, Register::Cs) & CS::RESET::mask != 0 {
        return;
    }
    registers.write(index, Register::ConblkAd, block.next);
    if block.next == 0 {
        let cs = registers.read(index, Register::Cs);
        registers.write(index, Register::Cs, (cs & !CS::ACTIVE::mask) | CS::END::mask);
    }
}

fn fault(registers: Registers, index: usize) {
    registers.set(index, Register::Debug, DEBUG::READ_ERROR::mask);
    registers.set(index, Register::Cs, CS::ERROR::mask);
}

#[derive(Clone, Copy)]
enum Side {
    Ignore,
    Memory(*mut u8),
    Register(u32),
}

fn side(
    map: &MemoryMap,
    address: u32,
    ignore: bool,
    increment: bool,
    length: usize,
) -> Option<Side> {
    if ignore {
        Some(Side::Ignore)
    } else if address & 0xFF00_0000 == PERIPHERAL_BUS_BASE {
        Some(Side::Register(address))
    } else {
        let span = if increment { length } else { 4 };
        map.resolve(address & !UNCACHED_ALIAS, span).map(Side::Memory)
    }
}

/// Performs one block's transfer; `None` on an unmapped address
fn execute(map: &MemoryMap, bus: &Mutex<Bus>, block: &ControlBlock) -> Option<()> {
    let info = block.transfer_info;
    let length = block.length as usize;
    let source_increment = info.contains(TI::SRC_INC::mask);
    let destination_increment = info.contains(TI::DEST_INC::mask);
    let source = side(
        map,
        block.source,
        info.contains(TI::SRC_IGNORE::mask),
        source_increment,
        length,
    )?;
    let destination = side(
        map,
        block.destination,
        info.contains(TI::DEST_IGNORE::mask),
        destination_increment,
        length,
    )?;

    if let (Side::Memory(from), Side::Memory(to)) = (source, destination) {
        if source_increment && destination_increment {
            // Safety: both spans were resolved for `length` bytes.
            unsafe { ptr::copy(from, to, length) };
            return Some(());
        }
    }

    let mut bus = lock(bus);
    for word in 0..length / 4 {
        let offset = |increment: bool| if increment { word * 4 } else { 0 };
        let value = match source {
            Side::Ignore => 0,
            // Safety: resolved for the incremented span, or for one word.
            Side::Memory(host) => unsafe {
                ptr::read_unaligned(host.add(offset(source_increment)) as *const u32)
            },
            Side::Register(address) => bus.read(address),
        };
        match destination {
            Side::Ignore => {}
            // Safety: as above.
            Side::Memory(host) => unsafe {
                ptr::write_unaligned(host.add(offset(destination_increment)) as *mut u32, value)
            },
            Side::Register(address) => bus.write(address, value),
        }
    }
    Some(())
}

/// Something the streamer asked of the pacing clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacerEvent {
    Stop,
    Start(ClockConfig),
}

/// A pacer that records what it was asked to do
#[derive(Debug, Default)]
pub struct RecordingPacer {
    /// Every call, in order
    pub events: Vec<PacerEvent>,
}

impl Pacer for RecordingPacer {
    fn stop(&mut self) {
        self.events.push(PacerEvent::Stop);
    }
    fn start(&mut self, clock: &ClockConfig) {
        self.events.push(PacerEvent::Start(*clock));
    }
}
