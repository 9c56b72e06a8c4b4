use std::{iter, time::Duration};

use bcm283x_dma::{
    address::to_bus_address,
    clock,
    gpio::{Gpio, Pin},
    mock::{Engine, MockAllocator, MockController, PacerEvent, Register, RecordingPacer},
    stream::{BitOrder, BitStream, Streamer},
    Error, Soc,
};

const GPIO: Gpio = Soc::Bcm2837.gpio();
const MASK: u32 = 1 << 18;

fn pin() -> Pin {
    Pin::new(18).unwrap()
}

fn set_register() -> u32 {
    to_bus_address(GPIO.set_register(pin())).raw()
}

fn clear_register() -> u32 {
    to_bus_address(GPIO.clear_register(pin())).raw()
}

/// Levels the engine drove, one per tick
fn driven(engine: &Engine<'_>) -> Vec<bool> {
    engine
        .writes()
        .into_iter()
        .map(|(register, value)| {
            assert_eq!(value, MASK);
            register == set_register()
        })
        .collect()
}

#[test]
fn write_drives_each_tick() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);

    let stream = BitStream::new(&[0b1111_0000], BitOrder::Msb, Duration::from_micros(1));
    streamer.write(pin(), &stream).unwrap();

    let expected: Vec<(u32, u32)> = iter::repeat((set_register(), MASK))
        .take(4)
        .chain(iter::repeat((clear_register(), MASK)).take(4))
        .collect();
    assert_eq!(engine.writes(), expected);

    let clock = clock::compute_exact(1_000_000, 0).unwrap();
    let (_, pacer) = streamer.release();
    assert_eq!(
        pacer.events,
        [PacerEvent::Stop, PacerEvent::Start(clock), PacerEvent::Stop]
    );
    assert_eq!(allocator.live_buffers(), 0);
}

#[test]
fn both_bit_orders_drive_the_same_levels() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);

    let tick = Duration::from_micros(2);
    let msb = BitStream::new(&[0b1011_0010, 0b0100_0000], BitOrder::Msb, tick);
    streamer.write(pin(), &msb).unwrap();
    let first = driven(&engine);
    engine.clear_writes();

    let lsb = BitStream::new(&[0b0100_1101, 0b0000_0010], BitOrder::Lsb, tick);
    streamer.write(pin(), &lsb).unwrap();
    assert_eq!(driven(&engine), first);
    assert_eq!(first, msb.levels().collect::<Vec<_>>());
}

#[test]
fn long_streams_span_many_blocks() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);

    let bits = [0u8; 250];
    let stream = BitStream::with_bit_len(
        &bits,
        2000,
        BitOrder::Msb,
        Duration::from_micros(1),
    )
    .unwrap();
    streamer.write(pin(), &stream).unwrap();
    assert_eq!(driven(&engine), vec![false; 2000]);
}

#[test]
fn empty_stream_does_nothing() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);

    let stream = BitStream::new(&[], BitOrder::Msb, Duration::from_micros(1));
    streamer.write(pin(), &stream).unwrap();
    assert!(engine.writes().is_empty());
    assert!(streamer.pacer().events.is_empty());
}

#[test]
fn write_needs_a_full_bandwidth_channel() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    for index in 0..=5 {
        controller.write(index, Register::ConblkAd, 0x0010_0000);
    }
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);
    let stream = BitStream::new(&[0xF0], BitOrder::Msb, Duration::from_micros(1));
    assert_eq!(streamer.write(pin(), &stream), Err(Error::ResourceExhausted));
    assert_eq!(allocator.live_buffers(), 0);
}

#[test]
fn read_samples_the_level_register() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);

    let levels = [MASK, 0, MASK, MASK, 0, 0, 0, MASK, !MASK];
    engine.queue_reads(to_bus_address(GPIO.level_register(pin())), levels);
    let mut bits = [0xFFu8; 2];
    streamer
        .read(pin(), Duration::from_micros(1), BitOrder::Msb, &mut bits)
        .unwrap();
    assert_eq!(bits, [0b1011_0001, 0]);
}

#[test]
fn lsb_read_is_not_implemented() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let mut streamer = Streamer::new(&dma, &allocator, RecordingPacer::default(), GPIO);
    let mut bits = [0u8; 4];
    assert!(matches!(
        streamer.read(pin(), Duration::from_micros(1), BitOrder::Lsb, &mut bits),
        Err(Error::NotImplemented(_))
    ));
    assert!(streamer.pacer().events.is_empty());
}
