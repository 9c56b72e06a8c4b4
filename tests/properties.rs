use std::{iter, time::Duration};

use bcm283x_dma::{
    address::{to_bus_address, PhysicalAddress},
    clock,
    mock::{MockController, Register},
    stream::{BitOrder, BitStream, Run, Runs, MAX_STRIDE},
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn runs_cover_the_stream(
        bits in prop::collection::vec(any::<u8>(), 0..64),
        lsb in any::<bool>(),
    ) {
        let order = if lsb { BitOrder::Lsb } else { BitOrder::Msb };
        let stream = BitStream::new(&bits, order, Duration::from_micros(1));
        let runs: Vec<Run> = stream.runs().collect();

        let expanded: Vec<bool> = runs
            .iter()
            .flat_map(|run| iter::repeat(run.level).take(run.stride as usize))
            .collect();
        prop_assert_eq!(expanded, stream.levels().collect::<Vec<_>>());
        for run in &runs {
            prop_assert!((1..=MAX_STRIDE).contains(&run.stride));
        }
        for pair in runs.windows(2) {
            if pair[0].level == pair[1].level {
                prop_assert_eq!(pair[0].stride, MAX_STRIDE);
            }
        }
    }

    #[test]
    fn constant_levels_split_at_max_stride(len in 1usize..5000, level in any::<bool>()) {
        let runs: Vec<Run> = Runs::new(iter::repeat(level).take(len)).collect();
        prop_assert_eq!(runs.len(), len.div_ceil(MAX_STRIDE as usize));
        prop_assert!(runs.iter().all(|run| run.level == level));
        prop_assert_eq!(runs.iter().map(|run| run.stride as usize).sum::<usize>(), len);
    }

    #[test]
    fn bus_addresses_keep_the_low_bits(raw in any::<u32>()) {
        let bus = to_bus_address(PhysicalAddress(raw)).raw();
        prop_assert_eq!(bus & 0x00FF_FFFF, raw & 0x00FF_FFFF);
    }

    #[test]
    fn pick_takes_the_highest_candidate(
        exclude in prop::collection::vec(0usize..16, 0..16),
        busy in prop::collection::vec(0usize..15, 0..15),
    ) {
        let controller = MockController::new();
        let dma = unsafe { controller.dma() };
        for &index in &busy {
            controller.write(index, Register::ConblkAd, 0x0010_0000);
        }
        let expected = (0..=14)
            .rev()
            .find(|index| !exclude.contains(index) && !busy.contains(index));
        let picked = dma.pick_channel(&exclude);
        prop_assert_eq!(picked.as_ref().map(|channel| channel.channel()), expected);
    }

    #[test]
    fn clock_never_runs_fast(hz in 5_000u64..500_000_000, waits in 0u8..=31) {
        let config = clock::compute(hz, waits).unwrap();
        prop_assert!(config.actual_hz <= hz);
        prop_assert!((1..=4095).contains(&config.divisor));
        prop_assert!(config.wait_cycles <= waits);
    }
}
