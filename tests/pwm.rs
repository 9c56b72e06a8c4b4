use std::{
    thread,
    time::{Duration, Instant},
};

use bcm283x_dma::{
    address::to_bus_address,
    gpio::Pin,
    mock::{MockAllocator, MockController},
    pwm::Pwm,
    Soc,
};

#[test]
fn alternates_set_and_clear() {
    let controller = MockController::new();
    let allocator = MockAllocator::new();
    let dma = unsafe { controller.dma() };
    let engine = controller.start_engine(&allocator);
    let gpio = Soc::Bcm2836.gpio();
    let pin = Pin::new(4).unwrap();

    let pwm = Pwm::start(&dma, &allocator, gpio, pin, 10, 3).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while engine.writes().len() < 40 {
        assert!(Instant::now() < deadline, "the loop stalled");
        thread::yield_now();
    }
    pwm.stop();

    let set = to_bus_address(gpio.set_register(pin)).raw();
    let clear = to_bus_address(gpio.clear_register(pin)).raw();
    let period: Vec<(u32, u32)> = [(set, pin.mask()); 3]
        .into_iter()
        .chain([(clear, pin.mask()); 7])
        .collect();
    let writes = engine.writes();
    for chunk in writes[..40].chunks(10) {
        assert_eq!(chunk, period);
    }
}
