use crate::bus::RegisterBus;
use crate::constants::*;
use crate::error::CamError;
use crate::sim::{BusEvent, CameraModel, SimBus, SimChipSelect, SimDelay, attach};
use std::cell::RefCell;
use std::rc::Rc;

type SimRegisterBus = RegisterBus<SimBus<CameraModel>, SimChipSelect<CameraModel>, SimDelay>;

fn bus_with(model: CameraModel) -> (Rc<RefCell<CameraModel>>, SimRegisterBus, SimDelay) {
    let (model, spi, cs) = attach(model);
    let delay = SimDelay::new();
    (model, RegisterBus::new(spi, cs, delay.clone()), delay)
}

#[test]
fn test_register_write_framing() {
    let (model, mut bus, delay) = bus_with(CameraModel::new(SENSOR_3MP_1));

    bus.write_reg(0x20, 0x01).expect("write failed");

    assert_eq!(
        model.borrow().events,
        vec![
            BusEvent::Select,
            BusEvent::Write(vec![0xA0]),
            BusEvent::Write(vec![0x01]),
            BusEvent::Deselect,
        ],
        "Register write must be command then value under one chip-select"
    );
    assert_eq!(model.borrow().registers[0x20], 0x01);
    assert_eq!(delay.elapsed_ms(), u64::from(WRITE_SETTLE_MS));
}

#[test]
fn test_register_read_framing() {
    let (model, mut bus, _) = bus_with(CameraModel::new(SENSOR_5MP_2));

    let value = bus.read_reg(0x40).expect("read failed");

    assert_eq!(value, SENSOR_5MP_2, "Second byte carries the register value");
    assert_eq!(
        model.borrow().events,
        vec![
            BusEvent::Select,
            BusEvent::Write(vec![0x40]),
            BusEvent::Read(1),
            BusEvent::Read(1),
            BusEvent::Deselect,
        ]
    );
}

#[test]
fn test_read_masks_direction_bit() {
    let (model, mut bus, _) = bus_with(CameraModel::new(SENSOR_3MP_2));

    let value = bus.read_reg(0x80 | REG_SENSOR_ID).expect("read failed");

    assert_eq!(value, SENSOR_3MP_2);
    assert_eq!(model.borrow().events[1], BusEvent::Write(vec![REG_SENSOR_ID]));
}

#[test]
fn test_single_fifo_read_uses_dedicated_command() {
    let (model, mut bus, _) = bus_with(CameraModel::new(SENSOR_3MP_1).with_frame(vec![0x11, 0x22]));
    bus.write_reg(REG_FIFO_CONTROL, FIFO_START_MASK).unwrap();
    model.borrow_mut().clear_log();

    assert_eq!(bus.read_fifo_byte().unwrap(), 0x11);
    assert_eq!(bus.read_fifo_byte().unwrap(), 0x22);
    assert_eq!(model.borrow().events[1], BusEvent::Write(vec![SINGLE_FIFO_READ]));
    assert_eq!(model.borrow().fifo_remaining(), 0);
}

#[test]
fn test_first_burst_skips_throwaway_byte() {
    let frame: Vec<u8> = (1..=8).collect();
    let (model, mut bus, _) = bus_with(CameraModel::new(SENSOR_3MP_1).with_frame(frame));
    bus.write_reg(REG_FIFO_CONTROL, FIFO_START_MASK).unwrap();
    model.borrow_mut().clear_log();

    let mut first = [0u8; 4];
    bus.read_burst(true, &mut first).unwrap();
    let mut second = [0u8; 4];
    bus.read_burst(false, &mut second).unwrap();

    assert_eq!(first, [1, 2, 3, 4]);
    assert_eq!(second, [5, 6, 7, 8]);
    assert_eq!(
        model.borrow().events[..4],
        [
            BusEvent::Select,
            BusEvent::Write(vec![BURST_FIFO_READ]),
            BusEvent::Read(1),
            BusEvent::Read(4),
        ]
    );
}

#[test]
fn test_bus_fault_releases_chip_select() {
    let (model, mut bus, _) = bus_with(CameraModel::new(SENSOR_3MP_1));
    model.borrow_mut().fail_reads = true;

    let err = bus.read_reg(REG_SENSOR_ID).unwrap_err();

    assert!(matches!(err, CamError::Spi(embedded_hal::spi::ErrorKind::Other)));
    assert_eq!(model.borrow().events.last(), Some(&BusEvent::Deselect));
}
