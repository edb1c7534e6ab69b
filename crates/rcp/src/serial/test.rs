use super::joybus::{Allocator, DeviceType, InfoCommand, JoybusError, ctrl};
use super::*;
use crate::sim::{self, Controller, Sim};

#[test]
fn block_allocation() {
    let _guard = sim::exclusive();
    Sim::install();

    let mut block = CommandBlock::new(PifCommand::ConfigureJoybus);
    assert_eq!(block.free(), 63);

    // six bytes per info command
    for _ in 0..10 {
        InfoCommand::new(&mut block).unwrap();
    }
    assert_eq!(block.free(), 3);
    assert_eq!(InfoCommand::new(&mut block).unwrap_err(), JoybusError::Full);

    for _ in 0..3 {
        joybus::control_byte(&mut block, ctrl::NOP).unwrap();
    }
    assert_eq!(block.free(), 0);
    assert_eq!(block.alloc(1), Err(JoybusError::Full));
}

#[test]
fn run_round_trip() {
    let _guard = sim::exclusive();
    let sim = Sim::install();
    sim.set_controller(0, Some(Controller::default()));
    sim.set_controller(1, None);

    let mut block = CommandBlock::new(PifCommand::ConfigureJoybus);
    let first = InfoCommand::new(&mut block).unwrap();
    let second = InfoCommand::new(&mut block).unwrap();
    joybus::control_byte(&mut block, ctrl::ABORT).unwrap();

    for _ in 0..3 {
        first.command().reset(&mut block);
        second.command().reset(&mut block);
        run(&mut block);

        assert_eq!(first.info(&block).unwrap().0, DeviceType::CONTROLLER);
        assert_eq!(second.info(&block), Err(JoybusError::NoResponse));

        // the pif clears the command byte once done
        assert_eq!(block.bytes()[63], 0);
    }
}
