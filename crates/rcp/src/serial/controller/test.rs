use super::*;
use crate::sim::{self, Controller as Plugged, Pak as Inserted, Sim};

fn setup(ports: [Option<Plugged>; PORTS]) -> &'static Sim {
    let sim = Sim::install();
    for (port, controller) in ports.into_iter().enumerate() {
        sim.set_controller(port, controller);
    }

    sim
}

fn controller(buttons: ButtonMask, pak: Option<Inserted>) -> Option<Plugged> {
    Some(Plugged {
        buttons: buttons.0,
        x: 0,
        y: 0,
        pak,
    })
}

#[test]
fn poll_ports() {
    let _guard = sim::exclusive();
    let sim = setup([
        Some(Plugged {
            buttons: (ButtonMask::A | ButtonMask::START).0,
            x: 10,
            y: -5,
            pak: None,
        }),
        None,
        controller(ButtonMask::NONE, Some(Inserted::memory())),
        None,
    ]);

    let ports = poll();
    assert!(ports[0].present());
    assert!(!ports[0].pak());
    assert_eq!(ports[0].down(), ButtonMask::A | ButtonMask::START);
    assert_eq!((ports[0].x(), ports[0].y()), (10, -5));

    assert!(!ports[1].present());
    assert_eq!(ports[1].device(), None);
    assert!(ports[2].present());
    assert!(ports[2].pak());
    assert!(!ports[3].present());

    sim.set_controller(0, controller(ButtonMask::A | ButtonMask::B, None));
    let ports = poll();
    assert!(!ports[0].plugged());
    assert_eq!(ports[0].pressed(), ButtonMask::B);
    assert_eq!(ports[0].released(), ButtonMask::START);
    assert_eq!(ports[0].changed(), ButtonMask::B | ButtonMask::START);

    sim.set_controller(0, None);
    sim.set_controller(2, controller(ButtonMask::NONE, None));
    sim.set_controller(3, controller(ButtonMask::Z, None));
    let ports = poll();
    assert!(ports[0].unplugged());
    assert_eq!(ports[0].down(), ButtonMask::NONE);
    assert!(ports[2].pak_removed());
    assert!(ports[3].plugged());
    assert_eq!(ports[3].pressed(), ButtonMask::Z);
}

#[test]
fn memory_pak_io() {
    let _guard = sim::exclusive();
    setup([
        None,
        None,
        controller(ButtonMask::NONE, Some(Inserted::memory())),
        None,
    ]);

    let mut pak = Pak::new(2);
    assert_eq!(pak.probe().unwrap(), PakKind::Memory);

    let data: Vec<u8> = (0..100u8).collect();
    assert_eq!(pak.write_at(&data, 0x3F).unwrap(), 100);

    let mut out = [0; 100];
    assert_eq!(pak.read_at(&mut out, 0x3F).unwrap(), 100);
    assert_eq!(&out[..], &data[..]);

    // bytes around the write were preserved
    let mut around = [0xAA; 2];
    pak.read_at(&mut around[..1], 0x3E).unwrap();
    pak.read_at(&mut around[1..], 0x3F + 100).unwrap();
    assert_eq!(around, [0, 0]);

    let mut tail = [0; 32];
    assert_eq!(pak.read_at(&mut tail, PAK_SIZE as u64 - 10).unwrap(), 10);
    assert!(matches!(
        pak.read_at(&mut tail, PAK_SIZE as u64 + 1),
        Err(AccessoryError::OutOfRange)
    ));
}

#[test]
fn pak_cursor() {
    let _guard = sim::exclusive();
    setup([
        controller(ButtonMask::NONE, Some(Inserted::memory())),
        None,
        None,
        None,
    ]);

    let mut pak = Pak::new(0);
    pak.seek(SeekFrom::Start(0x100)).unwrap();
    pak.write_all(b"note data").unwrap();
    assert_eq!(pak.stream_position().unwrap(), 0x109);

    pak.seek(SeekFrom::Current(-9)).unwrap();
    let mut out = [0; 9];
    pak.read_exact(&mut out).unwrap();
    assert_eq!(&out, b"note data");

    assert!(pak.seek(SeekFrom::End(1)).is_err());
    assert_eq!(pak.stream_position().unwrap(), 0x109);
}

#[test]
fn rumble() {
    let _guard = sim::exclusive();
    let sim = setup([
        None,
        controller(ButtonMask::NONE, Some(Inserted::rumble())),
        None,
        None,
    ]);

    let mut rumble = RumblePak::new(Pak::new(1)).unwrap().unwrap();
    let motor = || {
        sim.with(|state| match &state.pif.ports[1] {
            Some(Plugged {
                pak: Some(Inserted::Rumble { on, .. }),
                ..
            }) => *on,
            _ => panic!("rumble pak is gone"),
        })
    };

    rumble.set(true).unwrap();
    assert!(motor());
    rumble.set(false).unwrap();
    assert!(!motor());
}

#[test]
fn missing_pak() {
    let _guard = sim::exclusive();
    setup([controller(ButtonMask::NONE, None), None, None, None]);

    let mut block = [0; BLOCK_SIZE];
    let mut pak = Pak::new(0);
    assert_eq!(pak.read_block(0, &mut block), Err(JoybusError::Checksum));

    let mut pak = Pak::new(1);
    assert_eq!(pak.read_block(0, &mut block), Err(JoybusError::NoResponse));
    assert!(pak.read(&mut block).is_err());
}
