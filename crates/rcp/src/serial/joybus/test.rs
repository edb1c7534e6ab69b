use super::*;

struct Block {
    data: [u8; 64],
    len: usize,
}

impl Allocator for Block {
    fn alloc(&mut self, n: usize) -> Result<usize, JoybusError> {
        if self.len + n > 63 {
            return Err(JoybusError::Full);
        }

        self.len += n;
        Ok(self.len - n)
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

fn block() -> Block {
    Block {
        data: [0; 64],
        len: 0,
    }
}

#[test]
fn crc8_check_value() {
    assert_eq!(crc8(b"123456789"), 0x2a);
    assert_eq!(crc8(&[0; 32]), 0);
}

#[test]
fn address_checksum() {
    assert_eq!(address_crc(0x0000), 0x0000);
    assert_eq!(address_crc(0x8000), 0x8001);
    assert_eq!(address_crc(0xC000), 0xC01B);
    // the low bits of the input are ignored
    assert_eq!(address_crc(0x801F), 0x8001);
}

#[test]
fn layout() {
    let mut block = block();
    control_byte(&mut block, ctrl::SKIP).unwrap();
    let info = InfoCommand::new(&mut block).unwrap();
    let read = ReadPakCommand::new(&mut block).unwrap();
    read.set_address(&mut block, 0x8000);
    control_byte(&mut block, ctrl::ABORT).unwrap();

    assert_eq!(info.command().offset, 1);
    assert_eq!(&block.data[..6], &[0x00, 0x01, 0x03, 0x00, 0, 0]);
    assert_eq!(&block.data[7..12], &[0x03, 0x21, 0x02, 0x80, 0x01]);
    assert_eq!(block.data[7 + 2 + 3 + 33], ctrl::ABORT);
}

#[test]
fn block_overflow() {
    let mut block = block();
    WritePakCommand::new(&mut block).unwrap();
    assert!(matches!(
        WritePakCommand::new(&mut block),
        Err(JoybusError::Full)
    ));
}

#[test]
fn response_flags() {
    let mut block = block();
    let info = InfoCommand::new(&mut block).unwrap();

    block.data[1] |= FLAG_NO_RESPONSE;
    assert_eq!(info.info(&block), Err(JoybusError::NoResponse));

    info.command().reset(&mut block);
    block.data[1] |= FLAG_INVALID_RESPONSE;
    assert_eq!(info.info(&block), Err(JoybusError::InvalidResponse));

    info.command().reset(&mut block);
    block.data[2] = 0x7f;
    assert_eq!(info.info(&block), Err(JoybusError::Header));

    info.command().reset(&mut block);
    block.data[3..6].copy_from_slice(&[0x05, 0x00, 0x01]);
    assert_eq!(info.info(&block), Ok((DeviceType::CONTROLLER, 0x01)));
}

#[test]
fn pak_checksums() {
    let mut block = block();
    let mut write = WritePakCommand::new(&mut block).unwrap();
    assert_eq!(
        write.set_data(&mut block, &[0; 16]),
        Err(JoybusError::DataLength)
    );

    let data: Vec<u8> = (0..32).collect();
    write.set_data(&mut block, &data).unwrap();
    let rx = 2 + 35;
    block.data[rx] = crc8(&data);
    assert_eq!(write.result(&block), Ok(()));

    block.data[rx] ^= 1;
    assert_eq!(write.result(&block), Err(JoybusError::Checksum));
}

#[test]
fn buttons_display() {
    let buttons = ButtonMask::A | ButtonMask::START | ButtonMask::C_LEFT;
    assert_eq!(buttons.to_string(), "A + Start + C←");
    assert!(buttons.contains(ButtonMask::A | ButtonMask::START));
    assert!(!buttons.contains(ButtonMask::B));
    assert_eq!(ButtonMask::NONE.to_string(), "");
}
