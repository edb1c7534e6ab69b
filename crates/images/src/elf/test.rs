use std::io::Cursor;

use super::*;

const ENTRY: u32 = 0x8000_0400;

pub(crate) struct Sect {
    pub name: &'static str,
    pub kind: u32,
    pub flags: u32,
    pub addr: u32,
    pub data: Vec<u8>,
}

/// Assembles a minimal executable with the given sections, appending a section name table.
pub(crate) fn assemble(entry: u32, sections: &[Sect]) -> Vec<u8> {
    let mut names = vec![0u8];
    let mut name_offsets = Vec::new();
    for section in sections.iter().map(|s| s.name).chain([".shstrtab"]) {
        name_offsets.push(names.len() as u32);
        names.extend_from_slice(section.as_bytes());
        names.push(0);
    }

    let mut body = Vec::new();
    let mut headers = vec![[0u32; 10]];
    for (section, &name) in sections.iter().zip(&name_offsets) {
        let offset = 52 + body.len() as u32;
        let size = section.data.len() as u32;
        if section.kind != SECTION_NOBITS {
            body.extend_from_slice(&section.data);
        }

        headers.push([name, section.kind, section.flags, section.addr, offset, size, 0, 0, 4, 0]);
    }

    let names_offset = 52 + body.len() as u32;
    headers.push([name_offsets[sections.len()], 3, 0, 0, names_offset, names.len() as u32, 0, 0, 1, 0]);
    body.extend_from_slice(&names);
    body.resize(body.len().next_multiple_of(4), 0);

    let mut elf = b"\x7fELF".to_vec();
    elf.extend_from_slice(&[CLASS_32, DATA_BIG_ENDIAN, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    elf.extend_from_slice(&2u16.to_be_bytes());
    elf.extend_from_slice(&MACHINE_MIPS.to_be_bytes());
    elf.extend_from_slice(&1u32.to_be_bytes());
    elf.extend_from_slice(&entry.to_be_bytes());
    elf.extend_from_slice(&0u32.to_be_bytes());
    elf.extend_from_slice(&(52 + body.len() as u32).to_be_bytes());
    elf.extend_from_slice(&0u32.to_be_bytes());
    for half in [52u16, 32, 0, 40, headers.len() as u16, headers.len() as u16 - 1] {
        elf.extend_from_slice(&half.to_be_bytes());
    }
    assert_eq!(elf.len(), 52);

    elf.extend(body);
    for header in headers {
        elf.extend(header.iter().flat_map(|word| word.to_be_bytes()));
    }

    elf
}

fn program() -> Vec<u8> {
    assemble(
        ENTRY,
        &[
            Sect {
                name: ".text",
                kind: SECTION_PROGBITS,
                flags: FLAG_ALLOC | FLAG_EXEC,
                addr: ENTRY,
                data: vec![0x11; 16],
            },
            Sect {
                name: ".data",
                kind: SECTION_PROGBITS,
                flags: FLAG_ALLOC | FLAG_WRITE,
                addr: ENTRY + 0x20,
                data: vec![0x22; 8],
            },
            Sect {
                name: ".bss",
                kind: SECTION_NOBITS,
                flags: FLAG_ALLOC | FLAG_WRITE,
                addr: ENTRY + 0x28,
                data: vec![0; 64],
            },
            Sect {
                name: ".comment",
                kind: SECTION_PROGBITS,
                flags: 0,
                addr: 0,
                data: b"gcc".to_vec(),
            },
        ],
    )
}

#[test]
fn sections() {
    let mut elf = Elf::read(Cursor::new(program())).unwrap();
    assert_eq!(elf.entry(), ENTRY);

    let names = elf
        .sections()
        .iter()
        .map(|section| section.name.as_str())
        .collect::<Vec<_>>();
    insta::assert_debug_snapshot!(names, @r#"
    [
        "",
        ".text",
        ".data",
        ".bss",
        ".comment",
        ".shstrtab",
    ]
    "#);

    let text = elf.section(".text").unwrap();
    assert!(text.is_alloc() && text.is_exec() && text.has_data());
    assert_eq!(elf.section_data(".data").unwrap(), [0x22; 8]);
    assert_eq!(elf.section_data(".bss").unwrap(), [0; 64]);
    assert_eq!(elf.section_data(".comment").unwrap(), b"gcc");
    assert!(matches!(
        elf.section_data(".rodata"),
        Err(ElfError::NoSection { .. })
    ));
}

#[test]
fn objcopy() {
    let mut elf = Elf::read(Cursor::new(program())).unwrap();
    let image = elf.objcopy().unwrap();

    let mut expected = vec![0x11; 16];
    expected.resize(0x20, 0);
    expected.extend([0x22; 8]);
    assert_eq!(image, expected);
}

#[test]
fn data_before_entry() {
    let bytes = assemble(
        ENTRY,
        &[Sect {
            name: ".boot",
            kind: SECTION_PROGBITS,
            flags: FLAG_ALLOC,
            addr: ENTRY - 0x10,
            data: vec![1; 4],
        }],
    );

    let mut elf = Elf::read(Cursor::new(bytes)).unwrap();
    assert!(matches!(
        elf.objcopy(),
        Err(ElfError::BeforeEntry { addr: 0x8000_03F0, .. })
    ));
}

#[test]
fn rejects_other_files() {
    let mut bytes = program();
    bytes[5] = 1;
    assert!(matches!(
        Elf::read(Cursor::new(bytes)),
        Err(ElfError::Unsupported { .. })
    ));

    let mut bytes = program();
    bytes[0] = 0;
    assert!(matches!(
        Elf::read(Cursor::new(bytes)),
        Err(ElfError::Format { .. })
    ));
}
