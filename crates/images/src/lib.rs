//! Persisted binary formats: the cartridge filesystem, the controller pak filesystem, ROM and
//! UF2 images, microcode containers and the ELF files they're built from.

pub mod cartfs;
pub mod elf;
pub mod pakfs;
pub mod rom;
pub mod ucode;
pub mod uf2;

pub use binrw;
