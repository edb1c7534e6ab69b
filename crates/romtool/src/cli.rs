use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomFormat {
    /// Big-endian cartridge image
    Z64,
    /// Compressed image for flashing a PicoCart
    Uf2,
}

#[derive(Args, Debug)]
pub struct RomArgs {
    /// Path to the executable, linked to run from the boot address
    pub elf: PathBuf,
    /// Path to the IPL3 boot code, bare or with its 64 byte header
    #[arg(long)]
    pub ipl3: PathBuf,
    /// Title stored in the header
    #[arg(short, long, default_value = "")]
    pub title: String,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = RomFormat::Z64)]
    pub format: RomFormat,
    /// Output path
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum CartfsCommand {
    /// Builds an image out of a host directory
    Build {
        /// Directory whose contents become the root of the image
        dir: PathBuf,
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Lists the contents of an image
    Ls { image: PathBuf },
}

#[derive(Subcommand, Debug)]
pub enum PakfsCommand {
    /// Lists the notes of a pak
    Ls { image: PathBuf },
    /// Copies a note out of a pak
    Extract {
        image: PathBuf,
        name: String,
        /// Output path, the note name if missing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copies a host file into a pak, replacing a note of the same name
    Put {
        image: PathBuf,
        file: PathBuf,
        /// Note name, the uppercased file name if missing
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Removes a note from a pak
    Rm { image: PathBuf, name: String },
    /// Creates an empty pak image
    Format {
        image: PathBuf,
        /// Number of 32 KiB banks
        #[arg(short, long, default_value_t = 1)]
        banks: u8,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Builds a ROM out of an executable
    Rom(RomArgs),
    /// Builds and inspects cartfs images
    #[command(subcommand)]
    Cartfs(CartfsCommand),
    /// Inspects and edits controller pak images
    #[command(subcommand)]
    Pakfs(PakfsCommand),
    /// Packs an executable linked for the RSP into a ucode container
    Ucode {
        elf: PathBuf,
        /// Name stored in the container, the file stem if missing
        #[arg(short, long)]
        name: Option<String>,
        /// Output path
        #[arg(short, long)]
        output: PathBuf,
    },
}

/// romtool: N64 ROM and image utility
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,
}
