mod cli;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use bytesize::ByteSize;
use clap::Parser;
use eyre_pretty::eyre::{Result, WrapErr, eyre};
use images::cartfs::{self, Cartfs};
use images::elf::Elf;
use images::pakfs::{Pakfs, PakfsError};
use images::rom::Rom;
use images::ucode::UcodeImage;
use images::uf2;

use crate::cli::{CartfsCommand, Command, PakfsCommand, RomArgs, RomFormat};

fn read_elf(path: &Path) -> Result<Elf<BufReader<File>>> {
    let file = File::open(path).wrap_err_with(|| format!("opening {}", path.display()))?;
    Ok(Elf::read(BufReader::new(file))?)
}

fn rom(args: &RomArgs) -> Result<()> {
    let mut elf = read_elf(&args.elf)?;
    let program = elf.objcopy()?;
    let ipl3 = fs::read(&args.ipl3).wrap_err_with(|| format!("reading {}", args.ipl3.display()))?;

    let rom = Rom::new(&ipl3, &program, &args.title)?;
    if rom.header.boot_address != elf.entry() {
        tracing::warn!(
            "entry point {:#010x} differs from the boot address {:#010x}",
            elf.entry(),
            rom.header.boot_address
        );
    }

    let bytes = rom.to_bytes()?;
    let mut out = BufWriter::new(File::create(&args.output)?);
    match args.format {
        RomFormat::Z64 => out.write_all(&bytes)?,
        RomFormat::Uf2 => uf2::write_picocart(&mut out, &bytes)?,
    }
    out.flush()?;

    tracing::info!(
        "wrote {} ({:?}, {})",
        args.output.display(),
        args.format,
        ByteSize(bytes.len() as u64)
    );

    Ok(())
}

/// Adds every file under `dir` to `builder`, with paths relative to `root`.
fn add_dir(builder: &mut cartfs::Builder, root: &Path, dir: &Path) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .wrap_err_with(|| format!("reading {}", dir.display()))?
        .collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            add_dir(builder, root, &path)?;
            continue;
        }

        let relative = path
            .strip_prefix(root)?
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        let data = fs::read(&path)?;
        tracing::debug!("adding {relative} ({})", ByteSize(data.len() as u64));
        builder.add(relative, data)?;
    }

    Ok(())
}

fn cartfs(command: &CartfsCommand) -> Result<()> {
    match command {
        CartfsCommand::Build { dir, output } => {
            let mut builder = cartfs::Builder::new();
            add_dir(&mut builder, dir, dir)?;

            let mut out = BufWriter::new(File::create(output)?);
            let size = builder.write(&mut out)?;
            out.flush()?;

            tracing::info!(
                "wrote {} ({} files, {})",
                output.display(),
                builder.len(),
                ByteSize(size)
            );
        }
        CartfsCommand::Ls { image } => {
            let fs = Cartfs::read(BufReader::new(File::open(image)?))?;
            for entry in fs.entries() {
                if entry.is_dir() {
                    println!("{:>10}  {}/", "-", entry.path());
                } else {
                    println!("{:>10}  {}", entry.size(), entry.path());
                }
            }
        }
    }

    Ok(())
}

fn open_pak(image: &Path, write: bool) -> Result<Pakfs<File>> {
    let file = File::options()
        .read(true)
        .write(write)
        .open(image)
        .wrap_err_with(|| format!("opening {}", image.display()))?;

    Pakfs::read(file).wrap_err_with(|| format!("reading {}", image.display()))
}

fn pakfs(command: &PakfsCommand) -> Result<()> {
    match command {
        PakfsCommand::Ls { image } => {
            let mut fs = open_pak(image, false)?;
            let label = fs.label()?;
            if !label.is_empty() {
                println!("label: {label}");
            }

            for stat in fs.read_dir() {
                println!(
                    "{:>6}  {}{}  {}",
                    stat.size,
                    String::from_utf8_lossy(&stat.game_code),
                    String::from_utf8_lossy(&stat.company_code),
                    stat.name
                );
            }

            println!("{} free of {}", ByteSize(fs.free()), ByteSize(fs.size()));
        }
        PakfsCommand::Extract {
            image,
            name,
            output,
        } => {
            let mut fs = open_pak(image, false)?;
            let data = fs.open(name)?.read_to_end()?;

            let output = output.clone().unwrap_or_else(|| PathBuf::from(name));
            fs::write(&output, data)?;
            tracing::info!("extracted {name} to {}", output.display());
        }
        PakfsCommand::Put { image, file, name } => {
            let name = match name {
                Some(name) => name.clone(),
                None => file
                    .file_name()
                    .ok_or_else(|| eyre!("{} has no file name", file.display()))?
                    .to_string_lossy()
                    .to_uppercase(),
            };

            let data = fs::read(file)?;
            let mut fs = open_pak(image, true)?;
            match fs.remove(&name) {
                Ok(()) | Err(PakfsError::NotExist { .. }) => (),
                Err(err) => return Err(err.into()),
            }

            fs.create(&name)?.write_at(&data, 0)?;
            tracing::info!(
                "wrote {name} ({}), {} free",
                ByteSize(data.len() as u64),
                ByteSize(fs.free())
            );
        }
        PakfsCommand::Rm { image, name } => {
            let mut fs = open_pak(image, true)?;
            fs.remove(name)?;
        }
        PakfsCommand::Format { image, banks } => {
            let file = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(image)?;
            file.set_len(*banks as u64 * images::pakfs::BANK_SIZE)?;
            let fs = Pakfs::format(file, *banks)?;
            tracing::info!("formatted {} ({})", image.display(), ByteSize(fs.size()));
        }
    }

    Ok(())
}

fn ucode(elf: &Path, name: Option<&str>, output: &Path) -> Result<()> {
    let name = match name {
        Some(name) => name.to_owned(),
        None => elf
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };

    let mut elf = read_elf(elf)?;
    let image = UcodeImage::from_elf(&mut elf, name)?;

    let mut bytes = Cursor::new(Vec::new());
    image.write(&mut bytes)?;
    fs::write(output, bytes.into_inner())?;

    tracing::info!(
        "wrote {} (text {}, data {}, entry {:#05x})",
        output.display(),
        ByteSize(image.text.len() as u64),
        ByteSize(image.data.len() as u64),
        image.entry
    );

    Ok(())
}

fn setup_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("romtool=info,images=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(env_filter)
        .init();
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();
    let cfg = cli::Config::parse();

    match &cfg.command {
        Command::Rom(args) => rom(args),
        Command::Cartfs(command) => cartfs(command),
        Command::Pakfs(command) => pakfs(command),
        Command::Ucode { elf, name, output } => ucode(elf, name.as_deref(), output),
    }
}
