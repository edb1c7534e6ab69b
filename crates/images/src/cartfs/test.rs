use std::io::Cursor;

use super::*;

fn image(files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
    let mut builder = Builder::new();
    for &(path, data) in files {
        builder.add(path, data).unwrap();
    }

    let mut image = Cursor::new(Vec::new());
    let size = builder.write(&mut image).unwrap();
    assert_eq!(size, image.get_ref().len() as u64);
    assert_eq!(size % ALIGN, 0);

    image.set_position(0);
    image
}

fn names(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(Entry::name).collect()
}

#[test]
fn round_trip() {
    let image = image(&[("a.txt", "aaa"), ("b/c.txt", "cc"), ("b/d.txt", "")]);
    let mut fs = Cartfs::read(image).unwrap();

    assert_eq!(fs.read_file("a.txt").unwrap(), b"aaa");
    assert_eq!(fs.read_file("b/c.txt").unwrap(), b"cc");
    assert_eq!(fs.read_file("b/d.txt").unwrap(), b"");

    assert_eq!(names(fs.read_dir(".").unwrap()), ["a.txt", "b"]);
    assert_eq!(names(fs.read_dir("b").unwrap()), ["c.txt", "d.txt"]);
    assert_eq!(names(fs.read_dir("b/").unwrap()), ["c.txt", "d.txt"]);

    let dir = fs.stat("b").unwrap();
    assert!(dir.is_dir());
    assert_eq!(dir.size(), 0);
    assert!(fs.stat(".").unwrap().is_dir());
}

#[test]
fn layout() {
    let image = image(&[("b/c.txt", "cc"), ("a.txt", "aaa")]);
    let fs = Cartfs::read(image).unwrap();

    let paths = fs.entries().iter().map(Entry::path).collect::<Vec<_>>();
    assert_eq!(paths, ["a.txt", "b", "b/c.txt"]);

    // 3 entries, the paths "a.txtb/b/c.txt" padded to 8
    let base = 8 + 3 * 32 + 8 + 16;
    let offsets = fs.entries().iter().map(Entry::offset).collect::<Vec<_>>();
    assert_eq!(offsets, [base, base + 8, base + 8]);

    let bytes = fs.into_inner().into_inner();
    insta::assert_snapshot!(format!("{:02x?}", &bytes[..16]), @"[00, 00, 00, 00, 00, 00, 00, 03, 00, 00, 00, 00, 00, 00, 00, 00]");
    assert_eq!(&bytes[base as usize..][..3], b"aaa");
    assert_eq!(&bytes[base as usize + 8..][..2], b"cc");
}

#[test]
fn nested_directories() {
    let image = image(&[("x/y/z/deep.bin", "1"), ("x/top.bin", "2"), ("w.bin", "3")]);
    let mut fs = Cartfs::read(image).unwrap();

    assert_eq!(names(fs.read_dir(".").unwrap()), ["w.bin", "x"]);
    assert_eq!(names(fs.read_dir("x").unwrap()), ["top.bin", "y"]);
    assert_eq!(names(fs.read_dir("x/y").unwrap()), ["z"]);
    assert_eq!(names(fs.read_dir("x/y/z").unwrap()), ["deep.bin"]);
    assert_eq!(fs.read_file("x/y/z/deep.bin").unwrap(), b"1");
}

#[test]
fn seek_and_read() {
    let image = image(&[("lorem.txt", "lorem ipsum dolor sit amet")]);
    let mut fs = Cartfs::read(image).unwrap();
    let mut file = fs.open("lorem.txt").unwrap();

    let mut word = [0; 5];
    file.seek(SeekFrom::Start(6)).unwrap();
    file.read_exact(&mut word).unwrap();
    assert_eq!(&word, b"ipsum");

    file.seek(SeekFrom::End(-4)).unwrap();
    let mut rest = String::new();
    file.read_to_string(&mut rest).unwrap();
    assert_eq!(rest, "amet");

    assert!(file.seek(SeekFrom::Current(-100)).is_err());
}

#[test]
fn errors() {
    let image = image(&[("a.txt", "aaa"), ("b/c.txt", "cc")]);
    let mut fs = Cartfs::read(image).unwrap();

    assert!(matches!(fs.open("b"), Err(CartfsError::IsDir { .. })));
    assert!(matches!(fs.open("nope"), Err(CartfsError::NotExist { .. })));
    assert!(matches!(fs.read_dir("a.txt"), Err(CartfsError::NotDir { .. })));
    assert!(matches!(fs.read_dir("b/nope"), Err(CartfsError::NotExist { .. })));

    let mut builder = Builder::new();
    assert!(matches!(builder.add("/abs", ""), Err(CartfsError::InvalidPath { .. })));
    assert!(matches!(builder.add("a/../b", ""), Err(CartfsError::InvalidPath { .. })));
    builder.add("a", "").unwrap();
    assert!(matches!(builder.add("a", ""), Err(CartfsError::Duplicate { .. })));

    builder.add("a/b", "").unwrap();
    let mut image = Cursor::new(Vec::new());
    assert!(matches!(builder.write(&mut image), Err(CartfsError::InvalidPath { .. })));
}

#[test]
fn damaged_table() {
    let mut bytes = image(&[("a.txt", "aaa")]).into_inner();
    // end of the first path past the path table
    bytes[8 + 15] = 0xFF;
    assert!(matches!(Cartfs::read(Cursor::new(bytes)), Err(CartfsError::Invalid { .. })));

    let truncated = Cursor::new(vec![0, 0, 0, 0, 0, 0, 0, 9]);
    assert!(matches!(Cartfs::read(truncated), Err(CartfsError::Format { .. })));
}
