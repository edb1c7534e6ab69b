use std::io::Cursor;

use super::*;

const LOREM: &str = "Lorem ipsum dolor sit amet, consectetur adipisici elit, sed eiusmod tempor \
                     incidunt ut labore et dolore magna aliqua. Ut enim ad minim veniam, quis \
                     nostrud exercitation ullamco laboris nisi ut aliquid ex ea commodi \
                     consequat. Quis aute iure reprehenderit in voluptate velit esse cillum \
                     dolore eu fugiat nulla pariatur. Excepteur sint obcaecat cupiditat non \
                     proident, sunt in culpa qui officia deserunt mollit anim id est laborum.";

fn formatted() -> Pakfs<Cursor<Vec<u8>>> {
    let dev = Cursor::new(vec![0; BANK_SIZE as usize]);
    Pakfs::format(dev, 1).unwrap()
}

fn flipped(image: &[u8], offsets: &[usize]) -> Cursor<Vec<u8>> {
    let mut image = image.to_vec();
    for &offset in offsets {
        image[offset] = !image[offset];
    }

    Cursor::new(image)
}

fn names<D>(fs: &Pakfs<D>) -> Vec<String> {
    fs.read_dir().into_iter().map(|stat| stat.name).collect()
}

#[test]
fn format_and_read() {
    let fs = formatted();
    assert_eq!(fs.size(), 123 * PAGE_SIZE);
    assert_eq!(fs.free(), fs.size());

    let image = fs.into_inner().into_inner();
    assert_eq!(image.len() as u64, BANK_SIZE);

    let mut fs = Pakfs::read(Cursor::new(image)).unwrap();
    assert!(fs.read_dir().is_empty());
    assert_eq!(fs.free(), 123 * PAGE_SIZE);
    assert_eq!(fs.label().unwrap(), "");
}

#[test]
fn blank_device_is_inconsistent() {
    let dev = Cursor::new(vec![0; 10 * PAGE_SIZE as usize]);
    assert!(matches!(Pakfs::read(dev), Err(PakfsError::Inconsistent)));
}

#[test]
fn damaged_id_sectors() {
    let image = formatted().into_inner().into_inner();

    let damages: [&[usize]; 3] = [&[0x20], &[0x20, 0x60], &[0x20, 0x60, 0x80]];
    for damage in damages {
        assert!(Pakfs::read(flipped(&image, damage)).is_ok(), "{damage:x?}");
    }

    let all = flipped(&image, &[0x20, 0x60, 0x80, 0xC0]);
    assert!(matches!(Pakfs::read(all), Err(PakfsError::Inconsistent)));
}

#[test]
fn damaged_inode_table() {
    let image = formatted().into_inner().into_inner();

    let mut fs = Pakfs::read(flipped(&image, &[0x1FF])).unwrap();
    assert_eq!(fs.free(), 123 * PAGE_SIZE);
    // writing repairs the primary table
    fs.create("FIX").unwrap().write_at(b"x", 0).unwrap();
    let repaired = fs.into_inner().into_inner();
    assert!(Pakfs::read(flipped(&repaired, &[0x2FF])).is_ok());

    let both = flipped(&image, &[0x1FF, 0x2FF]);
    assert!(matches!(Pakfs::read(both), Err(PakfsError::Inconsistent)));
}

#[test]
fn write_and_read_back() {
    let mut fs = formatted();
    let mut file = fs.create("SAVE.DAT").unwrap();
    assert_eq!(file.size(), 0);

    let written = file.write_at(LOREM.as_bytes(), 100).unwrap();
    assert_eq!(written, LOREM.len());
    assert_eq!(file.size(), (100 + LOREM.len() as u64).next_multiple_of(PAGE_SIZE));

    let mut buf = vec![0; LOREM.len()];
    assert_eq!(file.read_at(&mut buf, 100).unwrap(), LOREM.len());
    assert_eq!(buf, LOREM.as_bytes());

    // never written bytes of new pages read as zero
    let data = file.read_to_end().unwrap();
    assert!(data[..100].iter().all(|&b| b == 0));
    assert!(data[100 + LOREM.len()..].iter().all(|&b| b == 0));

    // reads stop at the end of the file
    let mut tail = [0xAA; 64];
    assert_eq!(file.read_at(&mut tail, 3 * PAGE_SIZE - 16).unwrap(), 16);
    assert_eq!(file.read_at(&mut tail, 10 * PAGE_SIZE).unwrap(), 0);

    let used = 3 * PAGE_SIZE;
    assert_eq!(fs.free(), fs.size() - used);

    let mut fs = Pakfs::read(fs.into_inner()).unwrap();
    assert_eq!(names(&fs), ["SAVE.DAT"]);
    let mut buf = vec![0; LOREM.len()];
    fs.open("SAVE.DAT").unwrap().read_at(&mut buf, 100).unwrap();
    assert_eq!(buf, LOREM.as_bytes());
}

#[test]
fn overwrite_within_file() {
    let mut fs = formatted();
    let mut file = fs.create("A").unwrap();
    file.write_at(&[1; 512], 0).unwrap();
    file.write_at(b"foo", 254).unwrap();

    let data = file.read_to_end().unwrap();
    assert_eq!(data.len(), 512);
    assert_eq!(&data[252..258], &[1, 1, b'f', b'o', b'o', 1]);

    // empty writes don't grow the file
    file.write_at(&[], 9999).unwrap();
    assert_eq!(file.size(), 512);
}

#[test]
fn file_names() {
    let mut fs = formatted();

    for name in ["SIMPLE.TXT", "NOEXT", "NOEXT2.", ".EXT", "DOT.IN.NAME", "NONULLTERMINATOR", "NO.NULL"] {
        let file = fs.create(name).unwrap();
        assert_eq!(file.name(), name);
    }

    assert!(matches!(fs.create("SIMPLE.TXT"), Err(PakfsError::Exist { .. })));
    assert!(matches!(fs.create("VERYLONGFILENAME!"), Err(PakfsError::NameTooLong { .. })));
    assert!(matches!(fs.create("NAME.EXTEN"), Err(PakfsError::NameTooLong { .. })));
    assert!(matches!(fs.create("ISDIR/FILE"), Err(PakfsError::NotExist { .. })));
    assert!(matches!(fs.create("lowercase"), Err(PakfsError::Invalid { .. })));
    assert!(matches!(fs.open("."), Err(PakfsError::IsDir)));

    // creating files takes no pages
    assert_eq!(fs.free(), fs.size());
    assert_eq!(fs.read_dir().len(), 7);
}

#[test]
fn notes_run_out() {
    let mut fs = formatted();
    for i in 0..NOTE_COUNT {
        fs.create(&format!("NOTE{i}")).unwrap();
    }

    assert!(matches!(fs.create("ONE MORE"), Err(PakfsError::NoSpace)));
}

#[test]
fn pages_run_out() {
    let mut fs = formatted();
    let mut file = fs.create("BIG").unwrap();
    let err = file.write_at(LOREM.as_bytes(), 1_000_000).unwrap_err();
    assert!(matches!(err, PakfsError::NoSpace));
    assert_eq!(file.size(), 0);

    let all = vec![0xEE; fs.size() as usize];
    let mut file = fs.open("BIG").unwrap();
    file.write_at(&all, 0).unwrap();
    assert_eq!(fs.free(), 0);
}

#[test]
fn remove_frees_pages() {
    let mut fs = formatted();
    fs.create("GONE").unwrap().write_at(&[7; 1000], 0).unwrap();
    assert_eq!(fs.free(), fs.size() - 4 * PAGE_SIZE);

    fs.remove("GONE").unwrap();
    assert_eq!(fs.free(), fs.size());
    assert!(names(&fs).is_empty());
    assert!(matches!(fs.remove("GONE"), Err(PakfsError::NotExist { .. })));

    let fs = Pakfs::read(fs.into_inner()).unwrap();
    assert_eq!(fs.free(), fs.size());
}

#[test]
fn rename_replaces() {
    let mut fs = formatted();
    fs.create("OLD").unwrap().write_at(b"old", 0).unwrap();
    fs.create("NEW").unwrap().write_at(b"new", 0).unwrap();

    fs.rename("OLD", "NEW").unwrap();
    assert_eq!(names(&fs), ["NEW"]);
    assert_eq!(&fs.open("NEW").unwrap().read_to_end().unwrap()[..3], b"old");
    assert_eq!(fs.free(), fs.size() - PAGE_SIZE);

    let mut fs = Pakfs::read(fs.into_inner()).unwrap();
    assert_eq!(names(&fs), ["NEW"]);
    assert!(matches!(fs.rename("MISSING", "X"), Err(PakfsError::NotExist { .. })));
}

#[test]
fn truncate_rounds_to_pages() {
    let mut fs = formatted();
    fs.create("T").unwrap().write_at(&[9; 600], 0).unwrap();

    fs.truncate("T", 300).unwrap();
    let data = fs.open("T").unwrap().read_to_end().unwrap();
    assert_eq!(data.len(), 512);
    assert!(data[..300].iter().all(|&b| b == 9));
    assert!(data[300..].iter().all(|&b| b == 0));

    fs.truncate("T", 1).unwrap();
    assert_eq!(fs.stat("T").unwrap().size, PAGE_SIZE);

    fs.truncate("T", 0).unwrap();
    assert_eq!(fs.stat("T").unwrap().size, 0);
    assert_eq!(fs.free(), fs.size());

    fs.truncate("T", 1000).unwrap();
    assert_eq!(fs.stat("T").unwrap().size, 4 * PAGE_SIZE);
}

#[test]
fn codes() {
    let mut fs = formatted();
    let mut file = fs.create("PERFECT DARK").unwrap();
    file.set_game_code(*b"NPDP").unwrap();
    file.set_company_code(*b"4Y").unwrap();

    let fs = Pakfs::read(fs.into_inner()).unwrap();
    let stat = fs.stat("PERFECT DARK").unwrap();
    assert_eq!(&stat.game_code, b"NPDP");
    assert_eq!(&stat.company_code, b"4Y");
}

#[test]
fn charmap_round_trip() {
    let text = "V82, \"METIN\"";
    let bytes = charmap::encode(text).unwrap();
    assert_eq!(bytes[0], 47);
    assert_eq!(charmap::decode(&bytes), text);

    let kana = charmap::encode("パックン").unwrap();
    assert_eq!(kana, [144, 74, 87, 79]);
    assert_eq!(charmap::decode(&kana), "パックン");

    assert_eq!(charmap::encode("a"), Err('a'));
    assert_eq!(charmap::decode(&[0x1A, 0x05, 0x1B, 0, 0x1C]), "A\u{FFFD}B");
}
