use std::io::Write;

use super::*;
use crate::carts;
use crate::sim::{self, Sim};

#[test]
fn probe_and_print() {
    let _guard = sim::exclusive();
    let sim = Sim::install();
    sim.take_isviewer_output();

    let mut isviewer = IsViewer::probe().expect("isviewer should answer");
    writeln!(isviewer, "hello from the console").unwrap();
    write!(isviewer, "{}", 42).unwrap();

    assert_eq!(
        String::from_utf8(sim.take_isviewer_output()).unwrap(),
        "hello from the console\n42"
    );
}

#[test]
fn long_text_is_chunked() {
    let _guard = sim::exclusive();
    let sim = Sim::install();
    sim.take_isviewer_output();

    let mut isviewer = IsViewer::probe().unwrap();
    let text: Vec<u8> = (0..BUFFER_SIZE as usize + 100)
        .map(|i| b'a' + (i % 26) as u8)
        .collect();
    assert_eq!(isviewer.write(&text).unwrap(), text.len());
    assert_eq!(sim.take_isviewer_output(), text);
}

#[test]
fn probe_all_finds_isviewer() {
    let _guard = sim::exclusive();
    Sim::install();

    let cart = carts::probe_all().expect("a cart should answer");
    assert_eq!(cart.name(), "isviewer");
}
