use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nanorand::{Rng, tls_rng};

use super::*;
use crate::interrupt;
use crate::sim::Sim;

#[test]
fn note_wait_times_out() {
    Sim::install();

    let note = Note::new();
    assert!(!note.wait(Duration::from_millis(10)));
    assert!(!note.is_set());
}

#[test]
fn note_wakes_waiter() {
    Sim::install();

    let note = Arc::new(Note::new());
    let waiter = {
        let note = note.clone();
        std::thread::spawn(move || note.wait(Duration::from_secs(5)))
    };

    std::thread::sleep(Duration::from_millis(20));
    note.notify();
    assert!(waiter.join().unwrap());

    note.clear();
    assert!(!note.is_set());
}

#[test]
fn intr_input_keeps_latest() {
    Sim::install();

    let input = IntrInput::<u32>::new();
    interrupt::free(|cs| assert_eq!(input.get(cs), (None, false)));

    input.put(1);
    input.put(2);
    input.put(3);
    interrupt::free(|cs| {
        assert_eq!(input.get(cs), (Some(3), true));
        assert_eq!(input.get(cs), (Some(3), false));
    });

    input.put(4);
    assert_eq!(input.read(), Some(4));
    interrupt::free(|cs| assert_eq!(input.get(cs), (Some(4), true)));
}

#[test]
fn intr_input_drops_stale_values() {
    Sim::install();

    let input = IntrInput::<Arc<u32>>::new();
    let first = Arc::new(1);
    input.put(first.clone());
    input.put(Arc::new(2));
    assert_eq!(Arc::strong_count(&first), 2);

    input.put(Arc::new(3));
    assert_eq!(Arc::strong_count(&first), 1);
}

#[test]
fn intr_input_is_linearizable() {
    Sim::install();

    const PUTS: u64 = 1_000_000;
    let input = Arc::new(IntrInput::<u64>::new());
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let input = input.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let mut last = 0;
            let mut updates = 0;
            while !done.load(Ordering::Acquire) {
                let (value, updated) = interrupt::free(|cs| input.get(cs));
                let value = value.unwrap_or(0);
                assert!(value >= last, "went back from {last} to {value}");
                assert!(value <= PUTS);
                if updated {
                    assert!(value > last || last == 0);
                    updates += 1;
                }
                last = value;
                std::thread::yield_now();
            }

            updates
        })
    };

    for value in 1..=PUTS {
        input.put(value);
    }

    done.store(true, Ordering::Release);
    let updates = reader.join().unwrap();
    assert!(updates <= PUTS);

    interrupt::free(|cs| {
        let (value, _) = input.get(cs);
        assert_eq!(value, Some(PUTS));
    });
}

#[test]
fn intr_queue_fifo() {
    Sim::install();

    let queue = IntrQueue::<u32, 4>::new();
    assert!(queue.is_empty());
    for i in 0..4 {
        queue.push(i).unwrap();
    }

    assert_eq!(queue.len(), 4);
    assert_eq!(queue.push(4), Err(4));

    interrupt::free(|cs| {
        assert_eq!(queue.peek(cs), Some(&0));
        assert_eq!(queue.pop(cs), Some(0));
        assert_eq!(queue.pop(cs), Some(1));
    });

    queue.push(4).unwrap();
    queue.push(5).unwrap();
    let drained: Vec<_> = interrupt::free(|cs| std::iter::from_fn(|| queue.pop(cs)).collect());
    assert_eq!(drained, [2, 3, 4, 5]);
}

#[test]
fn intr_queue_drops_remaining() {
    let value = Arc::new(());
    {
        let queue = IntrQueue::<Arc<()>, 8>::new();
        queue.push(value.clone()).unwrap();
        queue.push(value.clone()).unwrap();
        assert_eq!(Arc::strong_count(&value), 3);
    }

    assert_eq!(Arc::strong_count(&value), 1);
}

#[test]
fn intr_queue_many_producers() {
    Sim::install();

    const PRODUCERS: usize = 4;
    const PER_PRODUCER: u32 = 2000;

    let queue = Arc::new(IntrQueue::<(usize, u32), 16>::new());
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut rng = tls_rng();
                for seq in 0..PER_PRODUCER {
                    let mut item = (id, seq);
                    while let Err(back) = queue.push(item) {
                        item = back;
                        std::thread::yield_now();
                    }

                    if rng.generate_range(0..8u32) == 0 {
                        std::thread::yield_now();
                    }
                }
            })
        })
        .collect();

    let mut next = [0u32; PRODUCERS];
    let mut received = 0;
    while received < PRODUCERS * PER_PRODUCER as usize {
        match interrupt::free(|cs| queue.pop(cs)) {
            Some((id, seq)) => {
                assert_eq!(seq, next[id], "producer {id} out of order");
                next[id] += 1;
                received += 1;
            }
            None => std::thread::yield_now(),
        }
    }

    for producer in producers {
        producer.join().unwrap();
    }

    assert!(queue.is_empty());
}
