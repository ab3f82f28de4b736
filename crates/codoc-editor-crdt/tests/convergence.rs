//! Replicas editing through their bindings converge regardless of the order
//! updates are delivered in.

use std::sync::{Arc, Mutex};

use codoc_editor_core::{LocalBuffer, TextEdit};
use codoc_editor_crdt::{ReplicatedDoc, TextBinding};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};

const WORDS: &[&str] = &["a", "# ", "note", "\n", "café ", "→", "line\n", "日本"];

struct Replica {
    doc: ReplicatedDoc,
    buffer: LocalBuffer,
    _binding: TextBinding,
    outbox: Arc<Mutex<Vec<Vec<u8>>>>,
    _sub: loro::Subscription,
}

fn replica(peer: u64, initial: &str) -> Replica {
    let doc = ReplicatedDoc::with_peer_id(peer).unwrap();
    if !initial.is_empty() {
        let seed = ReplicatedDoc::with_peer_id(1000).unwrap();
        seed.transact("seed", |t| t.insert(0, initial)).unwrap();
        doc.import(&seed.export_snapshot().unwrap()).unwrap();
    }
    let outbox = Arc::new(Mutex::new(Vec::new()));
    let sink = outbox.clone();
    let sub = doc.subscribe_local_update(move |update| {
        sink.lock().unwrap().push(update.to_vec());
    });
    let buffer = LocalBuffer::default();
    let binding = TextBinding::new(doc.clone(), buffer.clone());
    Replica {
        doc,
        buffer,
        _binding: binding,
        outbox,
        _sub: sub,
    }
}

fn random_edit(rng: &mut StdRng, buffer: &LocalBuffer) {
    let len = buffer.len_chars();
    let edit = if len > 0 && rng.random_bool(0.35) {
        let start = rng.random_range(0..len);
        let end = (start + rng.random_range(1..=4)).min(len);
        TextEdit::delete(start..end)
    } else {
        let at = rng.random_range(0..=len);
        TextEdit::insert(at, *WORDS.choose(rng).unwrap())
    };
    buffer.apply_edits(vec![edit]).unwrap();
}

#[test]
fn three_replicas_converge_under_shuffled_delivery() {
    for seed in 0..8u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let replicas: Vec<Replica> = (1..=3)
            .map(|peer| replica(peer, "# Title\n\nbody\n"))
            .collect();

        for _round in 0..5 {
            for r in &replicas {
                for _ in 0..rng.random_range(1..=6) {
                    random_edit(&mut rng, &r.buffer);
                }
            }

            let mut deliveries = Vec::new();
            for (from, r) in replicas.iter().enumerate() {
                for update in r.outbox.lock().unwrap().drain(..) {
                    for to in 0..replicas.len() {
                        if to != from {
                            deliveries.push((to, update.clone()));
                        }
                    }
                }
            }
            deliveries.shuffle(&mut rng);
            for (to, update) in deliveries {
                replicas[to].doc.import(&update).unwrap();
            }

            let expected = replicas[0].doc.text();
            for r in &replicas {
                assert_eq!(r.doc.text(), expected, "seed {seed}: replicas diverged");
                assert_eq!(r.buffer.text(), expected, "seed {seed}: buffer drifted");
            }
        }
    }
}

#[test]
fn remote_edits_keep_buffer_and_doc_identical() {
    let a = replica(1, "");
    let b = replica(2, "");

    a.buffer
        .apply_edits(vec![TextEdit::insert(0, "## Intro\nhello\n")])
        .unwrap();
    for update in a.outbox.lock().unwrap().drain(..) {
        b.doc.import(&update).unwrap();
    }
    assert_eq!(b.buffer.text(), "## Intro\nhello\n");

    // Several edits in one batch on the receiving side.
    b.buffer
        .apply_edits(vec![
            TextEdit::new(3..8, "Overview"),
            TextEdit::insert(15, "world\n"),
        ])
        .unwrap();
    for update in b.outbox.lock().unwrap().drain(..) {
        a.doc.import(&update).unwrap();
    }
    assert_eq!(a.buffer.text(), b.buffer.text());
    assert_eq!(a.doc.text(), a.buffer.text());
}
