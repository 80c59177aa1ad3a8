//! # Relocation Tests
//!
//! Moving stores into the global arena, and the arena to a new buffer,
//! must preserve every value bit-for-bit and keep region views pointing at
//! the same logical parameters.

use rae_core::{CoreError, Layout, ParamStore, Theta};

fn model_layout(width: usize) -> Layout {
    Layout::builder()
        .matrix("W", width, 2 * width)
        .vector("B", width)
        .matrix("Wl", 1, width)
        .vector("Bl", 1)
        .build()
        .unwrap()
}

fn dict_layout(words: usize, width: usize) -> Layout {
    Layout::builder().matrix("D", words, width).build().unwrap()
}

fn filled(layout: Layout, seed: f64) -> ParamStore {
    let values = (0..layout.size())
        .map(|i| (i as f64 * 0.731 + seed).sin() / 3.0)
        .collect();
    ParamStore::from_vec(layout, values).unwrap()
}

#[test]
fn adopt_preserves_bits_and_views() {
    let model = filled(model_layout(3), 0.1);
    let dict = filled(dict_layout(5, 3), 2.0);
    let before_w: Vec<u64> = model
        .view()
        .matrix("W")
        .unwrap()
        .as_slice()
        .iter()
        .map(|v| v.to_bits())
        .collect();
    let before_row: Vec<u64> = dict
        .view()
        .matrix("D")
        .unwrap()
        .row(4)
        .iter()
        .map(|v| v.to_bits())
        .collect();

    let mut theta = Theta::new();
    let m = theta.adopt(model.clone());
    let d = theta.adopt(dict.clone());

    let after_w: Vec<u64> = theta
        .store(m)
        .unwrap()
        .matrix("W")
        .unwrap()
        .as_slice()
        .iter()
        .map(|v| v.to_bits())
        .collect();
    let after_row: Vec<u64> = theta
        .store(d)
        .unwrap()
        .matrix("D")
        .unwrap()
        .row(4)
        .iter()
        .map(|v| v.to_bits())
        .collect();
    assert_eq!(before_w, after_w);
    assert_eq!(before_row, after_row);
    assert_eq!(theta.extract(m).unwrap(), model);
    assert_eq!(theta.extract(d).unwrap(), dict);
}

#[test]
fn writes_through_views_land_in_the_arena() {
    let mut theta = Theta::new();
    let m = theta.adopt(filled(model_layout(2), 0.0));
    let d = theta.adopt(filled(dict_layout(3, 2), 1.0));

    theta
        .store_mut(d)
        .unwrap()
        .matrix_mut("D")
        .unwrap()
        .row_mut(1)[0] = 42.0;
    theta.store_mut(m).unwrap().vector_mut("Bl").unwrap()[0] = -7.0;

    let d_offset = theta.segment(d).unwrap().offset();
    assert_eq!(theta.as_slice()[d_offset + 2], 42.0);
    assert_eq!(theta.as_slice()[d_offset - 1], -7.0);
}

#[test]
fn move_to_address_round_trips() {
    let mut theta = Theta::new();
    let m = theta.adopt(filled(model_layout(4), 0.5));
    let d = theta.adopt(filled(dict_layout(6, 4), 1.5));

    let mut relocated = vec![0.0; theta.len()];
    theta.move_to_address(&mut relocated).unwrap();
    assert!(theta
        .as_slice()
        .iter()
        .zip(&relocated)
        .all(|(a, b)| a.to_bits() == b.to_bits()));

    // Views resolved in the relocated buffer see the same parameters.
    let original = theta.store(d).unwrap().matrix("D").unwrap().row(5).to_vec();
    let moved = theta.view_in(d, &relocated).unwrap().matrix("D").unwrap().row(5).to_vec();
    assert_eq!(original, moved);

    relocated[theta.segment(m).unwrap().offset()] = 9.0;
    theta.load(&relocated).unwrap();
    assert_eq!(theta.store(m).unwrap().matrix("W").unwrap().row(0)[0], 9.0);
}

#[test]
fn move_to_address_validates_size() {
    let mut theta = Theta::new();
    theta.adopt(filled(model_layout(2), 0.0));
    let mut short = vec![0.0; theta.len() - 1];
    assert_eq!(
        theta.move_to_address(&mut short),
        Err(CoreError::SizeMismatch {
            expected: theta.len(),
            got: theta.len() - 1
        })
    );
}
