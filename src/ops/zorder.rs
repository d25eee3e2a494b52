use crate::canvas::{Layer, LayerId, LayerStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Towards the top of the stack (higher z).
    Up,
    Down,
}

/// Moves every selected layer one slot, swapping with a non-selected neighbour.
///
/// Returns true if anything moved.
pub fn move_relative(store: &mut LayerStore, selection: &[LayerId], direction: Direction) -> bool {
    let selected: Vec<usize> = store
        .iter()
        .enumerate()
        .filter(|(_, l)| selection.contains(&l.id))
        .map(|(i, _)| i)
        .collect();
    let layers = store.layers_mut();
    let mut moved = false;

    match direction {
        Direction::Up => {
            for &i in selected.iter().rev() {
                if i + 1 < layers.len() && !selected_at(layers, selection, i + 1) {
                    layers.swap(i, i + 1);
                    moved = true;
                }
            }
        }
        Direction::Down => {
            for &i in selected.iter() {
                if i > 0 && !selected_at(layers, selection, i - 1) {
                    layers.swap(i, i - 1);
                    moved = true;
                }
            }
        }
    }
    store.renumber();
    moved
}

fn selected_at(layers: &[Layer], selection: &[LayerId], i: usize) -> bool {
    selection.contains(&layers[i].id)
}

/// Reinserts the selection at `target` in display order (top-first).
///
/// Selected layers keep their relative order. `z = count - 1 - position`.
pub fn move_absolute(store: &mut LayerStore, selection: &[LayerId], target_display_index: usize) -> bool {
    let before = store.ids();
    let display: Vec<LayerId> = store.display_order();
    let (picked, mut rest): (Vec<LayerId>, Vec<LayerId>) =
        display.into_iter().partition(|id| selection.contains(id));
    if picked.is_empty() {
        return false;
    }
    let at = target_display_index.min(rest.len());
    rest.splice(at..at, picked);

    let count = rest.len();
    let layers = store.layers_mut();
    for (position, id) in rest.iter().enumerate() {
        if let Some(layer) = layers.iter_mut().find(|l| l.id == *id) {
            layer.z_index = count - 1 - position;
        }
    }
    layers.sort_by_key(|l| l.z_index);
    store.renumber();
    store.ids() != before
}

pub fn bring_to_front(store: &mut LayerStore, selection: &[LayerId]) -> bool {
    move_absolute(store, selection, 0)
}

pub fn send_to_back(store: &mut LayerStore, selection: &[LayerId]) -> bool {
    let bottom = store.len();
    move_absolute(store, selection, bottom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::tests::layer_at;

    fn store_of(n: usize) -> (LayerStore, Vec<LayerId>) {
        let mut store = LayerStore::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let l = layer_at(&format!("l{i}"), 0.0, 0.0, 4.0, 4.0);
            ids.push(l.id);
            store.push_top(l);
        }
        (store, ids)
    }

    fn z_of(store: &LayerStore, id: LayerId) -> usize {
        store.get(id).map(|l| l.z_index).unwrap()
    }

    #[test]
    fn moving_bottom_layer_up_swaps() {
        let (mut store, ids) = store_of(2);
        assert!(move_relative(&mut store, &[ids[0]], Direction::Up));
        assert_eq!(z_of(&store, ids[0]), 1);
        assert_eq!(z_of(&store, ids[1]), 0);
    }

    #[test]
    fn adjacent_selection_moves_as_block() {
        let (mut store, ids) = store_of(4);
        move_relative(&mut store, &[ids[1], ids[2]], Direction::Up);
        assert_eq!(store.ids(), vec![ids[0], ids[3], ids[1], ids[2]]);
        move_relative(&mut store, &[ids[1], ids[2]], Direction::Up);
        // Already at the top: nothing moves.
        assert_eq!(store.ids(), vec![ids[0], ids[3], ids[1], ids[2]]);
    }

    #[test]
    fn move_down_at_bottom_is_noop() {
        let (mut store, ids) = store_of(3);
        assert!(!move_relative(&mut store, &[ids[0]], Direction::Down));
        assert_eq!(store.ids(), ids);
    }

    #[test]
    fn absolute_move_uses_display_order() {
        let (mut store, ids) = store_of(4);
        // Display order is [3, 2, 1, 0]; put layer 0 at the top.
        assert!(move_absolute(&mut store, &[ids[0]], 0));
        assert_eq!(store.display_order(), vec![ids[0], ids[3], ids[2], ids[1]]);
        let z: Vec<usize> = store.iter().map(|l| l.z_index).collect();
        assert_eq!(z, vec![0, 1, 2, 3]);
    }

    #[test]
    fn front_and_back() {
        let (mut store, ids) = store_of(3);
        send_to_back(&mut store, &[ids[2]]);
        assert_eq!(z_of(&store, ids[2]), 0);
        bring_to_front(&mut store, &[ids[2]]);
        assert_eq!(z_of(&store, ids[2]), 2);
    }
}
