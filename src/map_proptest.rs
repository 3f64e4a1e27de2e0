#![cfg(test)]
//! Model-based randomized tests. A pool of long-lived `Rc` key objects maps
//! each identity to a stable pool index, so arbitrary operation sequences on
//! an `IdentityMap` can be checked against a plain `HashMap` keyed by that
//! index.

use alloc::rc::Rc;
use alloc::vec::Vec;
use std::collections::HashMap;
use std::collections::HashSet;

use proptest::collection::vec;
use proptest::prelude::*;

use crate::map::IdentityMap;

const POOL: usize = 24;
const NULL: usize = POOL; // pool index standing for the logical null key

#[derive(Clone, Debug)]
enum Op {
    Insert(usize, u32),
    Remove(usize),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        8 => (0..=POOL, any::<u32>()).prop_map(|(index, value)| Op::Insert(index, value)),
        4 => (0..=POOL).prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ]
}

fn key_of(pool: &[Rc<usize>], index: usize) -> Option<&Rc<usize>> {
    (index < NULL).then(|| &pool[index])
}

proptest! {
    #[test]
    fn agrees_with_an_index_keyed_model(ops in vec(op(), 1..200)) {
        let pool: Vec<Rc<usize>> = (0..POOL).map(Rc::new).collect();
        let map: IdentityMap<usize, u32> = IdentityMap::with_capacity(0);
        let mut model: HashMap<usize, u32> = HashMap::new();

        for op in ops {
            match op {
                Op::Insert(index, value) => {
                    let previous = map.insert(key_of(&pool, index).cloned(), Rc::new(value));
                    prop_assert_eq!(previous.map(|v| *v), model.insert(index, value));
                }
                Op::Remove(index) => {
                    let removed = map.remove(key_of(&pool, index));
                    prop_assert_eq!(removed.map(|v| *v), model.remove(&index));
                }
                Op::Clear => {
                    map.clear();
                    model.clear();
                }
            }
            prop_assert_eq!(map.len(), model.len());
        }

        for index in 0..=POOL {
            prop_assert_eq!(
                map.get(key_of(&pool, index)).map(|v| *v),
                model.get(&index).copied()
            );
            prop_assert_eq!(map.contains_key(key_of(&pool, index)), model.contains_key(&index));
        }
    }

    #[test]
    fn iterator_removal_agrees_with_the_model(
        entries in vec((0..POOL, any::<u32>()), 1..100),
        keep in vec(any::<bool>(), 64),
    ) {
        let pool: Vec<Rc<usize>> = (0..POOL).map(Rc::new).collect();
        let map: IdentityMap<usize, u32> = IdentityMap::with_capacity(0);
        let mut model: HashMap<usize, u32> = HashMap::new();
        for (index, value) in entries {
            map.insert(Some(pool[index].clone()), Rc::new(value));
            model.insert(index, value);
        }
        let live: HashSet<usize> = model.keys().copied().collect();

        // Walk every entry exactly once, removing a keep-mask-driven subset
        // through the cursor, and land on exactly the model's survivors.
        let mut visited = HashSet::new();
        let mut decision = keep.iter().cycle();
        let mut cursor = map.entry_set().iter();
        while cursor.advance() {
            let index = *cursor.key().unwrap();
            prop_assert!(visited.insert(index));
            if !*decision.next().unwrap() {
                cursor.remove();
                model.remove(&index);
            }
        }

        prop_assert_eq!(&visited, &live);
        prop_assert_eq!(map.len(), model.len());
        for index in 0..POOL {
            prop_assert_eq!(
                map.get(Some(&pool[index])).map(|v| *v),
                model.get(&index).copied()
            );
        }
    }
}
