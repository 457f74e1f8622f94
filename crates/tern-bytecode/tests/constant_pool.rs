use proptest::prelude::*;
use tern_bytecode::{Constant, ConstantPool};

proptest! {
    #[test]
    fn add_is_idempotent_for_any_bit_pattern(bits in any::<u64>()) {
        let mut pool = ConstantPool::new();
        let value = f64::from_bits(bits);
        let first = pool.add_number(value);
        let second = pool.add_number(value);
        prop_assert_eq!(first, second);
        prop_assert_eq!(pool.len(), 1);
    }

    #[test]
    fn distinct_bit_patterns_get_distinct_slots(a in any::<u64>(), b in any::<u64>()) {
        prop_assume!(a != b);
        let mut pool = ConstantPool::new();
        let x = pool.add_number(f64::from_bits(a));
        let y = pool.add_number(f64::from_bits(b));
        prop_assert_ne!(x, y);
    }

    #[test]
    fn strings_dedup_by_text(words in proptest::collection::vec("[a-z]{1,6}", 1..20)) {
        let mut pool = ConstantPool::new();
        let first: Vec<_> = words.iter().map(|w| pool.add_string(w)).collect();
        let again: Vec<_> = words.iter().map(|w| pool.add_string(w)).collect();
        prop_assert_eq!(first, again);

        let mut unique = words.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(pool.len(), unique.len());
    }
}

#[test]
fn positive_and_negative_zero_are_distinct() {
    let mut pool = ConstantPool::new();
    let pos = pool.add_number(0.0);
    let neg = pool.add_number(-0.0);
    assert_ne!(pos, neg);
    assert_eq!(pool.add_number(0.0), pos);
    assert_eq!(pool.add_number(-0.0), neg);
}

#[test]
fn numbers_and_strings_never_collide() {
    let mut pool = ConstantPool::new();
    let one = pool.add_number(1.0);
    let text = pool.add_string("1");
    let truthy = pool.add(Constant::Bool(true));
    assert_ne!(one, text);
    assert_ne!(one, truthy);
    assert_eq!(pool.len(), 3);
}
