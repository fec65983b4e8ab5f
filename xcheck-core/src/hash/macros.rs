//! Declarative hooks for user types

/// Implement [`CrossCheckHash`](crate::hash::CrossCheckHash) for a struct by
/// folding the listed fields in order.
///
/// List the fields in declaration order; listing them in another order
/// produces a hash that will not match a variant hashing in declaration
/// order. Omitted fields are not cross-checked.
///
/// ```rust
/// struct Foo { a: i32, b: i32 }
/// xcheck::cross_check_struct!(Foo { a, b });
///
/// struct Meters(f64);
/// xcheck::cross_check_struct!(Meters(0));
/// ```
#[macro_export]
macro_rules! cross_check_struct {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl $crate::hash::CrossCheckHash for $ty {
            fn cross_check_hash(&self, ctx: &$crate::hash::HashContext<'_>) -> u64 {
                ctx.aggregate(stringify!($ty))
                    $(.field(&self.$field))*
                    .finish()
            }
        }
    };
    ($ty:ident ( $($index:tt),* $(,)? )) => {
        impl $crate::hash::CrossCheckHash for $ty {
            fn cross_check_hash(&self, ctx: &$crate::hash::HashContext<'_>) -> u64 {
                ctx.aggregate(stringify!($ty))
                    $(.field(&self.$index))*
                    .finish()
            }
        }
    };
}

/// Implement [`CrossCheckHash`](crate::hash::CrossCheckHash) for a fieldless
/// enum by hashing its discriminant as the given integer type, the way a C
/// variant hashes its `enum` value.
///
/// ```rust
/// #[derive(Clone, Copy)]
/// #[repr(i32)]
/// enum Color { Red = 1, Green = 2 }
/// xcheck::cross_check_enum!(Color as i32);
///
/// assert_eq!(xcheck::hash::hash_value(&Color::Green), xcheck::hash::hash_value(&2i32));
/// ```
#[macro_export]
macro_rules! cross_check_enum {
    ($ty:ident as $repr:ty) => {
        impl $crate::hash::CrossCheckHash for $ty {
            fn cross_check_hash(&self, ctx: &$crate::hash::HashContext<'_>) -> u64 {
                let discriminant = *self as $repr;
                $crate::hash::CrossCheckHash::cross_check_hash(&discriminant, ctx)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::hash::{hash_value, HashContext, HashLimits};
    use crate::hash::combiner::CombinerTable;
    use crate::hash::CrossCheckHash;

    struct Foo {
        a: i32,
        b: i32,
    }
    crate::cross_check_struct!(Foo { a, b });

    struct Swapped {
        a: i32,
        b: i32,
    }
    crate::cross_check_struct!(Swapped { b, a });

    struct Wrapper(u64, bool);
    crate::cross_check_struct!(Wrapper(0, 1));

    #[derive(Clone, Copy)]
    #[repr(u8)]
    enum Mode {
        Off = 0,
        On = 1,
    }
    crate::cross_check_enum!(Mode as u8);

    #[test]
    fn test_struct_reference_vector() {
        assert_eq!(hash_value(&Foo { a: 1000, b: 1337 }), 0x8eef_1fe2_e164_6370);
    }

    #[test]
    fn test_field_order_detected() {
        let in_order = hash_value(&Foo { a: 1, b: 2 });
        let permuted = hash_value(&Swapped { a: 1, b: 2 });
        assert_ne!(in_order, permuted);
    }

    #[test]
    fn test_tuple_struct() {
        assert_ne!(hash_value(&Wrapper(1, true)), hash_value(&Wrapper(1, false)));
    }

    #[test]
    fn test_enum_discriminant() {
        assert_eq!(hash_value(&Mode::On), hash_value(&1u8));
        assert_ne!(hash_value(&Mode::On), hash_value(&Mode::Off));
    }

    #[test]
    fn test_struct_uses_assigned_combiner() {
        let mut table = CombinerTable::new();
        table.assign("Foo", "rotate_xor").unwrap();
        let ctx = HashContext::with_combiners(HashLimits::default(), &table);
        let foo = Foo { a: 1000, b: 1337 };
        assert_ne!(foo.cross_check_hash(&ctx), hash_value(&foo));
    }
}
