//! `CrossCheckHash` for primitives and standard library types

use std::borrow::Cow;
use std::rc::Rc;
use std::sync::Arc;

use super::{
    hash_primitive, hash_primitive_wide, CrossCheckHash, HashContext, PrimitiveKind,
    NULL_POINTER_HASH,
};

macro_rules! impl_primitive {
    ($($ty:ty => $bits:ty, $kind:ident);* $(;)?) => {
        $(
            impl CrossCheckHash for $ty {
                #[inline]
                fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
                    hash_primitive(*self as $bits as u64, PrimitiveKind::$kind)
                }
            }
        )*
    };
}

impl_primitive! {
    i8 => u8, I8;
    i16 => u16, I16;
    i32 => u32, I32;
    i64 => u64, I64;
    isize => u64, I64;
    u8 => u8, U8;
    u16 => u16, U16;
    u32 => u32, U32;
    u64 => u64, U64;
    usize => u64, U64;
}

impl CrossCheckHash for i128 {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive_wide(*self as u128, PrimitiveKind::I128)
    }
}

impl CrossCheckHash for u128 {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive_wide(*self, PrimitiveKind::U128)
    }
}

impl CrossCheckHash for bool {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive(*self as u64, PrimitiveKind::Bool)
    }
}

impl CrossCheckHash for char {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive(*self as u32 as u64, PrimitiveKind::Char)
    }
}

// Floats hash their IEEE-754 bit pattern: -0.0 and 0.0 differ, as do NaN payloads.
impl CrossCheckHash for f32 {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive(self.to_bits() as u64, PrimitiveKind::F32)
    }
}

impl CrossCheckHash for f64 {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive(self.to_bits(), PrimitiveKind::F64)
    }
}

impl CrossCheckHash for () {
    fn cross_check_hash(&self, _ctx: &HashContext<'_>) -> u64 {
        hash_primitive(0, PrimitiveKind::Unit)
    }
}

// Indirection consumes one level of the depth budget.
macro_rules! impl_pointer {
    ($($ptr:ident),*) => {
        $(
            impl<T: CrossCheckHash + ?Sized> CrossCheckHash for $ptr<T> {
                fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
                    match ctx.descend() {
                        Some(child) => (**self).cross_check_hash(&child),
                        None => super::DEPTH_LIMIT_HASH,
                    }
                }
            }
        )*
    };
}

impl_pointer!(Box, Rc, Arc);

impl<T: CrossCheckHash + ?Sized> CrossCheckHash for &T {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        match ctx.descend() {
            Some(child) => (**self).cross_check_hash(&child),
            None => super::DEPTH_LIMIT_HASH,
        }
    }
}

impl<T: CrossCheckHash + ?Sized> CrossCheckHash for &mut T {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        match ctx.descend() {
            Some(child) => (**self).cross_check_hash(&child),
            None => super::DEPTH_LIMIT_HASH,
        }
    }
}

/// `Option` is a nullable pointer: `None` hashes to the null sentinel.
impl<T: CrossCheckHash> CrossCheckHash for Option<T> {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        match self {
            Some(value) => value.cross_check_hash(ctx),
            None => NULL_POINTER_HASH,
        }
    }
}

impl<T: CrossCheckHash> CrossCheckHash for [T] {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        ctx.sequence(self.len(), self.iter())
    }
}

impl<T: CrossCheckHash, const N: usize> CrossCheckHash for [T; N] {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        ctx.sequence(N, self.iter())
    }
}

impl<T: CrossCheckHash> CrossCheckHash for Vec<T> {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        self.as_slice().cross_check_hash(ctx)
    }
}

/// Strings hash as their UTF-8 bytes, matching a C `char` buffer.
impl CrossCheckHash for str {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        self.as_bytes().cross_check_hash(ctx)
    }
}

impl CrossCheckHash for String {
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        self.as_str().cross_check_hash(ctx)
    }
}

impl<T> CrossCheckHash for Cow<'_, T>
where
    T: CrossCheckHash + ToOwned + ?Sized,
{
    fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
        (**self).cross_check_hash(ctx)
    }
}

macro_rules! impl_tuple {
    ($($name:ident)+) => {
        impl<$($name: CrossCheckHash),+> CrossCheckHash for ($($name,)+) {
            #[allow(non_snake_case)]
            fn cross_check_hash(&self, ctx: &HashContext<'_>) -> u64 {
                let ($($name,)+) = self;
                ctx.aggregate("()")
                    $(.field($name))+
                    .finish()
            }
        }
    };
}

impl_tuple!(A);
impl_tuple!(A B);
impl_tuple!(A B C);
impl_tuple!(A B C D);
impl_tuple!(A B C D E);
impl_tuple!(A B C D E F);

#[cfg(test)]
mod tests {
    use super::super::{
        hash_value, hash_value_with, HashLimits, DEPTH_LIMIT_HASH, EMPTY_SEQUENCE_HASH,
        NULL_POINTER_HASH,
    };

    #[test]
    fn test_reference_hashes_pointee() {
        let x = 42i32;
        assert_eq!(hash_value(&&x), hash_value(&x));
        assert_eq!(hash_value(&Box::new(x)), hash_value(&x));
    }

    #[test]
    fn test_option_null_sentinel() {
        assert_eq!(hash_value(&None::<i32>), NULL_POINTER_HASH);
        assert_eq!(hash_value(&Some(5u8)), hash_value(&5u8));
    }

    #[test]
    fn test_empty_sequence_sentinel() {
        let empty: Vec<i32> = Vec::new();
        assert_eq!(hash_value(&empty), EMPTY_SEQUENCE_HASH);
        assert_eq!(hash_value(""), EMPTY_SEQUENCE_HASH);
    }

    #[test]
    fn test_sequence_order_sensitive() {
        assert_ne!(hash_value(&vec![1i32, 2]), hash_value(&vec![2i32, 1]));
    }

    #[test]
    fn test_array_slice_vec_agree() {
        let arr = [3u16, 4, 5];
        assert_eq!(hash_value(&arr), hash_value(&arr[..]));
        assert_eq!(hash_value(&arr), hash_value(&arr.to_vec()));
    }

    #[test]
    fn test_string_hashes_bytes() {
        assert_eq!(hash_value("abc"), hash_value(&b"abc"[..]));
        assert_eq!(hash_value(&"abc".to_string()), hash_value("abc"));
    }

    #[test]
    fn test_length_bound_still_sees_length() {
        let limits = HashLimits::default().with_max_len(2);
        let short = vec![1u8, 2, 3];
        let long = vec![1u8, 2, 9, 9];
        // Elements past the bound are ignored, the length is not.
        assert_eq!(
            hash_value_with(&short, limits),
            hash_value_with(&vec![1u8, 2, 7], limits)
        );
        assert_ne!(hash_value_with(&short, limits), hash_value_with(&long, limits));
    }

    #[test]
    fn test_self_referential_depth_bounded() {
        struct Node {
            value: i32,
            next: Option<Box<Node>>,
        }
        crate::cross_check_struct!(Node { value, next });

        let mut list = Node { value: 0, next: None };
        for i in 1..100 {
            list = Node {
                value: i,
                next: Some(Box::new(list)),
            };
        }
        let limits = HashLimits::default().with_max_depth(4);
        let h = hash_value_with(&list, limits);
        assert_ne!(h, DEPTH_LIMIT_HASH);
        assert_eq!(h, hash_value_with(&list, limits));
    }

    #[test]
    fn test_tuple_order_sensitive() {
        assert_ne!(hash_value(&(1i32, 2i32)), hash_value(&(2i32, 1i32)));
    }
}
