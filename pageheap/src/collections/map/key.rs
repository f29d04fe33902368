use core::hash::Hasher;
use core::marker::PhantomData;

use rustc_hash::FxHasher;

/// FNV-1a offset basis, the starting state of every key hash.
pub const HASH_SEED: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(HASH_SEED, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Fold `value` into the running hash `seed`.
pub fn combine_hash(seed: u64, value: u64) -> u64 {
    value
        .to_le_bytes()
        .iter()
        .fold(seed, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// A type usable as a [`PageMap`](super::PageMap) key with the default
/// strategy.
///
/// Derive it for compound keys with `#[derive(MapKey)]`; fields are hashed
/// and compared through their own `MapKey` impls.
pub trait MapKey {
    fn key_hash(&self) -> u64;
    fn key_eq(&self, other: &Self) -> bool;
}

macro_rules! bytewise_key {
    ($($ty:ty),* $(,)?) => {
        $(
            impl MapKey for $ty {
                #[inline]
                fn key_hash(&self) -> u64 {
                    hash_bytes(&self.to_ne_bytes())
                }
                #[inline]
                fn key_eq(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

bytewise_key!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);

// floats compare by bit pattern so that every key, NaN included, finds itself
macro_rules! float_key {
    ($($ty:ty),*) => {
        $(
            impl MapKey for $ty {
                #[inline]
                fn key_hash(&self) -> u64 {
                    hash_bytes(&self.to_bits().to_ne_bytes())
                }
                #[inline]
                fn key_eq(&self, other: &Self) -> bool {
                    self.to_bits() == other.to_bits()
                }
            }
        )*
    };
}

float_key!(f32, f64);

impl MapKey for bool {
    fn key_hash(&self) -> u64 {
        hash_bytes(&[u8::from(*self)])
    }
    fn key_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl MapKey for char {
    fn key_hash(&self) -> u64 {
        u32::from(*self).key_hash()
    }
    fn key_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl MapKey for str {
    fn key_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        hasher.write(self.as_bytes());
        hasher.finish()
    }
    fn key_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl MapKey for String {
    fn key_hash(&self) -> u64 {
        self.as_str().key_hash()
    }
    fn key_eq(&self, other: &Self) -> bool {
        self == other
    }
}

impl<K: MapKey + ?Sized> MapKey for &K {
    fn key_hash(&self) -> u64 {
        (**self).key_hash()
    }
    fn key_eq(&self, other: &Self) -> bool {
        (**self).key_eq(*other)
    }
}

impl<K: MapKey> MapKey for Option<K> {
    fn key_hash(&self) -> u64 {
        match self {
            None => combine_hash(HASH_SEED, 0),
            Some(key) => combine_hash(combine_hash(HASH_SEED, 1), key.key_hash()),
        }
    }
    fn key_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (None, None) => true,
            (Some(a), Some(b)) => a.key_eq(b),
            _ => false,
        }
    }
}

impl<K: MapKey, const N: usize> MapKey for [K; N] {
    fn key_hash(&self) -> u64 {
        self.iter()
            .fold(HASH_SEED, |hash, key| combine_hash(hash, key.key_hash()))
    }
    fn key_eq(&self, other: &Self) -> bool {
        self.iter().zip(other).all(|(a, b)| a.key_eq(b))
    }
}

macro_rules! tuple_key {
    ($($name:ident $index:tt),+) => {
        impl<$($name: MapKey),+> MapKey for ($($name,)+) {
            fn key_hash(&self) -> u64 {
                let hash = HASH_SEED;
                $(let hash = combine_hash(hash, self.$index.key_hash());)+
                hash
            }
            fn key_eq(&self, other: &Self) -> bool {
                $(self.$index.key_eq(&other.$index))&&+
            }
        }
    };
}

tuple_key!(A 0);
tuple_key!(A 0, B 1);
tuple_key!(A 0, B 1, C 2);
tuple_key!(A 0, B 1, C 2, D 3);

/// How a map hashes and compares its keys.
pub trait KeyStrategy<K> {
    fn hash(&self, key: &K) -> u64;
    fn equal(&self, a: &K, b: &K) -> bool;
}

/// Hashes and compares through [`MapKey`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeys;

impl<K: MapKey> KeyStrategy<K> for DefaultKeys {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        key.key_hash()
    }
    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        a.key_eq(b)
    }
}

/// A caller supplied `(hash, equal)` pair.
///
/// ```
/// use pageheap::FnKeys;
///
/// let keys = FnKeys::new(|key: &(u32, u32)| u64::from(key.0), |a, b| a == b);
/// # let _ = keys;
/// ```
pub struct FnKeys<K> {
    hash: fn(&K) -> u64,
    equal: fn(&K, &K) -> bool,
    _marker: PhantomData<fn(&K)>,
}

impl<K> FnKeys<K> {
    pub fn new(hash: fn(&K) -> u64, equal: fn(&K, &K) -> bool) -> Self {
        Self {
            hash,
            equal,
            _marker: PhantomData,
        }
    }
}

impl<K> Clone for FnKeys<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for FnKeys<K> {}

impl<K> core::fmt::Debug for FnKeys<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FnKeys").finish_non_exhaustive()
    }
}

impl<K> KeyStrategy<K> for FnKeys<K> {
    #[inline]
    fn hash(&self, key: &K) -> u64 {
        (self.hash)(key)
    }
    #[inline]
    fn equal(&self, a: &K, b: &K) -> bool {
        (self.equal)(a, b)
    }
}
