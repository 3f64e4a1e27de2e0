#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod map;
pub mod views;

mod table;

#[cfg(feature = "serde")]
mod serde;

#[cfg(test)]
mod map_proptest;

pub use map::IdentityMap;
pub use views::EntryIter;
pub use views::EntrySet;
pub use views::KeyIter;
pub use views::KeySet;
pub use views::ValueIter;
pub use views::Values;
