#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

/// A flat hash map using block-striped Robin Hood probing.
///
/// This module provides [`FlatMap`], a key-value map over open-addressed
/// storage where probing and tag matching operate on 16-slot blocks.
pub mod flat_map;

mod group;
mod raw;

pub use flat_map::FlatMap;
pub use flat_map::Iter;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Default hasher builder used by [`FlatMap::new`].
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else {
        /// Stand-in hasher builder when the `foldhash` feature is disabled.
        ///
        /// This type is uninhabited; construct maps through
        /// [`FlatMap::with_hasher`] with a hasher of your choice instead.
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}
