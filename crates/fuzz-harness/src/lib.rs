//! Orbital Fuzz Harness
//!
//! Reusable property-based testing generators for the screening workspace:
//! orbital element ranges, LEO element sets and pairs built to cross each
//! other inside a known window.
//!
//! # Usage
//!
//! ```rust
//! use fuzz_harness::prelude::*;
//!
//! proptest! {
//!     #[test]
//!     fn my_fuzz_test(elements in leo_elements("SAT")) {
//!         prop_assert!(elements.check_bounded().is_ok());
//!     }
//! }
//! ```

pub mod generators;

pub mod prelude {
    pub use crate::generators::*;
    pub use proptest::prelude::*;
}

// Re-export proptest for convenience
pub use proptest;
