//! Type-safe identifier wrappers around catalog public IDs.
//!
//! Catalog objects are referenced by free-form public ID strings. Wrapping
//! them in distinct newtypes keeps pick, origin, and event identifiers from
//! being mixed up at compile time. All IDs order lexicographically, which is
//! the processing order used wherever a batch of objects is handled.

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a public ID [`String`].
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a public ID string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the public ID string.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`] value.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id! {
    /// Public ID of a phase pick.
    PickId
}

define_id! {
    /// Public ID of an origin (hypocenter solution).
    OriginId
}

define_id! {
    /// Public ID of an event.
    EventId
}

define_id! {
    /// Public ID of an amplitude measurement.
    AmplitudeId
}
