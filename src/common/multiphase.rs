//! Immutable types that cross over multiple phases.
//!
//! Identifiers are passed unaltered between the tokenizer, the parser, the
//! checker, and the evaluator, so it is worth giving them a single,
//! cheaply-clonable representation shared by every stage rather than
//! re-allocating a `String` at each handoff.

use std::sync::Arc;

macro_rules! multiphase_string_type {
    ( $( $type: ident ),* ) => {
        $(
            #[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
            pub struct $type(pub Arc<str>);

            impl $type {
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl From<String> for $type {
                fn from(string: String) -> Self {
                    $type(Arc::from(string))
                }
            }

            impl From<&str> for $type {
                fn from(string: &str) -> Self {
                    $type(Arc::from(string))
                }
            }

            impl std::fmt::Display for $type {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl std::borrow::Borrow<str> for $type {
                fn borrow(&self) -> &str {
                    &self.0
                }
            }
        )*
    }
}

multiphase_string_type![Identifier];
