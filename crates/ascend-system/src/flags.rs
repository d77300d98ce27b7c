//! Flag words and `(matchbits, matchvalue)` filters shared by variables and
//! relations.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;

macro_rules! flag_word {
    ($(#[$meta:meta])* $name:ident { $($(#[$fmeta:meta])* $flag:ident = $bit:expr,)* }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            $($(#[$fmeta])* pub const $flag: Self = Self($bit);)*

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn from_bits(bits: u32) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u32 {
                self.0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// Set or clear `other` according to `on`.
            pub fn set(&mut self, other: Self, on: bool) {
                if on {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }

            fn names(self) -> Vec<&'static str> {
                let mut out = Vec::new();
                $(if self.contains(Self::$flag) {
                    out.push(stringify!($flag));
                })*
                out
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#06x} {})", stringify!($name), self.0, self.names().join("|"))
            }
        }
    };
}

flag_word! {
    /// Solver bookkeeping bits of a variable.
    VarFlags {
        /// Appears in at least one relation of the system.
        INCIDENT = 0x1,
        /// The instance's `fixed` part is TRUE.
        FIXED = 0x2,
        /// Derivative with respect to the independent variable.
        DERIV = 0x4,
        /// The independent variable.
        INDEP = 0x8,
        ACTIVE = 0x10,
    }
}

flag_word! {
    /// Solver bookkeeping bits of a relation.
    RelFlags {
        /// The relation's `included` part is TRUE.
        INCLUDED = 0x1,
        /// Operator is `=`.
        EQUALITY = 0x2,
        BLACKBOX = 0x4,
        /// Declared inside a CONDITIONAL block.
        CONDITIONAL = 0x8,
        /// Some incident variable is a derivative.
        DIFFERENTIAL = 0x10,
        ACTIVE = 0x20,
        /// Residual within tolerance at the last evaluation.
        SATISFIED = 0x40,
        /// Assigned to a block by a decomposition.
        INBLOCK = 0x80,
    }
}

/// Selects items whose flags agree with `matchvalue` on every bit of
/// `matchbits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Filter<F> {
    pub matchbits: F,
    pub matchvalue: F,
}

pub type VarFilter = Filter<VarFlags>;
pub type RelFilter = Filter<RelFlags>;

impl VarFilter {
    pub const fn new(matchbits: VarFlags, matchvalue: VarFlags) -> Self {
        Self { matchbits, matchvalue }
    }

    /// Matches every variable.
    pub const fn all() -> Self {
        Self::new(VarFlags::empty(), VarFlags::empty())
    }

    pub fn apply(&self, flags: VarFlags) -> bool {
        flags.bits() & self.matchbits.bits() == self.matchvalue.bits() & self.matchbits.bits()
    }
}

impl RelFilter {
    pub const fn new(matchbits: RelFlags, matchvalue: RelFlags) -> Self {
        Self { matchbits, matchvalue }
    }

    /// Matches every relation.
    pub const fn all() -> Self {
        Self::new(RelFlags::empty(), RelFlags::empty())
    }

    /// Included and active relations: the rows a solver works on.
    pub fn solved() -> Self {
        let bits = RelFlags::INCLUDED | RelFlags::ACTIVE;
        Self::new(bits, bits)
    }

    pub fn apply(&self, flags: RelFlags) -> bool {
        flags.bits() & self.matchbits.bits() == self.matchvalue.bits() & self.matchbits.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_filter_masks_irrelevant_bits() {
        let flags = RelFlags::from_bits(0b0110);
        let filter = RelFilter::new(RelFlags::from_bits(0b0110), RelFlags::from_bits(0b0010));
        assert!(!filter.apply(flags));
        let filter = RelFilter::new(RelFlags::from_bits(0b0110), RelFlags::from_bits(0b0110));
        assert!(filter.apply(flags));
        assert!(RelFilter::all().apply(flags));
    }

    #[test]
    fn test_set_and_debug() {
        let mut flags = VarFlags::empty();
        flags.set(VarFlags::FIXED, true);
        flags |= VarFlags::INCIDENT;
        assert!(flags.contains(VarFlags::FIXED | VarFlags::INCIDENT));
        flags.set(VarFlags::FIXED, false);
        assert_eq!(flags, VarFlags::INCIDENT);
        assert_eq!(format!("{:?}", flags), "VarFlags(0x0001 INCIDENT)");
    }

    proptest! {
        #[test]
        fn prop_filter_ignores_unmasked_bits(
            flags in any::<u32>(),
            bits in any::<u32>(),
            value in any::<u32>(),
            noise in any::<u32>(),
        ) {
            let filter = VarFilter::new(VarFlags::from_bits(bits), VarFlags::from_bits(value));
            let noisy = VarFlags::from_bits((flags & bits) | (noise & !bits));
            prop_assert_eq!(filter.apply(VarFlags::from_bits(flags)), filter.apply(noisy));
        }
    }
}
