//! Which optimisations are enabled.
//!
//! [OptFlags] instances are built up with the builder-style methods: start with `all` or `none`
//! and then add / minus individual optimisations.

const OPT_FOLD: u8 = 0b00001;
const OPT_CSE: u8 = 0b00010;
const OPT_FWD: u8 = 0b00100;
const OPT_UNROLL: u8 = 0b01000;
const OPT_DCE: u8 = 0b10000;

/// The set of enabled optimisations. This is an immutable struct: new [OptFlags] are created with
/// the various builder-style methods herein.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OptFlags(u8);

impl Default for OptFlags {
    fn default() -> Self {
        Self::all()
    }
}

#[allow(unused)]
impl OptFlags {
    /// Every optimisation enabled.
    pub const fn all() -> Self {
        Self(OPT_FOLD | OPT_CSE | OPT_FWD | OPT_UNROLL | OPT_DCE)
    }

    /// No optimisations enabled: every instruction is emitted as recorded.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Create a new `OptFlags` with `self` plus peephole folding.
    pub const fn add_fold(self) -> Self {
        Self(self.0 | OPT_FOLD)
    }

    /// Create a new `OptFlags` with `self` minus peephole folding.
    pub const fn minus_fold(self) -> Self {
        Self(self.0 & !OPT_FOLD)
    }

    /// Create a new `OptFlags` with `self` plus common subexpression elimination.
    pub const fn add_cse(self) -> Self {
        Self(self.0 | OPT_CSE)
    }

    /// Create a new `OptFlags` with `self` minus common subexpression elimination.
    pub const fn minus_cse(self) -> Self {
        Self(self.0 & !OPT_CSE)
    }

    /// Create a new `OptFlags` with `self` plus store-to-load forwarding.
    pub const fn add_fwd(self) -> Self {
        Self(self.0 | OPT_FWD)
    }

    /// Create a new `OptFlags` with `self` minus store-to-load forwarding.
    pub const fn minus_fwd(self) -> Self {
        Self(self.0 & !OPT_FWD)
    }

    /// Create a new `OptFlags` with `self` plus loop unrolling.
    pub const fn add_unroll(self) -> Self {
        Self(self.0 | OPT_UNROLL)
    }

    /// Create a new `OptFlags` with `self` minus loop unrolling.
    pub const fn minus_unroll(self) -> Self {
        Self(self.0 & !OPT_UNROLL)
    }

    /// Create a new `OptFlags` with `self` plus dead code elimination.
    pub const fn add_dce(self) -> Self {
        Self(self.0 | OPT_DCE)
    }

    /// Create a new `OptFlags` with `self` minus dead code elimination.
    pub const fn minus_dce(self) -> Self {
        Self(self.0 & !OPT_DCE)
    }

    pub const fn fold(self) -> bool {
        self.0 & OPT_FOLD != 0
    }

    pub const fn cse(self) -> bool {
        self.0 & OPT_CSE != 0
    }

    pub const fn fwd(self) -> bool {
        self.0 & OPT_FWD != 0
    }

    pub const fn unroll(self) -> bool {
        self.0 & OPT_UNROLL != 0
    }

    pub const fn dce(self) -> bool {
        self.0 & OPT_DCE != 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builder() {
        let f = OptFlags::all().minus_cse().minus_dce();
        assert!(f.fold() && f.fwd() && f.unroll());
        assert!(!f.cse() && !f.dce());
        assert_eq!(f.add_cse().add_dce(), OptFlags::default());
        let f = OptFlags::none().add_unroll();
        assert!(f.unroll() && !f.fold());
    }
}
