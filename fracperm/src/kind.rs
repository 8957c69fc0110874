//! Permission kinds and how they split.

use core::cmp::Ordering;
use core::fmt::{self, Display};

/// How exclusively a reference may access an object.
///
/// | kind      | this reference may write | others may write | others may read |
/// |-----------|--------------------------|------------------|-----------------|
/// | Unique    | yes                      | no               | no              |
/// | Full      | yes                      | no               | yes             |
/// | Share     | yes                      | yes              | yes             |
/// | Immutable | no                       | no               | yes             |
/// | Pure      | no                       | yes              | yes             |
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PermissionKind {
    Unique,
    Full,
    Share,
    Immutable,
    Pure,
}

use PermissionKind::*;

impl PermissionKind {
    pub const ALL: [Self; 5] = [Unique, Full, Share, Immutable, Pure];

    /// Kind left behind after splitting `taken` off `self`.
    ///
    /// `None` means that the split is illegal.
    /// Taking a unique permission off a unique permission is legal,
    /// but leaves nothing behind; see [`Self::exhausted_by`].
    ///
    /// ~~~
    /// # use fracperm::PermissionKind::*;
    /// assert_eq!(Unique.split_remainder(Full), Some(Pure));
    /// assert_eq!(Unique.split_remainder(Share), None);
    /// assert_eq!(Share.split_remainder(Full), None);
    /// assert_eq!(Pure.split_remainder(Pure), Some(Pure));
    /// ~~~
    pub fn split_remainder(self, taken: Self) -> Option<Self> {
        match (self, taken) {
            (Unique | Full, Full) => Some(Pure),
            (Unique | Full, Immutable) => Some(Immutable),
            (Unique | Full, Pure) => Some(Full),
            (Share, Share | Pure) => Some(Share),
            (Immutable, Immutable | Pure) => Some(Immutable),
            (Pure, Pure) => Some(Pure),
            _ => None,
        }
    }

    /// Return true if taking `taken` off `self` takes everything.
    pub fn exhausted_by(self, taken: Self) -> bool {
        self == Unique && taken == Unique
    }

    /// Return true if `taken` may be split off `self`.
    pub fn can_split(self, taken: Self) -> bool {
        self.exhausted_by(taken) || self.split_remainder(taken).is_some()
    }

    /// Read-only counterpart of a kind.
    pub fn purify(self) -> Self {
        match self {
            Unique | Full | Immutable => Immutable,
            Share | Pure => Pure,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Immutable | Pure)
    }

    pub fn is_modifying(self) -> bool {
        !self.is_read_only()
    }

    /// Return true if other references may change the object.
    pub fn others_may_write(self) -> bool {
        matches!(self, Share | Pure)
    }

    /// Kind of a single permission combining two pieces of the same object,
    /// if they can be combined at all.
    ///
    /// Pieces with two writers (or a writer and a reader relying on
    /// the absence of writers) are never combined.
    pub fn combine(self, other: Self) -> Option<Self> {
        match (self, other) {
            (Pure, k) | (k, Pure) if k != Unique => Some(k),
            (Share, Share) => Some(Share),
            (Immutable, Immutable) => Some(Immutable),
            _ => None,
        }
    }

    /// Strongest kind weaker than both kinds.
    pub fn meet(self, other: Self) -> Self {
        match self.partial_cmp(&other) {
            Some(Ordering::Less | Ordering::Equal) => self,
            Some(Ordering::Greater) => other,
            None => Pure,
        }
    }

    fn rank(self) -> u8 {
        match self {
            Unique => 3,
            Full => 2,
            Share | Immutable => 1,
            Pure => 0,
        }
    }
}

/// Strength of kinds: `a > b` if `a` grants everything `b` grants.
///
/// Share and Immutable are incomparable.
impl PartialOrd for PermissionKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Share, Immutable) | (Immutable, Share) => None,
            _ => Some(self.rank().cmp(&other.rank())),
        }
    }
}

impl From<perm_parse::Kind> for PermissionKind {
    fn from(k: perm_parse::Kind) -> Self {
        match k {
            perm_parse::Kind::Unique => Unique,
            perm_parse::Kind::Full => Full,
            perm_parse::Kind::Share => Share,
            perm_parse::Kind::Immutable => Immutable,
            perm_parse::Kind::Pure => Pure,
        }
    }
}

impl Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unique => "unique",
            Full => "full",
            Share => "share",
            Immutable => "immutable",
            Pure => "pure",
        }
        .fmt(f)
    }
}

#[test]
fn split_table() {
    let table = [
        [None, Some(Pure), None, Some(Immutable), Some(Full)],
        [None, Some(Pure), None, Some(Immutable), Some(Full)],
        [None, None, Some(Share), None, Some(Share)],
        [None, None, None, Some(Immutable), Some(Immutable)],
        [None, None, None, None, Some(Pure)],
    ];
    for (have, row) in PermissionKind::ALL.iter().zip(table) {
        for (taken, remainder) in PermissionKind::ALL.iter().zip(row) {
            assert_eq!(have.split_remainder(*taken), remainder, "{} - {}", have, taken);
        }
    }
    assert!(Unique.can_split(Unique));
    assert!(!Full.can_split(Unique));
    assert!(!Full.can_split(Share));
}

#[test]
fn strength() {
    assert!(Unique > Full && Full > Share && Full > Immutable);
    assert!(Share > Pure && Immutable > Pure);
    assert_eq!(Share.partial_cmp(&Immutable), None);
    assert_eq!(Share.meet(Immutable), Pure);
    assert_eq!(Full.meet(Share), Share);
    assert_eq!(Unique.purify(), Immutable);
    assert_eq!(Share.purify(), Pure);
    for k in PermissionKind::ALL {
        assert!(k.purify().is_read_only());
        assert!(k >= k.purify() || k.partial_cmp(&k.purify()).is_none());
    }
}

#[test]
fn combination() {
    assert_eq!(Full.combine(Pure), Some(Full));
    assert_eq!(Pure.combine(Share), Some(Share));
    assert_eq!(Immutable.combine(Immutable), Some(Immutable));
    assert_eq!(Full.combine(Full), None);
    assert_eq!(Full.combine(Immutable), None);
    assert_eq!(Share.combine(Immutable), None);
    assert_eq!(Unique.combine(Pure), None);
}
