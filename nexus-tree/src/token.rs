/// Identity of a physical object as reported by the backend. Two paths with
/// equal `Object` tokens are hard links to the same object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LinkToken {
    /// The tree root; the backend does not hand out a token for it.
    Root,
    /// Target lives in a foreign file, so its identity cannot be cached here.
    External,
    /// The path does not exist (yet).
    NoLink,
    Object(u64),
}

impl LinkToken {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, LinkToken::Root | LinkToken::Object(_))
    }
}

impl std::fmt::Display for LinkToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkToken::Root => write!(f, "root"),
            LinkToken::External => write!(f, "external"),
            LinkToken::NoLink => write!(f, "no-link"),
            LinkToken::Object(addr) => write!(f, "obj:{}", addr),
        }
    }
}
