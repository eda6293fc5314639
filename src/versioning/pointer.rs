//! Inline version pointers: `name`, `name^`, `name^^`, `name@tag`, `name@tag^`.

/// A parsed version pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pointer<'a> {
    /// Logical object name
    pub name: &'a str,
    /// Tag (or commit ref) after `@`
    pub tag: Option<&'a str>,
    /// Number of trailing `^`
    pub parents: usize,
}

impl<'a> Pointer<'a> {
    /// Split `raw` into name, tag and parent count. Never fails: a name
    /// without pointer syntax parses to itself.
    #[must_use]
    pub fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim_end_matches('^');
        let parents = raw.len() - trimmed.len();
        let (name, tag) = match trimmed.rsplit_once('@') {
            Some((name, tag)) if !name.is_empty() && !tag.is_empty() => (name, Some(tag)),
            _ => (trimmed, None),
        };
        Self { name, tag, parents }
    }

    /// True if the pointer selects anything but the plain name.
    #[must_use]
    pub const fn is_relative(&self) -> bool {
        self.tag.is_some() || self.parents > 0
    }
}
