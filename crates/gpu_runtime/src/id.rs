use std::fmt;
use std::marker::PhantomData;

#[derive(PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Id<Tag, Repr> {
    raw: Repr,
    _marker: PhantomData<Tag>,
}

impl<Tag, Repr: Copy> Copy for Id<Tag, Repr> {}

impl<Tag, Repr: Copy> Clone for Id<Tag, Repr> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag, Repr> Id<Tag, Repr> {
    pub const fn new(raw: Repr) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    pub fn raw(self) -> Repr
    where
        Repr: Copy,
    {
        self.raw
    }
}

impl<Tag: TagName, Repr: fmt::Debug> fmt::Debug for Id<Tag, Repr> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}({:?})", Tag::NAME, self.raw)
    }
}

pub trait TagName {
    const NAME: &'static str;
}

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextureTag {}
impl TagName for TextureTag {
    const NAME: &'static str = "TextureId";
}
/// Backend texture handle. Plain integer, allocated from an `IdPool`.
pub type TextureId = Id<TextureTag, u32>;

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BufferTag {}
impl TagName for BufferTag {
    const NAME: &'static str = "BufferId";
}
pub type BufferId = Id<BufferTag, u32>;

#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramTag {}
impl TagName for ProgramTag {
    const NAME: &'static str = "ProgramHandle";
}
/// Opaque shader program handle. Shader source lives outside this workspace.
pub type ProgramHandle = Id<ProgramTag, u32>;
