/// Kind of GPU query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Counts samples that pass depth and stencil tests between begin and end.
    Occlusion,
    /// Records the GPU clock when the end command executes. Has no begin.
    Timestamp,
}

impl QueryKind {
    /// Returns true if the query is bracketed by a begin command.
    pub fn has_begin(&self) -> bool {
        matches!(self, Self::Occlusion)
    }
}
