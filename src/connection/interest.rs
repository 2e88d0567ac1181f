//! Interest flags
//!
//! Which readiness events a connection wants the reactor to deliver.

/// The readiness a connection currently wants from the reactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interest {
    #[default]
    Neither,
    ReadOnly,
    WriteOnly,
    Both,
}

impl Interest {
    pub fn is_readable(self) -> bool {
        matches!(self, Interest::ReadOnly | Interest::Both)
    }

    pub fn is_writable(self) -> bool {
        matches!(self, Interest::WriteOnly | Interest::Both)
    }

    fn from_flags(read: bool, write: bool) -> Self {
        match (read, write) {
            (false, false) => Interest::Neither,
            (true, false) => Interest::ReadOnly,
            (false, true) => Interest::WriteOnly,
            (true, true) => Interest::Both,
        }
    }

    pub fn enable_read(self) -> Self {
        Self::from_flags(true, self.is_writable())
    }

    pub fn disable_read(self) -> Self {
        Self::from_flags(false, self.is_writable())
    }

    pub fn enable_write(self) -> Self {
        Self::from_flags(self.is_readable(), true)
    }

    pub fn disable_write(self) -> Self {
        Self::from_flags(self.is_readable(), false)
    }
}
