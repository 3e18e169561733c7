//! Per-opcode flag bitfields.
//!
//! Unknown bits are preserved so a message can be re-encoded unchanged.

/// Flags of a Query message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryFlags(i32);

impl QueryFlags {
    pub const TAILABLE: i32 = 1 << 1;
    /// Allow the query to run on a secondary.
    pub const SLAVE_OK: i32 = 1 << 2;
    pub const NO_CURSOR_TIMEOUT: i32 = 1 << 4;
    pub const AWAIT_DATA: i32 = 1 << 5;
    pub const EXHAUST: i32 = 1 << 6;
    /// Return partial results if some shards are down.
    pub const PARTIAL: i32 = 1 << 7;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_tailable(mut self) -> Self {
        self.0 |= Self::TAILABLE;
        self
    }

    pub fn with_slave_ok(mut self) -> Self {
        self.0 |= Self::SLAVE_OK;
        self
    }

    pub fn with_no_cursor_timeout(mut self) -> Self {
        self.0 |= Self::NO_CURSOR_TIMEOUT;
        self
    }

    pub fn with_await_data(mut self) -> Self {
        self.0 |= Self::AWAIT_DATA;
        self
    }

    pub fn with_exhaust(mut self) -> Self {
        self.0 |= Self::EXHAUST;
        self
    }

    pub fn with_partial(mut self) -> Self {
        self.0 |= Self::PARTIAL;
        self
    }

    pub fn is_tailable(&self) -> bool {
        self.0 & Self::TAILABLE != 0
    }

    pub fn is_slave_ok(&self) -> bool {
        self.0 & Self::SLAVE_OK != 0
    }

    pub fn is_no_cursor_timeout(&self) -> bool {
        self.0 & Self::NO_CURSOR_TIMEOUT != 0
    }

    pub fn is_await_data(&self) -> bool {
        self.0 & Self::AWAIT_DATA != 0
    }

    pub fn is_exhaust(&self) -> bool {
        self.0 & Self::EXHAUST != 0
    }

    pub fn is_partial(&self) -> bool {
        self.0 & Self::PARTIAL != 0
    }
}

/// Flags of an Update message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UpdateFlags(i32);

impl UpdateFlags {
    pub const UPSERT: i32 = 1 << 0;
    pub const MULTI: i32 = 1 << 1;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_upsert(mut self) -> Self {
        self.0 |= Self::UPSERT;
        self
    }

    pub fn with_multi(mut self) -> Self {
        self.0 |= Self::MULTI;
        self
    }

    pub fn is_upsert(&self) -> bool {
        self.0 & Self::UPSERT != 0
    }

    pub fn is_multi(&self) -> bool {
        self.0 & Self::MULTI != 0
    }
}

/// Flags of a Delete message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DeleteFlags(i32);

impl DeleteFlags {
    pub const SINGLE_REMOVE: i32 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_single_remove(mut self) -> Self {
        self.0 |= Self::SINGLE_REMOVE;
        self
    }

    pub fn is_single_remove(&self) -> bool {
        self.0 & Self::SINGLE_REMOVE != 0
    }
}

/// Flags of an Insert message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InsertFlags(i32);

impl InsertFlags {
    pub const CONTINUE_ON_ERROR: i32 = 1 << 0;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_continue_on_error(mut self) -> Self {
        self.0 |= Self::CONTINUE_ON_ERROR;
        self
    }

    pub fn is_continue_on_error(&self) -> bool {
        self.0 & Self::CONTINUE_ON_ERROR != 0
    }
}

/// Flags of a Reply message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReplyFlags(i32);

impl ReplyFlags {
    pub const CURSOR_NOT_FOUND: i32 = 1 << 0;
    /// The single returned document describes a query error.
    pub const QUERY_FAILURE: i32 = 1 << 1;
    pub const SHARD_CONFIG_STALE: i32 = 1 << 2;
    pub const AWAIT_CAPABLE: i32 = 1 << 3;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn with_cursor_not_found(mut self) -> Self {
        self.0 |= Self::CURSOR_NOT_FOUND;
        self
    }

    pub fn with_query_failure(mut self) -> Self {
        self.0 |= Self::QUERY_FAILURE;
        self
    }

    pub fn with_await_capable(mut self) -> Self {
        self.0 |= Self::AWAIT_CAPABLE;
        self
    }

    pub fn is_cursor_not_found(&self) -> bool {
        self.0 & Self::CURSOR_NOT_FOUND != 0
    }

    pub fn is_query_failure(&self) -> bool {
        self.0 & Self::QUERY_FAILURE != 0
    }

    pub fn is_shard_config_stale(&self) -> bool {
        self.0 & Self::SHARD_CONFIG_STALE != 0
    }

    pub fn is_await_capable(&self) -> bool {
        self.0 & Self::AWAIT_CAPABLE != 0
    }
}
