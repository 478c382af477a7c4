use cashbook_core::UserId;

/// Per-request context set by the `x-user-id` middleware.
///
/// Reads are anonymous; every write needs an acting user.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    acting_user: Option<UserId>,
}

impl RequestContext {
    pub fn new(acting_user: Option<UserId>) -> Self {
        Self { acting_user }
    }

    pub fn acting_user(&self) -> Option<UserId> {
        self.acting_user
    }
}
