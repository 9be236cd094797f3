use shared::{RecordId, SessionUser};

/// Who is acting and which child they are looking at.
///
/// Passed explicitly to every operation instead of living in global state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub user: SessionUser,
    pub selected_child_id: Option<RecordId>,
}

impl SessionContext {
    pub fn new(user: SessionUser, selected_child_id: Option<RecordId>) -> Self {
        Self { user, selected_child_id }
    }

    pub fn user_id(&self) -> &str {
        &self.user.user_id
    }

    pub fn with_selected(mut self, child_id: Option<RecordId>) -> Self {
        self.selected_child_id = child_id;
        self
    }
}
