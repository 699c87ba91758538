use crate::domain::CategoryId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonAction {
    /// Opaque payload echoed back in a callback query.
    Callback(String),
    Url(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub action: ButtonAction,
}

impl InlineButton {
    pub fn callback(label: impl Into<String>, action: CallbackAction) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Callback(action.encode()),
        }
    }

    pub fn url(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Inline keyboard, one button per row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub buttons: Vec<InlineButton>,
}

impl InlineKeyboard {
    pub fn new(buttons: Vec<InlineButton>) -> Self {
        Self { buttons }
    }

    pub fn push(&mut self, button: InlineButton) {
        self.buttons.push(button);
    }

    /// Admin controls shown next to a category.
    pub fn category_admin(id: &CategoryId) -> Self {
        Self::new(vec![
            InlineButton::callback("View files", CallbackAction::View(id.clone())),
            InlineButton::callback("Add files", CallbackAction::AddFiles(id.clone())),
            InlineButton::callback("Set timer", CallbackAction::SetTimer(id.clone())),
            InlineButton::callback("Delete", CallbackAction::Delete(id.clone())),
        ])
    }
}

/// Callback payloads carried by inline buttons.
///
/// Telegram caps callback data at 64 bytes; every variant stays far below that.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallbackAction {
    View(CategoryId),
    AddFiles(CategoryId),
    SetTimer(CategoryId),
    Delete(CategoryId),
    /// Re-run the membership check, then deliver.
    CheckMembership(CategoryId),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::View(id) => format!("view_{id}"),
            CallbackAction::AddFiles(id) => format!("add_{id}"),
            CallbackAction::SetTimer(id) => format!("timer_{id}"),
            CallbackAction::Delete(id) => format!("delcat_{id}"),
            CallbackAction::CheckMembership(id) => format!("check_{id}"),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, raw) = data.split_once('_')?;
        let id = raw.trim();
        if id.is_empty() {
            return None;
        }
        let id = CategoryId::from(id);
        match prefix {
            "view" => Some(CallbackAction::View(id)),
            "add" => Some(CallbackAction::AddFiles(id)),
            "timer" => Some(CallbackAction::SetTimer(id)),
            "delcat" => Some(CallbackAction::Delete(id)),
            "check" => Some(CallbackAction::CheckMembership(id)),
            _ => None,
        }
    }

    pub fn category(&self) -> &CategoryId {
        match self {
            CallbackAction::View(id)
            | CallbackAction::AddFiles(id)
            | CallbackAction::SetTimer(id)
            | CallbackAction::Delete(id)
            | CallbackAction::CheckMembership(id) => id,
        }
    }

    /// Only the membership re-check is available to non-admins.
    pub fn requires_admin(&self) -> bool {
        !matches!(self, CallbackAction::CheckMembership(_))
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_inline_keyboards: bool,
    pub max_message_len: usize,
    pub max_caption_len: usize,
}
