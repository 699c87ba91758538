use crate::domain::CategoryId;

const START_PREFIX: &str = "cat_";

/// `https://t.me/<bot>?start=cat_<id>`.
///
/// Falls back to the numeric bot id when the username is not known yet.
pub fn category_link(bot_username: Option<&str>, bot_id: &str, id: &CategoryId) -> String {
    let bot = bot_username
        .map(|u| u.trim().trim_start_matches('@'))
        .filter(|u| !u.is_empty())
        .unwrap_or(bot_id);
    format!("https://t.me/{bot}?start={START_PREFIX}{id}")
}

/// Category id carried by a `/start` payload.
pub fn parse_start_payload(payload: &str) -> Option<CategoryId> {
    let id = payload.trim().strip_prefix(START_PREFIX)?.trim();
    if id.is_empty() {
        return None;
    }
    Some(CategoryId::from(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_prefer_the_username() {
        let id = CategoryId::from("0a1b2c3d");
        assert_eq!(
            category_link(Some("@files_bot"), "123", &id),
            "https://t.me/files_bot?start=cat_0a1b2c3d"
        );
        assert_eq!(
            category_link(None, "123", &id),
            "https://t.me/123?start=cat_0a1b2c3d"
        );
    }

    #[test]
    fn start_payload_round_trips() {
        let id = CategoryId::from("0a1b2c3d");
        let link = category_link(Some("b"), "1", &id);
        let payload = link.split("start=").nth(1).unwrap();
        assert_eq!(parse_start_payload(payload), Some(id));
        assert_eq!(parse_start_payload("cat_"), None);
        assert_eq!(parse_start_payload("hello"), None);
    }
}
