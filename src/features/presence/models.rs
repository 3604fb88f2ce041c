use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 20-color palette cycled by join order; once exhausted, later joiners get
/// a color hashed from their user id so the roster never runs out.
pub const COLOR_PALETTE: [&str; 20] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#bcf60c", "#fabebe",
    "#008080", "#e6beff", "#9a6324", "#fffac8", "#800000", "#aaffc3", "#808000", "#ffd8b1", "#000075", "#808080",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorPosition {
    pub doc_path: String,
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRange {
    pub doc_path: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub user_id: Uuid,
    pub display_name: String,
    pub color: String,
    pub status: PresenceStatus,
    pub cursor: Option<CursorPosition>,
    pub selection: Option<SelectionRange>,
    pub joined_at: DateTime<Utc>,
    #[serde(skip)]
    pub last_seen: std::time::Instant,
    #[serde(skip)]
    pub last_cursor_broadcast: Option<std::time::Instant>,
}

/// Picks the first palette color not already held by `in_use`, so a color
/// freed by a departing member is handed to the next joiner instead of the
/// palette index only ever advancing. Falls back to a hash of the user id
/// once every color in the palette is taken.
pub fn next_available_color<'a>(in_use: impl Iterator<Item = &'a str>, user_id: Uuid) -> String {
    let taken: std::collections::HashSet<&str> = in_use.collect();
    match COLOR_PALETTE.iter().find(|c| !taken.contains(*c)) {
        Some(color) => color.to_string(),
        None => {
            let hash = user_id.as_u128() as usize;
            COLOR_PALETTE[hash % COLOR_PALETTE.len()].to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_a_color_freed_by_a_departed_member() {
        let in_use = vec![COLOR_PALETTE[0].to_string()];
        let color = next_available_color(in_use.iter().map(String::as_str), Uuid::new_v4());
        assert_eq!(color, COLOR_PALETTE[1]);
    }

    #[test]
    fn falls_back_to_hash_once_palette_is_exhausted() {
        let in_use: Vec<String> = COLOR_PALETTE.iter().map(|c| c.to_string()).collect();
        let user_id = Uuid::new_v4();
        let color = next_available_color(in_use.iter().map(String::as_str), user_id);
        assert!(COLOR_PALETTE.contains(&color.as_str()));
    }
}
