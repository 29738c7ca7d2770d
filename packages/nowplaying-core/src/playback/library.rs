//! Helpers for paginated library browsing.

use super::types::{Identified, PlaybackData, TrackItem};

/// Merges a fetched page into the cached list.
///
/// Offset 0 replaces the cached list. Any other offset appends the items
/// whose id is not already present, keeping prior items in their order.
pub fn merge_page<T: Identified>(cached: &mut Vec<T>, page: Vec<T>, offset: u32) {
    if offset == 0 {
        *cached = page;
        return;
    }
    for item in page {
        if !cached.iter().any(|existing| existing.id() == item.id()) {
            cached.push(item);
        }
    }
}

/// Marks each track whose id matches the snapshot's current track.
pub fn tag_playing(tracks: &mut [TrackItem], snapshot: Option<&PlaybackData>) {
    let current = snapshot.and_then(|s| s.track.id.as_deref());
    for track in tracks {
        track.is_playing = current == Some(track.id.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::types::{LibraryItem, TrackInfo};

    fn item(id: &str) -> LibraryItem {
        LibraryItem {
            id: id.to_string(),
            name: format!("name-{id}"),
            subtitle: String::new(),
            image_url: None,
            track_count: None,
            uri: None,
        }
    }

    fn track(id: &str) -> TrackItem {
        TrackItem {
            id: id.to_string(),
            name: id.to_string(),
            artists: vec![],
            album: String::new(),
            duration_ms: 0,
            is_playing: false,
            uri: None,
        }
    }

    fn ids(items: &[LibraryItem]) -> Vec<&str> {
        items.iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn later_page_appends_without_duplicates() {
        let mut cached = vec![item("1"), item("2"), item("3")];
        merge_page(&mut cached, vec![item("3"), item("4")], 3);
        assert_eq!(ids(&cached), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn first_page_replaces_cache() {
        let mut cached = vec![item("1"), item("2")];
        merge_page(&mut cached, vec![item("9")], 0);
        assert_eq!(ids(&cached), vec!["9"]);
    }

    #[test]
    fn tags_current_track() {
        let snapshot = PlaybackData {
            track: TrackInfo {
                id: Some("b".into()),
                ..TrackInfo::default()
            },
            ..PlaybackData::default()
        };
        let mut tracks = vec![track("a"), track("b")];
        tag_playing(&mut tracks, Some(&snapshot));
        assert!(!tracks[0].is_playing);
        assert!(tracks[1].is_playing);

        tag_playing(&mut tracks, None);
        assert!(tracks.iter().all(|t| !t.is_playing));
    }
}
