use std::collections::HashMap;

use super::types::{IntelligenceLevel, Story, StoryId};

/// Ordered, de-duplicated list of stories for one stream.
///
/// Order is arrival order: the first page's stories come first, in the order
/// the server sent them. Stories are keyed by [`StoryId`]; appending a story
/// whose id is already present replaces the stored copy in place (the server
/// copy wins) without moving it.
#[derive(Debug, Default, Clone)]
pub struct StoriesCollection {
    stories: Vec<Story>,
    index: HashMap<StoryId, usize>,
}

impl StoriesCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Story> {
        self.stories.iter()
    }

    pub fn as_slice(&self) -> &[Story] {
        &self.stories
    }

    pub fn get(&self, id: &StoryId) -> Option<&Story> {
        self.index.get(id).map(|&i| &self.stories[i])
    }

    pub fn get_mut(&mut self, id: &StoryId) -> Option<&mut Story> {
        self.index.get(id).map(|&i| &mut self.stories[i])
    }

    pub fn contains(&self, id: &StoryId) -> bool {
        self.index.contains_key(id)
    }

    pub fn position(&self, id: &StoryId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Merge `incoming` into the collection.
    ///
    /// Returns the stories that were not present before, in arrival order.
    /// Duplicates inside `incoming` itself collapse to the last copy.
    pub fn append(&mut self, incoming: Vec<Story>) -> Vec<Story> {
        let mut added_ids = Vec::new();

        for story in incoming {
            match self.index.get(&story.id) {
                Some(&i) => {
                    self.stories[i] = story;
                }
                None => {
                    self.index.insert(story.id.clone(), self.stories.len());
                    added_ids.push(story.id.clone());
                    self.stories.push(story);
                }
            }
        }

        // Re-read after the loop so an in-batch duplicate reports its final copy
        added_ids
            .iter()
            .filter_map(|id| self.get(id).cloned())
            .collect()
    }

    /// Drop everything and start over with `stories`.
    pub fn replace_all(&mut self, stories: Vec<Story>) -> Vec<Story> {
        self.clear();
        self.append(stories)
    }

    pub fn clear(&mut self) {
        self.stories.clear();
        self.index.clear();
    }

    /// Stories passing the given intelligence filter, in collection order.
    pub fn visible(&self, level: IntelligenceLevel) -> impl Iterator<Item = &Story> {
        self.stories.iter().filter(move |s| s.is_visible_at(level))
    }

    pub fn unread_count(&self, level: IntelligenceLevel) -> usize {
        self.visible(level).filter(|s| !s.read).count()
    }
}
