//! Community stories and the comment threads under them

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::report::{IncidentType, Severity};
use super::CommunityError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: u64,
    pub content: String,
    pub date: NaiveDate,
    pub likes: u32,
    pub is_support: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: u64,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    pub location: String,
    pub date: NaiveDate,
    pub severity: Severity,
    pub likes: u32,
    pub comments: Vec<Comment>,
    pub tags: Vec<String>,
}

/// Type/severity filter for the stories view; `None` means "all"
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryFilter {
    #[serde(default, rename = "type")]
    pub incident_type: Option<IncidentType>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

impl StoryFilter {
    pub fn matches(&self, story: &Story) -> bool {
        self.incident_type.map_or(true, |t| t == story.incident_type)
            && self.severity.map_or(true, |s| s == story.severity)
    }
}

/// All stories plus the counter used to mint comment ids
#[derive(Debug, Default)]
pub struct StoryBoard {
    stories: Vec<Story>,
    last_comment_id: u64,
}

impl StoryBoard {
    pub fn from_seed(stories: Vec<Story>) -> Self {
        let last_comment_id = stories
            .iter()
            .flat_map(|s| s.comments.iter().map(|c| c.id))
            .max()
            .unwrap_or(0);
        Self {
            stories,
            last_comment_id,
        }
    }

    pub fn all(&self) -> &[Story] {
        &self.stories
    }

    #[cfg(test)]
    pub fn get(&self, story_id: u64) -> Option<&Story> {
        self.stories.iter().find(|s| s.id == story_id)
    }

    pub fn filtered(&self, filter: &StoryFilter) -> Vec<Story> {
        self.stories
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    /// Distinct incident types across stories, in first-seen order
    pub fn incident_types(&self) -> Vec<IncidentType> {
        let mut types = Vec::new();
        for story in &self.stories {
            if !types.contains(&story.incident_type) {
                types.push(story.incident_type);
            }
        }
        types
    }

    fn story_mut(&mut self, story_id: u64) -> Result<&mut Story, CommunityError> {
        self.stories
            .iter_mut()
            .find(|s| s.id == story_id)
            .ok_or(CommunityError::StoryNotFound(story_id))
    }

    /// Returns the new like count
    pub fn like_story(&mut self, story_id: u64) -> Result<u32, CommunityError> {
        let story = self.story_mut(story_id)?;
        story.likes += 1;
        debug!(story_id, likes = story.likes, "story liked");
        Ok(story.likes)
    }

    /// Returns the new like count
    pub fn like_comment(&mut self, story_id: u64, comment_id: u64) -> Result<u32, CommunityError> {
        let story = self.story_mut(story_id)?;
        let comment = story
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or(CommunityError::CommentNotFound {
                story_id,
                comment_id,
            })?;
        comment.likes += 1;
        debug!(story_id, comment_id, likes = comment.likes, "comment liked");
        Ok(comment.likes)
    }

    pub fn add_comment(
        &mut self,
        story_id: u64,
        content: &str,
        today: NaiveDate,
    ) -> Result<Comment, CommunityError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CommunityError::EmptyComment);
        }
        // Check the story before burning an id
        self.story_mut(story_id)?;

        self.last_comment_id += 1;
        let comment = Comment {
            id: self.last_comment_id,
            content: content.to_string(),
            date: today,
            likes: 0,
            is_support: true,
        };

        self.story_mut(story_id)?.comments.push(comment.clone());
        debug!(story_id, comment_id = comment.id, "comment added");
        Ok(comment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::seed;

    fn board() -> StoryBoard {
        StoryBoard::from_seed(seed::stories().unwrap())
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_like_story_touches_only_target() {
        let mut board = board();
        let before: Vec<u32> = board.all().iter().map(|s| s.likes).collect();

        let likes = board.like_story(3).unwrap();
        assert_eq!(likes, before[2] + 1);

        for (story, old) in board.all().iter().zip(before) {
            let expected = if story.id == 3 { old + 1 } else { old };
            assert_eq!(story.likes, expected);
        }
    }

    #[test]
    fn test_like_comment_touches_only_target() {
        let mut board = board();
        let snapshot = board.all().to_vec();

        board.like_comment(1, 2).unwrap();

        for (story, old) in board.all().iter().zip(&snapshot) {
            assert_eq!(story.likes, old.likes);
            for (c, old_c) in story.comments.iter().zip(&old.comments) {
                let expected = if story.id == 1 && c.id == 2 {
                    old_c.likes + 1
                } else {
                    old_c.likes
                };
                assert_eq!(c.likes, expected);
            }
        }
    }

    #[test]
    fn test_like_missing_entities() {
        let mut board = board();
        assert!(matches!(
            board.like_story(999),
            Err(CommunityError::StoryNotFound(999))
        ));
        // comment 4 belongs to story 2
        assert!(matches!(
            board.like_comment(1, 4),
            Err(CommunityError::CommentNotFound { .. })
        ));
    }

    #[test]
    fn test_add_comment() {
        let mut board = board();
        let comment = board.add_comment(2, "  stay strong ", today()).unwrap();
        assert_eq!(comment.content, "stay strong");
        assert_eq!(comment.date, today());
        assert!(comment.is_support);
        assert_eq!(comment.likes, 0);

        let ids: Vec<u64> = board
            .all()
            .iter()
            .flat_map(|s| s.comments.iter().map(|c| c.id))
            .collect();
        assert_eq!(ids.iter().filter(|id| **id == comment.id).count(), 1);
        assert_eq!(board.get(2).unwrap().comments.last().unwrap().id, comment.id);
    }

    #[test]
    fn test_add_comment_rejects_blank() {
        let mut board = board();
        assert!(matches!(
            board.add_comment(1, "   ", today()),
            Err(CommunityError::EmptyComment)
        ));
        assert!(board.add_comment(42, "hi", today()).is_err());
    }

    #[test]
    fn test_filter_by_severity() {
        let board = board();
        let filter = StoryFilter {
            incident_type: None,
            severity: Some(Severity::High),
        };
        let high = board.filtered(&filter);
        assert!(!high.is_empty());
        assert!(high.iter().all(|s| s.severity == Severity::High));
    }
}
